//! HTTP surface.
//!
//! Request admission (bearer tokens, per-IP rate limit, body cap), the
//! JSON envelope every endpoint speaks, and the route handlers for auth,
//! credentials, projects, and jobs. The WebSocket gateway endpoint is
//! mounted alongside the REST routes.

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use draftmill_auth::TokenSigner;
use draftmill_bus::EventBus;
use draftmill_config::Config;
use draftmill_encrypt::Vault;
use draftmill_gateway::{GatewayState, RoomRegistry, ws_handler};
use draftmill_metrics::Metrics;
use draftmill_store::Store;

mod envelope;
mod error;
mod extract;
mod routes;

pub use envelope::Envelope;
pub use error::ApiError;
pub use extract::{AuthPrincipal, ClientIp};

/// Request body cap: 10 MB.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub bus: Arc<dyn EventBus>,
    pub signer: TokenSigner,
    pub vault: Vault,
    pub metrics: Arc<Metrics>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<dyn EventBus>,
        config: Arc<Config>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let signer = TokenSigner::new(&config.jwt_secret, config.token_lifetime());
        let vault = match config.encryption_key() {
            Some(key) => Vault::new(key),
            None => Vault::from_secret(&config.jwt_secret),
        };
        Self {
            store,
            bus,
            signer,
            vault,
            metrics,
            config,
        }
    }
}

/// Build the API router without the per-IP rate limit (tests drive this
/// directly; the rate limiter needs the peer address from the listener).
pub fn router(state: AppState, registry: Arc<RoomRegistry>) -> Router {
    let gateway = GatewayState {
        registry,
        signer: state.signer.clone(),
    };

    let api = Router::new()
        // auth
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/me", get(routes::auth::me))
        .route("/api/auth/refresh", post(routes::auth::refresh))
        .route("/api/auth/password", put(routes::auth::change_password))
        .route("/api/auth/pin", put(routes::auth::change_pin))
        .route("/api/auth/pin-status", get(routes::auth::pin_status))
        // credentials
        .route(
            "/api/settings/api-keys",
            get(routes::settings::masked_credentials),
        )
        .route(
            "/api/settings/api-keys/masked",
            get(routes::settings::masked_credentials),
        )
        .route(
            "/api/settings/api-keys/verify-pin",
            post(routes::settings::verify_pin),
        )
        .route(
            "/api/settings/api-keys/{kind}",
            put(routes::settings::store_credential),
        )
        .route(
            "/api/settings/api-keys/{kind}/test",
            post(routes::settings::test_credential),
        )
        // projects
        .route(
            "/api/projects",
            post(routes::projects::create).get(routes::projects::list),
        )
        .route(
            "/api/projects/{id}",
            get(routes::projects::fetch)
                .put(routes::projects::update)
                .delete(routes::projects::remove),
        )
        // jobs
        .route(
            "/api/projects/{id}/generations",
            post(routes::generations::create).get(routes::generations::list_in_project),
        )
        .route("/api/generations", get(routes::generations::list))
        .route(
            "/api/generations/queue/stats",
            get(routes::generations::queue_stats),
        )
        .route(
            "/api/generations/{id}",
            get(routes::generations::fetch).delete(routes::generations::remove),
        )
        .route(
            "/api/generations/{id}/logs",
            get(routes::generations::logs_since),
        )
        .route(
            "/api/generations/{id}/continue",
            post(routes::generations::resume),
        )
        // system
        .route("/api/health", get(routes::system::health))
        .route("/api/metrics", get(routes::system::metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            track_http,
        ))
        .with_state(state);

    let ws = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(gateway);

    api.merge(ws)
}

/// Record request count and latency per matched route.
async fn track_http(
    axum::extract::State(state): axum::extract::State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let start = std::time::Instant::now();
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<axum::extract::MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;

    state.metrics.observe_http(
        method.as_str(),
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// Production router: the test router plus request tracing, permissive
/// CORS for the browser UI, and the global per-IP rate limit (100
/// requests / 15 minutes) keyed on the peer address. Requires the server
/// to bind with connect-info.
pub fn router_with_admission(state: AppState, registry: Arc<RoomRegistry>) -> Router {
    use tower_governor::GovernorLayer;
    use tower_governor::governor::GovernorConfigBuilder;
    use tower_http::cors::CorsLayer;
    use tower_http::trace::TraceLayer;

    // 100 requests per 15 minutes: one permit every 9 s, burst of 100.
    let governor = GovernorConfigBuilder::default()
        .period(std::time::Duration::from_secs(9))
        .burst_size(100)
        .finish()
        .expect("static governor configuration");

    router(state, registry)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(GovernorLayer {
            config: Arc::new(governor),
        })
}
