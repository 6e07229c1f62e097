//! draftmill process entry point.
//!
//! One binary, three roles: `api` serves HTTP and the session gateway,
//! `worker` consumes the job queue, `all` collocates both. `bootstrap`
//! creates the initial principal.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

mod handler;

use draftmill_api::{AppState, router_with_admission};
use draftmill_bus::RedisBus;
use draftmill_config::Config;
use draftmill_gateway::{RoomRegistry, relay};
use draftmill_metrics::Metrics;
use draftmill_queue::{WorkerConfig, WorkerPool, shutdown_channel};
use draftmill_store::{PgStore, PrincipalStore};

#[derive(Parser, Debug)]
#[command(name = "draftmill", version)]
#[command(about = "Resumable, event-streaming article-generation pipeline")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API and the WebSocket session gateway.
    Api,
    /// Run the job-queue worker pool (no client traffic).
    Worker,
    /// Run both roles in one process.
    All,
    /// Create the initial principal.
    Bootstrap {
        /// Login email for the principal.
        #[arg(long)]
        email: String,
        /// Interactive password (hashed before storage).
        #[arg(long)]
        password: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let config = Arc::new(Config::from_env()?);
    let store = Arc::new(
        PgStore::connect(&config.database_url)
            .await
            .context("failed to connect to the durable store")?,
    );

    match cli.cmd {
        Commands::Api => run_api(config, store).await,
        Commands::Worker => run_worker(config, store).await,
        Commands::All => {
            let api = {
                let config = config.clone();
                let store = store.clone();
                tokio::spawn(async move { run_api(config, store).await })
            };
            let worker = tokio::spawn(async move { run_worker(config, store).await });
            let (api, worker) = tokio::try_join!(api, worker)?;
            api?;
            worker
        }
        Commands::Bootstrap { email, password } => bootstrap(store, email, password).await,
    }
}

async fn run_api(config: Arc<Config>, store: Arc<PgStore>) -> Result<()> {
    let bus = Arc::new(
        RedisBus::connect(&config.redis_connection_url())
            .await
            .context("failed to connect the bus publisher")?,
    );
    let metrics = Arc::new(Metrics::new().context("failed to build metrics")?);
    let registry = Arc::new(RoomRegistry::new());

    // The process-wide bus subscriber feeding the gateway.
    let subscriber = RedisBus::subscribe(&config.redis_connection_url())
        .await
        .context("failed to open the bus subscriber")?;
    tokio::spawn(relay(registry.clone(), subscriber));

    let state = AppState::new(store, bus, config.clone(), metrics);
    let app = router_with_admission(state, registry);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "api listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("api server failed")
}

async fn run_worker(config: Arc<Config>, store: Arc<PgStore>) -> Result<()> {
    let bus = Arc::new(
        RedisBus::connect(&config.redis_connection_url())
            .await
            .context("failed to connect the bus publisher")?,
    );
    let metrics = Arc::new(Metrics::new().context("failed to build metrics")?);

    let worker_config = WorkerConfig {
        concurrency: config.worker_concurrency,
        max_active: config.max_concurrent_jobs,
        ..WorkerConfig::default()
    };
    let handler = Arc::new(handler::PipelineHandler::new(
        store.clone(),
        bus,
        config,
        metrics,
        worker_config.backoff.max_attempts,
    ));
    let pool = WorkerPool::new(store, handler, worker_config);

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    pool.run(shutdown_rx).await;
    Ok(())
}

async fn bootstrap(store: Arc<PgStore>, email: String, password: String) -> Result<()> {
    let principal = draftmill_types::Principal {
        id: uuid::Uuid::new_v4(),
        email: email.clone(),
        password_hash: draftmill_auth::hash_password(&password)
            .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?,
        pin_hash: None,
        credentials: Default::default(),
        created_at: chrono::Utc::now(),
    };
    store
        .insert_principal(&principal)
        .await
        .context("failed to create principal")?;
    info!(%email, id = %principal.id, "principal created");
    println!("created principal {} ({})", principal.id, email);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
