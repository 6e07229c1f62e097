//! Authentication endpoints.

use axum::Json;
use axum::extract::State;
use draftmill_store::PrincipalStore;
use draftmill_types::Principal;
use serde::Deserialize;
use serde_json::json;

use crate::{ApiError, AppState, AuthPrincipal, Envelope};

/// Minimum interactive password length.
const MIN_PASSWORD_LEN: usize = 8;

/// Client-facing projection of a principal. Verifiers never leave the
/// server.
pub(crate) fn principal_view(principal: &Principal) -> serde_json::Value {
    json!({
        "id": principal.id,
        "email": principal.email,
        "hasPinConfigured": principal.pin_hash.is_some(),
        "createdAt": principal.created_at,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginBody {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

/// `POST /api/auth/login` — exchange email+password for a signed token.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<Envelope>, ApiError> {
    if body.email.is_empty() || body.password.is_empty() {
        return Err(ApiError::BadRequest("email and password are required".into()));
    }
    // A missing principal and a wrong password answer identically.
    let principal = state
        .store
        .principal_by_email(&body.email)
        .await
        .map_err(|_| ApiError::Unauthorized("invalid credentials".into()))?;
    if !draftmill_auth::verify_password(&body.password, &principal.password_hash) {
        return Err(ApiError::Unauthorized("invalid credentials".into()));
    }
    let token = state.signer.issue(principal.id).map_err(ApiError::internal)?;
    Ok(Json(Envelope::ok(json!({
        "token": token,
        "user": principal_view(&principal),
    }))))
}

/// `GET /api/auth/me` — the principal plus per-credential status.
pub async fn me(
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<Envelope>, ApiError> {
    let mut view = principal_view(&principal);
    view["credentials"] = json!({
        "openrouter": { "configured": principal.credentials.openrouter.is_set() },
        "supabase": { "configured": principal.credentials.supabase.is_set() },
        "firecrawl": { "configured": principal.credentials.firecrawl.is_set() },
    });
    Ok(Json(Envelope::ok(view)))
}

/// `POST /api/auth/refresh` — mint a fresh token.
pub async fn refresh(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<Envelope>, ApiError> {
    let token = state.signer.issue(principal.id).map_err(ApiError::internal)?;
    Ok(Json(Envelope::ok(json!({ "token": token }))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordBody {
    #[serde(default)]
    current_password: String,
    #[serde(default)]
    new_password: String,
}

/// `PUT /api/auth/password` — rotate the password.
pub async fn change_password(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(body): Json<ChangePasswordBody>,
) -> Result<Json<Envelope>, ApiError> {
    if !draftmill_auth::verify_password(&body.current_password, &principal.password_hash) {
        return Err(ApiError::Unauthorized("current password is wrong".into()));
    }
    if body.new_password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let hash = draftmill_auth::hash_password(&body.new_password).map_err(ApiError::internal)?;
    state.store.set_password_hash(principal.id, &hash).await?;
    Ok(Json(Envelope::message("password updated")))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePinBody {
    #[serde(default)]
    current_pin: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    new_pin: String,
}

/// `PUT /api/auth/pin` — set or rotate the PIN. Requires the current PIN
/// when one is configured, the password otherwise.
pub async fn change_pin(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(body): Json<ChangePinBody>,
) -> Result<Json<Envelope>, ApiError> {
    let pin_ok = body.new_pin.len() >= 4
        && body.new_pin.len() <= 8
        && body.new_pin.chars().all(|c| c.is_ascii_digit());
    if !pin_ok {
        return Err(ApiError::BadRequest("PIN must be 4-8 digits".into()));
    }

    match &principal.pin_hash {
        Some(existing) => {
            let current = body
                .current_pin
                .as_deref()
                .ok_or_else(|| ApiError::BadRequest("current PIN is required".into()))?;
            if !draftmill_auth::verify_pin(current, existing) {
                return Err(ApiError::forbidden("current PIN is wrong"));
            }
        }
        None => {
            let password = body
                .password
                .as_deref()
                .ok_or_else(|| ApiError::BadRequest("password is required".into()))?;
            if !draftmill_auth::verify_password(password, &principal.password_hash) {
                return Err(ApiError::Unauthorized("password is wrong".into()));
            }
        }
    }

    let hash = draftmill_auth::hash_pin(&body.new_pin).map_err(ApiError::internal)?;
    state.store.set_pin_hash(principal.id, &hash).await?;
    Ok(Json(Envelope::message("PIN updated")))
}

/// `GET /api/auth/pin-status`
pub async fn pin_status(
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<Envelope>, ApiError> {
    Ok(Json(Envelope::ok(json!({
        "hasPinConfigured": principal.pin_hash.is_some(),
    }))))
}
