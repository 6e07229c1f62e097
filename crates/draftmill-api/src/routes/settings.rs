//! Credential management endpoints.

use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use draftmill_providers::{FirecrawlClient, OpenRouterClient, SupabaseClient};
use draftmill_store::PrincipalStore;
use draftmill_types::{CredentialKind, CredentialSlot, Principal};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::{ApiError, AppState, AuthPrincipal, ClientIp, Envelope};

/// Consecutive PIN failures before an (IP, principal) pair is blocked.
const PIN_BLOCK_THRESHOLD: u32 = draftmill_auth::PIN_MAX_ATTEMPTS;

/// `GET /api/settings/api-keys[/masked]` — masked value, validity, and
/// last-checked instant per credential.
pub async fn masked_credentials(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<Json<Envelope>, ApiError> {
    let mut view = serde_json::Map::new();
    for kind in CredentialKind::ALL {
        let slot = principal.credentials.get(kind);
        let masked = slot.ciphertext.as_deref().and_then(|ciphertext| {
            match state.vault.decrypt(ciphertext) {
                Ok(plain) => Some(draftmill_encrypt::mask(&plain)),
                Err(e) => {
                    warn!(kind = %kind, error = %e, "stored credential failed to decrypt");
                    None
                }
            }
        });
        view.insert(
            kind.as_str().to_string(),
            json!({
                "configured": slot.is_set(),
                "masked": masked,
                "valid": slot.valid,
                "lastChecked": slot.last_checked,
            }),
        );
    }
    Ok(Json(Envelope::ok(serde_json::Value::Object(view))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPinBody {
    #[serde(default)]
    pin: String,
}

/// `POST /api/settings/api-keys/verify-pin`
///
/// Five consecutive failures from one (IP, principal) pair block further
/// verification until a success from elsewhere clears the counter; a
/// blocked pair fails even with the correct PIN.
pub async fn verify_pin(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    ip: ClientIp,
    Json(body): Json<VerifyPinBody>,
) -> Result<Json<Envelope>, ApiError> {
    check_pin(&state, &principal, &ip, Some(&body.pin)).await?;
    Ok(Json(Envelope::message("PIN verified")))
}

/// Shared PIN gate used by verification and credential writes.
///
/// No-op when the principal has no PIN configured.
async fn check_pin(
    state: &AppState,
    principal: &Principal,
    ip: &ClientIp,
    pin: Option<&str>,
) -> Result<(), ApiError> {
    let Some(pin_hash) = principal.pin_hash.as_deref() else {
        return Ok(());
    };

    let record = state.store.pin_attempt(&ip.0, principal.id).await?;
    if record.as_ref().is_some_and(|r| r.blocked) {
        return Err(ApiError::Forbidden {
            error: "PIN verification blocked".into(),
            is_blocked: Some(true),
            attempts_remaining: Some(0),
        });
    }

    let pin = pin.ok_or_else(|| ApiError::forbidden("PIN is required"))?;
    if draftmill_auth::verify_pin(pin, pin_hash) {
        state.store.clear_pin_attempts(&ip.0, principal.id).await?;
        return Ok(());
    }

    let updated = state
        .store
        .increment_pin_attempt(&ip.0, principal.id, PIN_BLOCK_THRESHOLD)
        .await?;
    Err(ApiError::Forbidden {
        error: "wrong PIN".into(),
        is_blocked: Some(updated.blocked),
        attempts_remaining: Some(PIN_BLOCK_THRESHOLD.saturating_sub(updated.attempts)),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCredentialBody {
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    pin: Option<String>,
}

/// `PUT /api/settings/api-keys/{kind}` — encrypt and store a credential.
/// PIN-gated when the principal has a PIN configured.
pub async fn store_credential(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    ip: ClientIp,
    Path(kind): Path<String>,
    Json(body): Json<StoreCredentialBody>,
) -> Result<Json<Envelope>, ApiError> {
    let kind = CredentialKind::parse(&kind).ok_or(ApiError::NotFound)?;
    if body.api_key.trim().is_empty() {
        return Err(ApiError::BadRequest("apiKey is required".into()));
    }
    check_pin(&state, &principal, &ip, body.pin.as_deref()).await?;

    let ciphertext = state
        .vault
        .encrypt(body.api_key.trim())
        .map_err(ApiError::internal)?;
    let slot = CredentialSlot {
        ciphertext: Some(ciphertext),
        valid: None,
        last_checked: None,
    };
    state.store.set_credential(principal.id, kind, &slot).await?;
    Ok(Json(Envelope::message(format!("{kind} credential stored"))))
}

/// `POST /api/settings/api-keys/{kind}/test` — call the provider's
/// ping-style endpoint and persist the verdict.
pub async fn test_credential(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(kind): Path<String>,
) -> Result<Json<Envelope>, ApiError> {
    let kind = CredentialKind::parse(&kind).ok_or(ApiError::NotFound)?;
    let slot = principal.credentials.get(kind);
    let ciphertext = slot
        .ciphertext
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{kind} credential is not set")))?;
    let key = state.vault.decrypt(ciphertext).map_err(ApiError::internal)?;

    let valid = match kind {
        CredentialKind::Firecrawl => {
            FirecrawlClient::new(&state.config.firecrawl_base_url, key)
                .ping()
                .await
                .is_ok()
        }
        CredentialKind::Openrouter => OpenRouterClient::new(
            &state.config.openrouter_base_url,
            key,
            &state.config.llm_model,
        )
        .ping()
        .await
        .is_ok(),
        CredentialKind::Supabase => SupabaseClient::new(
            &state.config.supabase_base_url,
            key,
            &state.config.openrouter_base_url,
            String::new(),
        )
        .ping()
        .await
        .is_ok(),
    };

    state
        .store
        .set_credential_validity(principal.id, kind, valid, Utc::now())
        .await?;
    Ok(Json(Envelope::ok(json!({ "valid": valid }))))
}
