//! Request extractors: bearer-token identity and client IP.

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use draftmill_store::PrincipalStore;
use draftmill_types::Principal;
use std::net::SocketAddr;

use crate::{ApiError, AppState};

/// The authenticated principal, extracted from the `Authorization:
/// Bearer` header. Handlers taking this parameter reject anonymous
/// requests with 401.
pub struct AuthPrincipal(pub Principal);

impl FromRequestParts<AppState> for AuthPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthorized("malformed authorization header".into()))?;
        let claims = state
            .signer
            .verify(token)
            .map_err(|_| ApiError::Unauthorized("invalid or expired token".into()))?;
        let principal = state
            .store
            .principal_by_id(claims.sub)
            .await
            .map_err(|_| ApiError::Unauthorized("unknown principal".into()))?;
        Ok(AuthPrincipal(principal))
    }
}

/// The request's source IP.
///
/// The transport peer address with any IPv6-mapped-IPv4 prefix stripped;
/// in trusted-proxy mode the first hop of `x-forwarded-for` wins.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.config.trusted_proxy
            && let Some(forwarded) = parts
                .headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
            && let Some(first_hop) = forwarded.split(',').next()
        {
            let hop = first_hop.trim();
            if !hop.is_empty() {
                return Ok(ClientIp(strip_mapped_prefix(hop)));
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(ClientIp(strip_mapped_prefix(&peer)))
    }
}

/// `::ffff:203.0.113.9` reads as `203.0.113.9`.
fn strip_mapped_prefix(ip: &str) -> String {
    ip.strip_prefix("::ffff:").unwrap_or(ip).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_ipv4_prefix_is_stripped() {
        assert_eq!(strip_mapped_prefix("::ffff:203.0.113.9"), "203.0.113.9");
        assert_eq!(strip_mapped_prefix("203.0.113.9"), "203.0.113.9");
        assert_eq!(strip_mapped_prefix("2001:db8::1"), "2001:db8::1");
    }
}
