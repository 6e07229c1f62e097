//! The sentinel error type controllers convert everything into.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use draftmill_store::StoreError;
use tracing::{error, warn};

use crate::envelope::Envelope;

/// An error with an HTTP status, rendered as the JSON envelope.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    /// 403 carrying the PIN-block bookkeeping.
    #[error("{error}")]
    Forbidden {
        error: String,
        is_blocked: Option<bool>,
        attempts_remaining: Option<u32>,
    },
    /// Missing id or foreign owner; indistinguishable by design.
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("internal error")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
    pub fn forbidden(error: impl Into<String>) -> Self {
        ApiError::Forbidden {
            error: error.into(),
            is_blocked: None,
            attempts_remaining: None,
        }
    }

    pub fn internal<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ApiError::Internal(Box::new(source))
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::Duplicate(key) => ApiError::Conflict(format!("duplicate: {key}")),
            other => ApiError::Internal(Box::new(other)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let envelope = match &self {
            ApiError::Internal(source) => {
                // Generic message to the client; the details go to the
                // server log.
                error!(error = %source, "internal error");
                Envelope::fail("internal server error")
            }
            ApiError::Forbidden {
                error,
                is_blocked,
                attempts_remaining,
            } => {
                warn!(error = %error, "forbidden");
                Envelope {
                    is_blocked: *is_blocked,
                    attempts_remaining: *attempts_remaining,
                    ..Envelope::fail(error.clone())
                }
            }
            other => {
                warn!(status = status.as_u16(), error = %other, "request rejected");
                Envelope::fail(other.to_string())
            }
        };
        (status, Json(envelope)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_404() {
        let err: ApiError = StoreError::NotFound.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn store_duplicate_maps_to_409() {
        let err: ApiError = StoreError::Duplicate("email".to_string()).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn internal_hides_detail() {
        let err = ApiError::internal(StoreError::Database("connection refused".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // The public display never leaks the source.
        assert_eq!(err.to_string(), "internal error");
    }
}
