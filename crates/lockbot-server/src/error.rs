//! Error types for the HTTP facades.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lockbot_core::{LockError, TokenError};
use serde::Serialize;
use tracing::error;

use crate::handlers::api::LockBody;

/// Application-level errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid request signature")]
    InvalidSignature,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Slack OAuth exchange failed: {0}")]
    OAuth(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            error: String,
            code: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            lock: Option<LockBody>,
        }

        let (status, code) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::InvalidSignature => (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Lock(e) => match e {
                LockError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                LockError::Conflict(_) => (StatusCode::CONFLICT, "LOCK_CONFLICT"),
                LockError::NotFound => (StatusCode::NOT_FOUND, "LOCK_NOT_FOUND"),
                LockError::Forbidden { .. } => (StatusCode::FORBIDDEN, "LOCK_FORBIDDEN"),
                LockError::StoreUnavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
                }
                LockError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
            },
            ApiError::Token(e) => match e {
                TokenError::NotInstalled(_) => (StatusCode::UNAUTHORIZED, "NOT_INSTALLED"),
                TokenError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN"),
                TokenError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                TokenError::StateToken(_) => (StatusCode::FORBIDDEN, "INVALID_STATE"),
                TokenError::StoreUnavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
                }
                TokenError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
            },
            ApiError::OAuth(_) => (StatusCode::BAD_GATEWAY, "OAUTH_ERROR"),
            ApiError::NotConfigured(_) => (StatusCode::SERVICE_UNAVAILABLE, "NOT_CONFIGURED"),
        };

        if status.is_server_error() {
            error!("{}", self);
        }

        let lock = match &self {
            ApiError::Lock(LockError::Conflict(current)) => Some(LockBody::from(current.as_ref())),
            _ => None,
        };

        let body = ErrorBody {
            error: self.to_string(),
            code,
            lock,
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use lockbot_core::{Lock, StateTokenError};

    fn status(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        let lock = Lock {
            team: "T1".into(),
            channel: "C1".into(),
            name: "deploy".into(),
            holder: "alice".into(),
            acquired_at: chrono::Utc::now(),
            expires_at: None,
            note: None,
        };

        assert_eq!(status(LockError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(LockError::Conflict(Box::new(lock))), StatusCode::CONFLICT);
        assert_eq!(status(LockError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status(LockError::Forbidden { holder: "bob".into() }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status(LockError::StoreUnavailable("slow".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(LockError::Store("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(TokenError::NotInstalled("T1".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status(TokenError::InvalidToken), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status(TokenError::StateToken(StateTokenError::Replayed)),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status(ApiError::OAuth("nope".into())), StatusCode::BAD_GATEWAY);
    }
}
