//! API error handling

use crate::auth::SessionError;
use axum::{
    http::{header::InvalidHeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn session_expired() -> Self {
        Self::new("SESSION_EXPIRED", "Session expired, please sign in again")
    }

    pub fn invalid_credentials() -> Self {
        Self::new("INVALID_CREDENTIALS", "Invalid email or password")
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    /// Refresh failed for any reason; the client must sign in again
    SessionExpired,
    InvalidCredentials,
    Conflict(String),
    StorageUnavailable(String),
    ProviderUnavailable(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ApiError::bad_request(msg)),
            AppError::SessionExpired => (StatusCode::UNAUTHORIZED, ApiError::session_expired()),
            AppError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, ApiError::invalid_credentials())
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ApiError::new("ACCOUNT_EXISTS", msg)),
            AppError::StorageUnavailable(msg) => {
                tracing::error!(error = %msg, "Storage unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiError::new("STORAGE_UNAVAILABLE", "Service temporarily unavailable"),
                )
            }
            AppError::ProviderUnavailable(msg) => {
                tracing::error!(error = %msg, "Identity provider unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiError::new(
                        "PROVIDER_UNAVAILABLE",
                        "Identity provider temporarily unavailable",
                    ),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, ApiError::internal_error())
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Unauthorized => AppError::SessionExpired,
            SessionError::InvalidCredentials => AppError::InvalidCredentials,
            SessionError::AccountExists => {
                AppError::Conflict("An account with this email already exists".to_string())
            }
            SessionError::Validation(msg) => AppError::BadRequest(msg),
            SessionError::StorageUnavailable(msg) => AppError::StorageUnavailable(msg),
            SessionError::ProviderUnavailable(msg) => AppError::ProviderUnavailable(msg),
            SessionError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<InvalidHeaderValue> for AppError {
    fn from(err: InvalidHeaderValue) -> Self {
        AppError::Internal(format!("invalid header value: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_session_errors_map_to_status() {
        let cases = [
            (SessionError::Unauthorized, StatusCode::UNAUTHORIZED, "SESSION_EXPIRED"),
            (
                SessionError::InvalidCredentials,
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
            ),
            (SessionError::AccountExists, StatusCode::CONFLICT, "ACCOUNT_EXISTS"),
            (
                SessionError::Validation("bad".to_string()),
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
            ),
            (
                SessionError::StorageUnavailable("down".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
                "STORAGE_UNAVAILABLE",
            ),
            (
                SessionError::Internal("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), status);
            assert_eq!(body_json(response).await["code"], code);
        }
    }

    #[tokio::test]
    async fn test_internal_details_not_exposed() {
        let response =
            AppError::StorageUnavailable("password=hunter2 host=db".to_string()).into_response();
        let json = body_json(response).await;

        assert!(json.get("details").is_none());
        assert!(!json.to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn test_session_expired_message_is_generic() {
        let json = body_json(AppError::SessionExpired.into_response()).await;
        assert_eq!(json["message"], "Session expired, please sign in again");
    }
}
