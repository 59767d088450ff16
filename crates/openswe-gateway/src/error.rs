//! Error types for openswe-gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use openswe_core::CoreError;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for gateway handlers.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Port parameter outside 1-65535 or not a number
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// Unknown sandbox id
    #[error("sandbox not found: {0}")]
    NotFound(String),

    /// Malformed request
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Nothing listens on the upstream port
    #[error("connection refused on port {port}")]
    ConnectionRefused {
        /// Host port that refused
        port: u16,
    },

    /// Any other upstream transport failure
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Error from openswe-core
    #[error(transparent)]
    Core(#[from] CoreError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl GatewayError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPort(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ConnectionRefused { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Core(e) => match e {
                CoreError::NotFound(_) => StatusCode::NOT_FOUND,
                CoreError::InvalidConfig(_) | CoreError::Json(_) => StatusCode::BAD_REQUEST,
                CoreError::Exec(openswe_exec::ExecError::InvalidCommand(_)) => {
                    StatusCode::BAD_REQUEST
                }
                CoreError::InvalidState { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn hint(&self) -> Option<String> {
        match self {
            Self::ConnectionRefused { port } => Some(format!(
                "No server is listening on port {port}. Start your dev server and try again."
            )),
            _ => None,
        }
    }
}

impl From<openswe_exec::ExecError> for GatewayError {
    fn from(e: openswe_exec::ExecError) -> Self {
        Self::Core(CoreError::Exec(e))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }
        let body = ErrorBody {
            error: self.to_string(),
            hint: self.hint(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::InvalidPort("0".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(GatewayError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            GatewayError::ConnectionRefused { port: 3000 }.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(GatewayError::Upstream("reset".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            GatewayError::from(CoreError::NotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::from(CoreError::SandboxCreation("no image".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_refused_has_hint() {
        let hint = GatewayError::ConnectionRefused { port: 5173 }.hint().unwrap();
        assert!(hint.contains("5173"));
        assert!(hint.contains("Start your dev server"));
        assert!(GatewayError::Upstream("x".into()).hint().is_none());
    }
}
