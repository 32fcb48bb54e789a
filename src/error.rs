use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

/// Errors surfaced by the relay, from request validation through the upstream stream.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("The model `{0}` does not exist")]
    UnknownModel(String),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Unauthorized: {0}")]
    Auth(String),
    #[error("Upstream transport error: {0}")]
    UpstreamTransport(String),
    #[error("Upstream timed out after {0}s without data")]
    UpstreamTimeout(u64),
    #[error("Upstream protocol error: {0}")]
    UpstreamProtocol(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::UnknownModel(_) => StatusCode::NOT_FOUND,
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::Auth(_) => StatusCode::UNAUTHORIZED,
            RelayError::UpstreamTransport(_) | RelayError::UpstreamProtocol(_) => {
                StatusCode::BAD_GATEWAY
            }
            RelayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OpenAI `error.type` string.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::UnknownModel(_) | RelayError::Validation(_) => "invalid_request_error",
            RelayError::Auth(_) => "authentication_error",
            RelayError::UpstreamTransport(_)
            | RelayError::UpstreamTimeout(_)
            | RelayError::UpstreamProtocol(_) => "upstream_error",
            RelayError::Internal(_) => "server_error",
        }
    }

    /// OpenAI `error.code` string, when one applies.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            RelayError::UnknownModel(_) => Some("model_not_found"),
            RelayError::Auth(_) => Some("invalid_api_key"),
            RelayError::UpstreamTimeout(_) => Some("upstream_timeout"),
            _ => None,
        }
    }

    /// True for failures that happen before anything is sent upstream.
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// OpenAI-shaped error body.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": self.kind(),
                "code": self.code(),
            }
        })
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::UpstreamTransport(e.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Internal(format!("serialize error: {e}"))
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status(), axum::Json(self.to_json())).into_response()
    }
}
