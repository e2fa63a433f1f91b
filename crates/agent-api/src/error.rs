//! Agent RPC errors

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors of the agent RPC, on both ends of the wire.
#[derive(Debug, Error)]
pub enum AgentApiError {
    /// Connection, TLS or body transfer failure, or an undecodable reply
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A single attempt exceeded its deadline
    #[error("request timed out")]
    Timeout,

    /// Controller answered with a 5xx status
    #[error("controller unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    /// Controller refused the request (4xx)
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Server record does not exist (controller side)
    #[error("server {0} not found")]
    NotFound(String),

    /// Request is malformed (controller side)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Any other controller-side failure
    #[error("internal error: {0}")]
    Internal(String),

    /// Retry budget spent
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<AgentApiError> },

    /// Caller shut down while waiting
    #[error("cancelled")]
    Cancelled,

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentApiError {
    /// Transport and availability failures are worth retrying; application
    /// rejections and unreadable replies are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => !e.is_decode(),
            Self::Timeout | Self::Unavailable { .. } => true,
            _ => false,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) | Self::Serialization(_) => StatusCode::BAD_REQUEST,
            Self::Rejected { status, .. } | Self::Unavailable { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error body returned by the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for AgentApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
