//! Error types for the relay
//!
//! Every error the relay reports itself is rendered as a flat
//! `{"error": "<message>"}` JSON body, which is what the chat page reads.
//! Upstream 4xx/5xx responses are not errors here; they are passed through.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// A required field was missing or unusable; detected before any upstream I/O
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    /// The outbound call failed at the connection or transport level
    #[error("{0}")]
    UpstreamTransport(String),

    /// The local client went away before a response could be handed back
    #[error("Client closed request")]
    ClientAborted,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Status code this error is reported with
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            // nginx's "client closed request"; nobody is left to read it
            AppError::ClientAborted => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }
            AppError::UpstreamTransport(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Label used for the outcome metric
    pub fn outcome(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) | AppError::PayloadTooLarge(_) => "invalid_request",
            AppError::UpstreamTransport(_) => "transport_error",
            AppError::ClientAborted => "aborted",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::UpstreamTransport(transport_message(&err))
    }
}

/// Render a reqwest error including its source chain.
///
/// reqwest's top-level message ("error sending request for url ...") hides
/// the useful part (DNS failure, connection refused) in the source chain.
pub fn transport_message(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match &self {
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
