//! Request logging utilities for proxied calls
//!
//! Structured logging with a short correlation ID so one relayed call can be
//! followed from the inbound request to the end of the stream. Credentials are
//! never logged.

use std::time::Instant;
use tracing::{debug, error, info, warn, Span};
use uuid::Uuid;

use crate::proxy::cancel::RelayState;

/// Context for tracking a proxied call through the relay
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request (for log correlation)
    pub trace_id: String,
    /// When the request started
    pub start_time: Instant,
    /// Local endpoint that received the request
    pub endpoint: String,
    /// Resolved upstream URL, once known
    pub upstream_url: Option<String>,
    /// Whether the response body is relayed incrementally
    pub streaming: bool,
}

impl RequestContext {
    /// Create a new request context
    pub fn new(endpoint: &str) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string()[..8].to_string(),
            start_time: Instant::now(),
            endpoint: endpoint.to_string(),
            upstream_url: None,
            streaming: false,
        }
    }

    pub fn with_upstream_url(mut self, url: impl Into<String>) -> Self {
        self.upstream_url = Some(url.into());
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }

    /// Elapsed time in seconds, for duration metrics
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn log_request_start(&self) {
        info!(
            trace_id = %self.trace_id,
            endpoint = %self.endpoint,
            upstream_url = ?self.upstream_url,
            streaming = %self.streaming,
            "Request started"
        );
    }

    pub fn log_rejected(&self, reason: &str) {
        warn!(
            trace_id = %self.trace_id,
            endpoint = %self.endpoint,
            reason = %reason,
            "Request rejected before upstream call"
        );
    }

    pub fn log_upstream_request(&self, method: &str, body_size: Option<usize>) {
        debug!(
            trace_id = %self.trace_id,
            method = %method,
            upstream_url = ?self.upstream_url,
            body_size = ?body_size,
            elapsed_ms = %self.elapsed_ms(),
            "Sending request to upstream"
        );
    }

    pub fn log_upstream_response(&self, status: u16, content_type: Option<&str>) {
        info!(
            trace_id = %self.trace_id,
            endpoint = %self.endpoint,
            status = %status,
            content_type = ?content_type,
            elapsed_ms = %self.elapsed_ms(),
            "Response received from upstream"
        );
    }

    /// Log how a relayed stream ended
    pub fn log_stream_ended(&self, state: RelayState, chunks: usize, bytes: usize) {
        match state {
            RelayState::Failed => warn!(
                trace_id = %self.trace_id,
                endpoint = %self.endpoint,
                state = %state.as_str(),
                chunks = %chunks,
                bytes = %bytes,
                elapsed_ms = %self.elapsed_ms(),
                "Streaming response truncated"
            ),
            _ => info!(
                trace_id = %self.trace_id,
                endpoint = %self.endpoint,
                state = %state.as_str(),
                chunks = %chunks,
                bytes = %bytes,
                elapsed_ms = %self.elapsed_ms(),
                "Streaming response ended"
            ),
        }
    }

    /// Client went away; logged at info because nobody is owed a response
    pub fn log_client_abort(&self, detected_by: &str) {
        info!(
            trace_id = %self.trace_id,
            endpoint = %self.endpoint,
            detected_by = %detected_by,
            elapsed_ms = %self.elapsed_ms(),
            "Client disconnected, cancelling upstream call"
        );
    }

    pub fn log_stream_error(&self, error: &str) {
        warn!(
            trace_id = %self.trace_id,
            endpoint = %self.endpoint,
            elapsed_ms = %self.elapsed_ms(),
            error = %error,
            "Upstream stream failed after headers were sent"
        );
    }

    pub fn log_connection_error(&self, error: &str) {
        error!(
            trace_id = %self.trace_id,
            upstream_url = ?self.upstream_url,
            elapsed_ms = %self.elapsed_ms(),
            error = %error,
            "Connection to upstream failed"
        );
    }

    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "relay",
            trace_id = %self.trace_id,
            endpoint = %self.endpoint,
            streaming = %self.streaming,
        )
    }
}
