//! Chat endpoint
//!
//! `POST /api/chat` with `{ baseUrl, apiKey, payload }`. The payload is
//! forwarded to `<baseUrl>/v1/chat/completions` untouched and the upstream
//! response (usually SSE) is relayed back chunk by chunk.

use std::error::Error as StdError;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::Response,
};
use http_body_util::LengthLimitError;
use serde::Deserialize;
use serde_json::value::RawValue;

use crate::{
    error::{AppError, AppResult},
    proxy::{CancellationBridge, ProxyRequest, RequestContext, UpstreamCall},
    routes::metrics::record_request,
    AppState,
};

/// Body the chat page posts
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRelayBody {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Opaque chat-completion request; never inspected
    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
}

impl ChatRelayBody {
    /// Parse the inbound body; an empty body counts as an empty object
    pub fn parse(body: &[u8]) -> AppResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| AppError::InvalidRequest(format!("Invalid JSON body: {}", e)))
    }
}

/// Relay a chat completion request
pub async fn chat(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> AppResult<Response<Body>> {
    let ctx = RequestContext::new("/api/chat").with_streaming(true);
    let bridge = CancellationBridge::new();

    let result = relay_chat(&state, request, &bridge, &ctx).await;
    match &result {
        Ok(_) => record_request("chat", "streaming", ctx.elapsed_secs()),
        Err(e) => record_request("chat", e.outcome(), ctx.elapsed_secs()),
    }
    result
}

async fn relay_chat(
    state: &AppState,
    request: Request,
    bridge: &CancellationBridge,
    ctx: &RequestContext,
) -> AppResult<Response<Body>> {
    let body = axum::body::to_bytes(request.into_body(), state.config.body_limit_bytes)
        .await
        .map_err(|e| body_read_error(e, state.config.body_limit_bytes, bridge, ctx))?;

    let body = ChatRelayBody::parse(&body).inspect_err(|e| ctx.log_rejected(&e.to_string()))?;
    let proxy_request = ProxyRequest::chat(body.base_url, body.api_key, body.payload);

    let call = UpstreamCall::build(&proxy_request, bridge.token())
        .inspect_err(|e| ctx.log_rejected(&e.to_string()))?;

    let ctx = ctx.clone().with_upstream_url(call.url.clone());
    ctx.log_request_start();

    state.relay.forward_streaming(call, bridge, &ctx).await
}

/// Map a failed body read to an error, firing the abort signal when the
/// client went away mid-upload.
fn body_read_error(
    err: axum::Error,
    limit: usize,
    bridge: &CancellationBridge,
    ctx: &RequestContext,
) -> AppError {
    if is_length_limit(&err) {
        let message = format!("Request body exceeds {} bytes", limit);
        ctx.log_rejected(&message);
        return AppError::PayloadTooLarge(message);
    }

    ctx.log_client_abort("request_body");
    bridge.client_aborted();
    AppError::ClientAborted
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source = Some(err as &(dyn StdError + 'static));
    while let Some(current) = source {
        if current.is::<LengthLimitError>() {
            return true;
        }
        source = current.source();
    }
    false
}
