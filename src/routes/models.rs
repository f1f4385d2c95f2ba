//! Models endpoint
//!
//! `GET /api/models?baseUrl=...` with the credential in `x-api-key`. The
//! upstream model listing is passed through unchanged, including error
//! statuses.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::QueryRejection, Query, State},
    http::{HeaderMap, Response},
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{AppError, AppResult},
    proxy::{headers::API_KEY_HEADER, ProxyRequest, RequestContext, UpstreamCall},
    routes::metrics::record_request,
    AppState,
};

/// Query string of the models endpoint
#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    #[serde(rename = "baseUrl")]
    pub base_url: Option<String>,
}

/// List the models offered by the upstream API
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ModelsQuery>, QueryRejection>,
    headers: HeaderMap,
) -> AppResult<Response<Body>> {
    let ctx = RequestContext::new("/api/models");

    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            let e = AppError::InvalidRequest(format!(
                "Invalid query string: {}",
                rejection.body_text()
            ));
            ctx.log_rejected(&e.to_string());
            record_request("models", e.outcome(), ctx.elapsed_secs());
            return Err(e);
        }
    };

    let credential = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let request = ProxyRequest::models(query.base_url, credential);

    let call = match UpstreamCall::build(&request, CancellationToken::new()) {
        Ok(call) => call,
        Err(e) => {
            ctx.log_rejected(&e.to_string());
            record_request("models", e.outcome(), ctx.elapsed_secs());
            return Err(e);
        }
    };

    let ctx = ctx.with_upstream_url(call.url.clone());
    ctx.log_request_start();

    let result = state.relay.forward_buffered(call, &ctx).await;

    let outcome = match &result {
        Ok(_) => "passthrough",
        Err(e) => e.outcome(),
    };
    record_request("models", outcome, ctx.elapsed_secs());

    result
}
