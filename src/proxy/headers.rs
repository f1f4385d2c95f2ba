//! Header utilities for upstream calls
//!
//! The browser never sends its own headers upstream. Outbound calls carry only
//! the bearer credential and, for JSON bodies, a content type.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::{AppError, AppResult};

/// Inbound header carrying the credential for the models endpoint
pub const API_KEY_HEADER: &str = "x-api-key";

/// Build the headers for an upstream call
///
/// Fails with `InvalidRequest` if the credential contains bytes that cannot be
/// carried in a header value (e.g. a pasted newline).
pub fn build_upstream_headers(credential: &str, json_body: bool) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();

    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", credential))
        .map_err(|_| AppError::InvalidRequest("Invalid apiKey".to_string()))?;
    bearer.set_sensitive(true);
    headers.insert(AUTHORIZATION, bearer);

    if json_body {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    Ok(headers)
}

/// Content type to copy from an upstream response, if it sent one
pub fn passthrough_content_type(upstream: &HeaderMap) -> Option<HeaderValue> {
    upstream
        .get(CONTENT_TYPE)
        .filter(|value| !value.is_empty())
        .cloned()
}
