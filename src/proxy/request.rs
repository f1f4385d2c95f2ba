//! Upstream request building
//!
//! Turns what the browser sent into a fully specified outbound call. All
//! validation happens here, before any network I/O.

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::value::RawValue;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{AppError, AppResult},
    proxy::{endpoint::resolve, headers::build_upstream_headers},
};

/// Which upstream operation a proxied call targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Models,
    ChatCompletions,
}

impl TargetKind {
    /// Logical path, resolved against the base URL
    pub fn path_suffix(self) -> &'static str {
        match self {
            TargetKind::Models => "/models",
            TargetKind::ChatCompletions => "/chat/completions",
        }
    }

    pub fn method(self) -> Method {
        match self {
            TargetKind::Models => Method::GET,
            TargetKind::ChatCompletions => Method::POST,
        }
    }

    /// Error text the chat page shows when inputs are missing
    pub fn missing_input_message(self) -> &'static str {
        match self {
            TargetKind::Models => "Missing baseUrl or apiKey",
            TargetKind::ChatCompletions => "Missing baseUrl/apiKey/payload",
        }
    }
}

/// What the browser asked for, before validation
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub base_url: String,
    pub credential: String,
    /// Forwarded as-is; never inspected
    pub payload: Option<Box<RawValue>>,
    pub target: TargetKind,
}

impl ProxyRequest {
    /// List-models request
    pub fn models(base_url: Option<String>, credential: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_default(),
            credential: credential.unwrap_or_default(),
            payload: None,
            target: TargetKind::Models,
        }
    }

    /// Chat-completion request
    pub fn chat(
        base_url: Option<String>,
        credential: Option<String>,
        payload: Option<Box<RawValue>>,
    ) -> Self {
        Self {
            base_url: base_url.unwrap_or_default(),
            credential: credential.unwrap_or_default(),
            payload,
            target: TargetKind::ChatCompletions,
        }
    }
}

/// Fully specified outbound call
#[derive(Debug)]
pub struct UpstreamCall {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Set when the client goes away; the call stops issuing I/O once set
    pub token: CancellationToken,
}

impl UpstreamCall {
    /// Validate a proxy request and build the outbound call for it
    pub fn build(request: &ProxyRequest, token: CancellationToken) -> AppResult<Self> {
        let missing = || AppError::InvalidRequest(request.target.missing_input_message().to_string());

        if request.base_url.is_empty() || request.credential.is_empty() {
            return Err(missing());
        }

        let body = match request.target {
            TargetKind::Models => None,
            TargetKind::ChatCompletions => {
                let payload = request.payload.as_ref().ok_or_else(missing)?;
                Some(Bytes::copy_from_slice(payload.get().as_bytes()))
            }
        };

        let headers = build_upstream_headers(&request.credential, body.is_some())?;

        Ok(Self {
            url: resolve(&request.base_url, request.target.path_suffix()),
            method: request.target.method(),
            headers,
            body,
            token,
        })
    }

    /// Size of the outbound body, for logging
    pub fn body_len(&self) -> Option<usize> {
        self.body.as_ref().map(Bytes::len)
    }
}
