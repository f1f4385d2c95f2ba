//! Upstream endpoint resolution
//!
//! Users paste either `https://host` or `https://host/v1` into the chat page;
//! both must land on the same `/v1/...` endpoint.

/// API version segment every OpenAI-compatible endpoint lives under
pub const API_VERSION_SEGMENT: &str = "/v1";

/// Trim whitespace and trailing slashes from a user-supplied base URL
pub fn normalize_base_url(base_url: &str) -> &str {
    base_url.trim().trim_end_matches('/')
}

/// Resolve a logical path suffix (e.g. `/models`) against a base URL.
///
/// The version segment appears exactly once in the result: a `/v1` already
/// ending the base is reused, and a leading `/v1` on the suffix is dropped.
/// No validation happens here; an empty base produces a relative path that
/// the HTTP client rejects later.
pub fn resolve(base_url: &str, path_suffix: &str) -> String {
    let base = normalize_base_url(base_url);
    let suffix = path_suffix
        .strip_prefix(API_VERSION_SEGMENT)
        .unwrap_or(path_suffix);

    if base.ends_with(API_VERSION_SEGMENT) {
        format!("{}{}", base, suffix)
    } else {
        format!("{}{}{}", base, API_VERSION_SEGMENT, suffix)
    }
}
