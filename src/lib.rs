//! chat-relay - local relay for OpenAI-compatible chat APIs
//!
//! Lets a static chat page served from localhost call a remote
//! OpenAI-compatible API without exposing the API key to the page's origin or
//! tripping over CORS. Responses, including SSE streams, are relayed as they
//! arrive, and the upstream call is cancelled when the browser goes away.

pub mod config;
pub mod error;
pub mod proxy;
pub mod routes;

use std::time::{Duration, Instant};

use anyhow::Result;

pub use crate::config::Config;
pub use crate::proxy::{CancellationBridge, RelayState, StreamRelay};

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    pub start_time: Instant,
    /// Issues upstream calls; wraps the pooled HTTP client
    pub relay: StreamRelay,
}

impl AppState {
    /// Create a new application state
    pub fn new(config: Config) -> Result<Self> {
        // No overall timeout: chat streams stay open as long as the model talks
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(16)
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()?;

        Ok(Self::with_client(config, http_client))
    }

    /// Create state around an existing HTTP client
    pub fn with_client(config: Config, http_client: reqwest::Client) -> Self {
        let relay = StreamRelay::new(http_client, config.channel_capacity);

        Self {
            config,
            start_time: Instant::now(),
            relay,
        }
    }
}
