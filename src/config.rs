//! Configuration management for the relay
//!
//! Configuration is loaded from environment variables.

use anyhow::{Context, Result};
use std::env;

/// Default inbound body limit, matching what browsers post for long chats
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Directory holding the static chat page
    pub static_dir: String,

    /// Maximum accepted size of an inbound request body
    pub body_limit_bytes: usize,

    /// Connect timeout for upstream calls (in seconds)
    pub connect_timeout_seconds: u64,
    /// Number of chunks buffered between the upstream reader and the client
    pub channel_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("RELAY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("RELAY_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("Invalid RELAY_PORT")?,

            static_dir: env::var("RELAY_STATIC_DIR").unwrap_or_else(|_| "public".to_string()),

            body_limit_bytes: env::var("RELAY_BODY_LIMIT_BYTES")
                .map(|v| v.parse().context("Invalid RELAY_BODY_LIMIT_BYTES"))
                .unwrap_or(Ok(DEFAULT_BODY_LIMIT_BYTES))?,

            connect_timeout_seconds: env::var("RELAY_CONNECT_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid RELAY_CONNECT_TIMEOUT_SECONDS")?,
            channel_capacity: env::var("RELAY_CHANNEL_CAPACITY")
                .unwrap_or_else(|_| "32".to_string())
                .parse::<usize>()
                .context("Invalid RELAY_CHANNEL_CAPACITY")?
                .max(1),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            static_dir: "public".to_string(),
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            connect_timeout_seconds: 30,
            channel_capacity: 32,
        }
    }
}
