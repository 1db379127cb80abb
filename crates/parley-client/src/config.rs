//! Client configuration.
//!
//! Every field has a serde default so a partial config (or none at all)
//! yields a working client pointed at a local backend.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the session client and the chat stream.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the backend API, including the `/api` prefix.
    #[serde(default = "ClientConfig::default_base_url")]
    pub base_url: String,

    /// Timeout for plain request/response calls, in seconds.
    #[serde(default = "ClientConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Maximum silence on an open chat stream before it fails, in seconds.
    #[serde(default = "ClientConfig::default_idle_timeout")]
    pub idle_timeout_seconds: u64,

    /// Capacity of the channel between the stream pump and the controller.
    #[serde(default = "ClientConfig::default_channel_capacity")]
    pub channel_capacity: usize,
}

impl ClientConfig {
    fn default_base_url() -> String {
        "http://localhost:8000/api".to_string()
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    const fn default_idle_timeout() -> u64 {
        120
    }

    const fn default_channel_capacity() -> usize {
        128
    }

    /// Create a config for the given base URL with all other fields defaulted.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Get the stream idle timeout as a `Duration`.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            request_timeout_seconds: Self::default_request_timeout(),
            idle_timeout_seconds: Self::default_idle_timeout(),
            channel_capacity: Self::default_channel_capacity(),
        }
    }
}
