//! Error types for the chat stream pipeline.
//!
//! Failures are split by how far they reach: a [`ProtocolError`] only ever
//! costs one frame, while a [`TransportError`] or an upstream error frame
//! ends the whole stream session. User cancellation is not an error and has
//! no variant here.

use std::time::Duration;

use thiserror::Error;

/// The chat request could not be opened or its body could not be read.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The backend answered with a non-success status; no body was streamed.
    #[error("chat request failed with status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The request could not be sent or the body read failed mid-stream.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The body went quiet: no chunk arrived within the idle timeout.
    #[error("no data received for {}s", .0.as_secs())]
    Idle(Duration),
}

/// A `data: ` line whose payload is not valid JSON.
///
/// Dropped at the frame level; never terminal.
#[derive(Debug, Error)]
#[error("malformed frame payload {payload:?}: {source}")]
pub struct ProtocolError {
    /// The raw payload after the `data: ` prefix.
    pub payload: String,
    /// The JSON error.
    #[source]
    pub source: serde_json::Error,
}

/// Terminal failure of a stream session.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Opening or reading the stream failed.
    #[error(transparent)]
    Transport(TransportError),

    /// The backend sent an explicit error frame.
    #[error("{0}")]
    Upstream(String),

    /// No bytes arrived within the configured idle timeout.
    #[error("no data received for {}s", .0.as_secs())]
    IdleTimeout(Duration),
}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Idle(after) => Self::IdleTimeout(after),
            other => Self::Transport(other),
        }
    }
}

/// Shown when the backend fails a turn without saying why.
const GENERIC_FAILURE: &str = "Failed to get response";

impl StreamError {
    /// Short, user-facing description of the failure.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(TransportError::Status { status, .. }) => {
                format!("{GENERIC_FAILURE} (HTTP {status})")
            }
            Self::Transport(TransportError::Network(_)) => {
                format!("{GENERIC_FAILURE} (connection error)")
            }
            Self::Upstream(message) if message.trim().is_empty() => GENERIC_FAILURE.to_string(),
            Self::Upstream(message) => message.clone(),
            Self::IdleTimeout(_) | Self::Transport(TransportError::Idle(_)) => {
                "Response timed out".to_string()
            }
        }
    }
}
