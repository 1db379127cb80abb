//! Stream transport for the chat endpoint.
//!
//! Opens `POST {base_url}/chat` and hands back the response body as a stream
//! of byte chunks. Chunk boundaries are whatever the network produced; the
//! [`frame`](crate::frame) module reassembles lines.
//!
//! Cancellation is cooperative: [`cancellable`] ends a byte stream as soon as
//! its token fires, which drops the response and aborts the request.
//! [`idle_limited`] fails a body that stops producing bytes.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use parley_core::{ChatRequest, SessionId};

use crate::config::ClientConfig;
use crate::error::TransportError;

/// Raw response body of a chat request.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Something that can open a chat stream for one user turn.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Send `text` as the next turn of `session_id` and return the reply body.
    ///
    /// The text is passed through as-is; validating it is the caller's job.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Status`] on a non-success status, before any
    /// body byte is read, and [`TransportError::Network`] if the request
    /// cannot be sent.
    async fn open(&self, session_id: SessionId, text: &str) -> Result<ByteStream, TransportError>;
}

/// [`StreamTransport`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    chat_url: String,
}

impl HttpTransport {
    /// Create a transport for the backend described by `config`.
    ///
    /// Only the connect phase is bounded by the request timeout; an open
    /// stream is bounded by the controller's idle timeout instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            chat_url: format!("{}/chat", config.base_url.trim_end_matches('/')),
        })
    }

    /// URL the transport posts to.
    #[must_use]
    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }
}

#[async_trait]
impl StreamTransport for HttpTransport {
    async fn open(&self, session_id: SessionId, text: &str) -> Result<ByteStream, TransportError> {
        let request = ChatRequest {
            session_id,
            text: text.to_string(),
        };

        let response = self
            .client
            .post(&self.chat_url)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        tracing::debug!(session_id = %session_id, status = status.as_u16(), "Chat stream opened");

        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(TransportError::from)),
        ))
    }
}

/// Wrap a byte stream so it ends, without error, once `token` is cancelled.
///
/// A pull that is pending when the token fires resolves to `None`.
#[must_use]
pub fn cancellable(stream: ByteStream, token: CancellationToken) -> ByteStream {
    Box::pin(stream.take_until(token.cancelled_owned()))
}

/// Wrap a byte stream so it fails with [`TransportError::Idle`] when no chunk
/// arrives within `limit` of the previous one.
///
/// The deadline restarts on every chunk, however small. The stream ends after
/// the idle error.
#[must_use]
pub fn idle_limited(stream: ByteStream, limit: Duration) -> ByteStream {
    Box::pin(futures::stream::unfold(Some(stream), move |state| async move {
        let mut stream = state?;
        match tokio::time::timeout(limit, stream.next()).await {
            Ok(Some(chunk)) => Some((chunk, Some(stream))),
            Ok(None) => None,
            Err(_) => Some((Err(TransportError::Idle(limit)), None)),
        }
    }))
}
