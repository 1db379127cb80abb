//! HTTP client for the session REST API.
//!
//! This module provides a typed client for the plain request/response side of
//! the backend: session CRUD, history, summaries and note export. None of
//! these calls stream.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use parley_core::{
    ApiErrorResponse, CreateSessionResponse, DeleteSessionResponse, HealthResponse,
    ListSessionsResponse, Message, MessagesResponse, NotionPage, Session, SessionId, Summary,
};

use crate::config::ClientConfig;

/// Error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// The body's `detail` text, or "Unknown error".
        message: String,
    },

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// Session operations the conversation layer depends on.
///
/// [`SessionClient`] is the production implementation; tests substitute an
/// in-memory store.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// List all sessions.
    async fn list_sessions(&self) -> Result<Vec<Session>, ClientError>;

    /// Create a new, empty session.
    async fn create_session(&self) -> Result<SessionId, ClientError>;

    /// Fetch one session.
    async fn get_session(&self, id: SessionId) -> Result<Session, ClientError>;

    /// Fetch the canonical message history of a session.
    async fn get_messages(&self, id: SessionId) -> Result<Vec<Message>, ClientError>;

    /// Summarize a session (the backend caches the result).
    async fn summarize(&self, id: SessionId) -> Result<Summary, ClientError>;

    /// Export a session's summary to the external note service.
    async fn save_to_notion(&self, id: SessionId) -> Result<NotionPage, ClientError>;

    /// Delete a session and its history.
    async fn delete_session(&self, id: SessionId) -> Result<(), ClientError>;
}

/// Client for the session REST API.
#[derive(Debug, Clone)]
pub struct SessionClient {
    client: Client,
    base_url: String,
}

impl SessionClient {
    /// Create a new session client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(Self::default_headers())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Headers sent with every request.
    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    /// Handle API error responses.
    async fn handle_error(response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();
        let message = match response.json::<ApiErrorResponse>().await {
            Ok(err) => err.detail,
            Err(_) => "Unknown error".to_string(),
        };
        ClientError::Api { status, message }
    }

    /// Check the status and decode a JSON body.
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        if !response.status().is_success() {
            return Err(Self::handle_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }

    // =========================================================================
    // Utility
    // =========================================================================

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check the backend health endpoint.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let url = format!("{}/healthz", self.base_url);
        let response = self.client.get(&url).send().await?;
        let body: HealthResponse = Self::decode(response).await?;
        Ok(body.ok)
    }
}

#[async_trait]
impl SessionApi for SessionClient {
    async fn list_sessions(&self) -> Result<Vec<Session>, ClientError> {
        let url = format!("{}/sessions", self.base_url);

        let response = self.client.get(&url).send().await?;
        let body: ListSessionsResponse = Self::decode(response).await?;

        Ok(body.sessions)
    }

    async fn create_session(&self) -> Result<SessionId, ClientError> {
        let url = format!("{}/sessions", self.base_url);

        let response = self.client.post(&url).send().await?;
        let body: CreateSessionResponse = Self::decode(response).await?;

        tracing::debug!(session_id = %body.id, "Session created");
        Ok(body.id)
    }

    async fn get_session(&self, id: SessionId) -> Result<Session, ClientError> {
        let url = format!("{}/sessions/{}", self.base_url, id);

        let response = self.client.get(&url).send().await?;
        Self::decode(response).await
    }

    async fn get_messages(&self, id: SessionId) -> Result<Vec<Message>, ClientError> {
        let url = format!("{}/sessions/{}/messages", self.base_url, id);

        let response = self.client.get(&url).send().await?;
        let body: MessagesResponse = Self::decode(response).await?;

        Ok(body.messages)
    }

    async fn summarize(&self, id: SessionId) -> Result<Summary, ClientError> {
        let url = format!("{}/sessions/{}/summarize", self.base_url, id);

        let response = self.client.post(&url).send().await?;
        Self::decode(response).await
    }

    async fn save_to_notion(&self, id: SessionId) -> Result<NotionPage, ClientError> {
        let url = format!("{}/sessions/{}/notion", self.base_url, id);

        let response = self.client.post(&url).send().await?;
        Self::decode(response).await
    }

    async fn delete_session(&self, id: SessionId) -> Result<(), ClientError> {
        let url = format!("{}/sessions/{}", self.base_url, id);

        let response = self.client.delete(&url).send().await?;

        if !response.status().is_success() {
            return Err(Self::handle_error(response).await);
        }

        // The confirmation body is informational and may be absent.
        let message = if response.status() == StatusCode::NO_CONTENT {
            None
        } else {
            response
                .json::<DeleteSessionResponse>()
                .await
                .ok()
                .map(|body| body.message)
        };

        tracing::debug!(session_id = %id, message = ?message, "Session deleted");
        Ok(())
    }
}
