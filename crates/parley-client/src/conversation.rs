//! Conversation state: the committed transcript plus the reply in flight.
//!
//! [`Conversation`] is the caller of the stream pipeline. It appends the
//! user's turn locally, starts a stream session, and folds the resulting
//! [`StreamUpdate`]s back into the transcript. Once a reply completes, the
//! backend's stored history replaces the local transcript.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use parley_core::{Message, NotionPage, Session, SessionId, Summary, DEFAULT_SESSION_TITLE};

use crate::client::{ClientError, SessionApi, SessionClient};
use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::stream::{StreamController, StreamState, StreamUpdate};
use crate::transport::HttpTransport;

/// Error type for conversation operations.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// Nothing left to send after trimming.
    #[error("message is empty")]
    EmptyMessage,

    /// No session has been opened yet.
    #[error("no session is open")]
    NoSession,

    /// A reply is still streaming.
    #[error("a reply is still streaming")]
    Busy,

    /// The open session cannot be deleted from under the conversation.
    #[error("cannot delete the open session")]
    DeleteOpenSession,

    /// A session API call failed.
    #[error(transparent)]
    Api(#[from] ClientError),

    /// The chat transport could not be built.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A single open conversation.
pub struct Conversation {
    api: Arc<dyn SessionApi>,
    stream: StreamController,
    session: Option<Session>,
    messages: Vec<Message>,
    error: Option<String>,
    notice: Option<String>,
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("session", &self.session)
            .field("messages", &self.messages.len())
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

impl Conversation {
    /// Create a conversation with no session open.
    #[must_use]
    pub fn new(api: Arc<dyn SessionApi>, stream: StreamController) -> Self {
        Self {
            api,
            stream,
            session: None,
            messages: Vec::new(),
            error: None,
            notice: None,
        }
    }

    /// Create a conversation talking HTTP to the backend in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if either HTTP client cannot be built.
    pub fn connect(config: &ClientConfig) -> Result<Self, ConversationError> {
        let api = Arc::new(SessionClient::new(config)?);
        let transport = Arc::new(HttpTransport::new(config)?);
        Ok(Self::new(api, StreamController::new(transport, config)))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The open session, if any.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// ID of the open session, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Title of the open session.
    #[must_use]
    pub fn title(&self) -> &str {
        self.session
            .as_ref()
            .map_or(DEFAULT_SESSION_TITLE, Session::display_title)
    }

    /// Committed transcript.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Check if a reply is in flight.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.stream.is_active()
    }

    /// State of the current or last stream session.
    #[must_use]
    pub const fn stream_state(&self) -> StreamState {
        self.stream.state()
    }

    /// Reply text received so far for the stream in flight.
    #[must_use]
    pub fn streaming_text(&self) -> &str {
        self.stream.text()
    }

    /// Last error worth showing to the user.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Dismiss the current error.
    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Take the latest informational notice.
    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Open a fresh, empty session.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot create the session.
    pub async fn start_new(&mut self) -> Result<SessionId, ConversationError> {
        self.stop_generating();

        let id = self.api.create_session().await?;
        self.session = Some(Session {
            id,
            title: None,
            created_at: Utc::now(),
        });
        self.messages.clear();
        self.error = None;

        tracing::debug!(session_id = %id, "Started new session");
        Ok(id)
    }

    /// Reopen a previous session, or start a new one if it cannot be loaded.
    ///
    /// # Errors
    ///
    /// Returns an error only if the fallback session cannot be created.
    pub async fn resume(&mut self, id: SessionId) -> Result<SessionId, ConversationError> {
        match self.load(id).await {
            Ok(()) => Ok(id),
            Err(err) => {
                tracing::warn!(session_id = %id, error = %err, "Could not resume session, starting a new one");
                self.start_new().await
            }
        }
    }

    /// Switch to another session.
    ///
    /// A reply in flight is stopped and its partial text kept in the
    /// transcript being left.
    ///
    /// # Errors
    ///
    /// Returns an error if the session or its history cannot be fetched.
    pub async fn switch_to(&mut self, id: SessionId) -> Result<(), ConversationError> {
        self.stop_generating();
        self.load(id).await
    }

    /// List every session known to the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call fails.
    pub async fn list_sessions(&self) -> Result<Vec<Session>, ConversationError> {
        Ok(self.api.list_sessions().await?)
    }

    /// Delete a session other than the open one.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationError::DeleteOpenSession`] for the open session,
    /// or an error if the backend call fails.
    pub async fn delete_session(&mut self, id: SessionId) -> Result<(), ConversationError> {
        if self.session_id() == Some(id) {
            return Err(ConversationError::DeleteOpenSession);
        }
        self.api.delete_session(id).await?;
        Ok(())
    }

    async fn load(&mut self, id: SessionId) -> Result<(), ConversationError> {
        let session = self.api.get_session(id).await?;
        let messages = self.api.get_messages(id).await?;

        tracing::debug!(session_id = %id, messages = messages.len(), "Loaded session");

        self.session = Some(session);
        self.messages = messages;
        self.error = None;
        Ok(())
    }

    // =========================================================================
    // Streaming
    // =========================================================================

    /// Send a user turn and start streaming the reply.
    ///
    /// # Errors
    ///
    /// Fails without side effects if the text is blank, no session is open,
    /// or a reply is still streaming.
    pub fn send(&mut self, text: &str) -> Result<(), ConversationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ConversationError::EmptyMessage);
        }
        let Some(id) = self.session_id() else {
            return Err(ConversationError::NoSession);
        };
        if self.stream.is_active() {
            return Err(ConversationError::Busy);
        }

        self.messages.push(Message::user(text));
        self.error = None;
        self.stream.start(id, text);
        Ok(())
    }

    /// Wait for the next update of the reply in flight.
    ///
    /// Pends forever while nothing is streaming. Cancel safe.
    pub async fn next_update(&mut self) -> StreamUpdate {
        self.stream.next_update().await
    }

    /// Fold a stream update into the transcript.
    pub async fn apply(&mut self, update: StreamUpdate) {
        match update {
            StreamUpdate::Delta(_) => {}
            StreamUpdate::Completed { text } => {
                self.messages.push(Message::assistant(text));
                self.refresh_history().await;
            }
            StreamUpdate::Failed { error, partial } => {
                tracing::warn!(error = %error, partial = partial.len(), "Reply failed");
                self.error = Some(error.user_message());
                if !partial.is_empty() {
                    self.messages.push(Message::assistant(partial));
                }
            }
        }
    }

    /// Stop the reply in flight, keeping whatever text already arrived.
    ///
    /// Returns `false` if nothing was streaming.
    pub fn stop_generating(&mut self) -> bool {
        let Some(partial) = self.stream.cancel() else {
            return false;
        };
        if !partial.is_empty() {
            self.messages.push(Message::assistant(partial));
        }
        true
    }

    async fn refresh_history(&mut self) {
        let Some(id) = self.session_id() else {
            return;
        };

        match self.api.get_messages(id).await {
            Ok(messages) => self.messages = messages,
            Err(err) => {
                tracing::warn!(session_id = %id, error = %err, "Could not refresh history, keeping local transcript");
            }
        }

        // The backend names a session after its first turn.
        if self.session.as_ref().is_some_and(|s| s.title.is_none()) {
            if let Ok(session) = self.api.get_session(id).await {
                self.session = Some(session);
            }
        }
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Summarize the open session and adopt the summary's title.
    ///
    /// # Errors
    ///
    /// Returns an error if no session is open or the backend call fails.
    pub async fn summarize(&mut self) -> Result<Summary, ConversationError> {
        let id = self.session_id().ok_or(ConversationError::NoSession)?;
        let summary = self.api.summarize(id).await?;

        if let Some(session) = self.session.as_mut() {
            session.title = Some(summary.title.clone());
        }
        self.notice = Some(format!("Summarized as \"{}\"", summary.title));
        Ok(summary)
    }

    /// Export the open session's summary to the note service.
    ///
    /// # Errors
    ///
    /// Returns an error if no session is open or the backend call fails.
    pub async fn save_to_notion(&mut self) -> Result<NotionPage, ConversationError> {
        let id = self.session_id().ok_or(ConversationError::NoSession)?;
        let page = self.api.save_to_notion(id).await?;

        self.notice = Some(format!("Saved to Notion: {}", page.url));
        Ok(page)
    }
}
