//! Data model shared by the client library and the terminal front-end.
//!
//! These types mirror the JSON bodies exchanged with the chat backend.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{MessageId, SessionId};

/// Title shown for a session the backend has not named yet.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

// =============================================================================
// Messages
// =============================================================================

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human side of the conversation.
    User,
    /// The remote assistant.
    Assistant,
}

impl Role {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(CoreError::UnknownRole(other.to_string())),
        }
    }
}

/// A committed message in a conversation transcript.
///
/// Messages are immutable once committed; transcript order is insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID.
    pub id: MessageId,
    /// Who wrote the message.
    pub role: Role,
    /// Message text (markdown for assistant replies).
    pub content: String,
    /// Creation timestamp.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a user message stamped with a fresh ID and the current time.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message stamped with a fresh ID and the current time.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Check if this is a user message.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// A conversation session as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session ID.
    pub id: SessionId,
    /// Title, assigned by the backend after the first turn or a summary.
    #[serde(default)]
    pub title: Option<String>,
    /// Creation timestamp.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Title to display, falling back to [`DEFAULT_SESSION_TITLE`].
    #[must_use]
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_SESSION_TITLE)
    }
}

/// A generated summary of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Short title for the session.
    pub title: String,
    /// Markdown body.
    pub markdown: String,
}

/// A page created in the external note service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotionPage {
    /// Page ID.
    pub page_id: String,
    /// Public URL of the page.
    pub url: String,
}

// =============================================================================
// REST Envelopes
// =============================================================================

/// Response for listing sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    /// Sessions, most recent first as returned by the backend.
    pub sessions: Vec<Session>,
}

/// Response for creating a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    /// ID of the new session.
    pub id: SessionId,
}

/// Response for fetching a session's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Messages in creation order.
    pub messages: Vec<Message>,
}

/// Response for deleting a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSessionResponse {
    /// Confirmation text.
    pub message: String,
}

/// Response for the health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Whether the backend is healthy.
    pub ok: bool,
}

/// Request body for the streaming chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Session the turn belongs to.
    pub session_id: SessionId,
    /// The user's raw text.
    pub text: String,
}

/// Error response from the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Error detail.
    pub detail: String,
}

/// Timestamps as RFC 3339 strings.
///
/// The backend emits naive UTC timestamps (no offset); those are accepted and
/// interpreted as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
