//! Core types and identifiers for parley.
//!
//! This crate provides the foundational types shared by the client library
//! and the terminal front-end:
//!
//! - **Identifiers**: Strongly-typed IDs for conversation sessions and messages
//! - **Data model**: Messages, sessions, summaries and the REST envelopes around them
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use parley_core::{Message, Role, SessionId};
//!
//! let session_id: SessionId = "6f1c0a4e-2b7d-4c1e-9a55-0d3f6b2e8c71".parse().unwrap();
//! assert_eq!(session_id.to_string(), "6f1c0a4e-2b7d-4c1e-9a55-0d3f6b2e8c71");
//!
//! let msg = Message::user("Hello");
//! assert_eq!(msg.role, Role::User);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod types;

pub use error::CoreError;
pub use ids::{IdError, MessageId, SessionId};
pub use types::{
    ApiErrorResponse, ChatRequest, CreateSessionResponse, DeleteSessionResponse, HealthResponse,
    ListSessionsResponse, Message, MessagesResponse, NotionPage, Role, Session, Summary,
    DEFAULT_SESSION_TITLE,
};
