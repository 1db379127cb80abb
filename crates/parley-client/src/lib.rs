//! Session client and streaming chat pipeline for parley.
//!
//! The pipeline, leaves first:
//!
//! - [`transport`]: opens the cancellable `POST /chat` request and exposes the body as bytes
//! - [`frame`]: reassembles newline-terminated lines across arbitrary chunk boundaries
//! - [`event`]: classifies `data: ` lines as delta, error or end frames
//! - [`stream`]: the per-turn state machine that owns the cancellation handle and buffer
//! - [`conversation`]: merges stream output into the committed transcript
//!
//! [`client`] is the plain request/response client for session CRUD.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod event;
pub mod frame;
pub mod stream;
pub mod transport;

pub use client::{ClientError, SessionApi, SessionClient};
pub use config::ClientConfig;
pub use conversation::{Conversation, ConversationError};
pub use error::{ProtocolError, StreamError, TransportError};
pub use event::{parse_line, StreamFrame};
pub use frame::{decode_lines, FrameDecoder};
pub use stream::{StreamController, StreamState, StreamUpdate};
pub use transport::{cancellable, ByteStream, HttpTransport, StreamTransport};
