//! Common error types for parley.
//!
//! This module provides shared error types that are used across multiple crates.

use thiserror::Error;

/// Core errors that can occur throughout parley.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An unknown message role was encountered.
    #[error("unknown role: {0}")]
    UnknownRole(String),
}
