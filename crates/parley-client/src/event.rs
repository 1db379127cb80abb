//! Classification of decoded lines into stream frames.
//!
//! Only lines starting with `data: ` carry frames. Their payload is a JSON
//! object; the recognised fields are checked in priority order `error`,
//! `event: "end"`, `data`.

use serde::Deserialize;

use crate::error::ProtocolError;

/// Prefix marking a frame line.
pub const DATA_PREFIX: &str = "data: ";

/// One decoded unit of the chat stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// A fragment of the assistant reply, appended verbatim.
    Delta(String),
    /// The backend gave up on this turn.
    Error(String),
    /// The reply is complete.
    End,
}

impl StreamFrame {
    /// Check if the frame ends the stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::End)
    }
}

#[derive(Debug, Deserialize)]
struct FramePayload {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

/// Text of an `error` field, or `None` when it is blank, `null` or `false`.
fn error_message(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null | serde_json::Value::Bool(false) => None,
        serde_json::Value::String(message) if message.trim().is_empty() => None,
        serde_json::Value::String(message) => Some(message),
        other => Some(other.to_string()),
    }
}

impl FramePayload {
    fn into_frame(self) -> Option<StreamFrame> {
        if let Some(message) = self.error.and_then(error_message) {
            return Some(StreamFrame::Error(message));
        }
        if self.event.as_deref() == Some("end") {
            return Some(StreamFrame::End);
        }
        self.data.map(StreamFrame::Delta)
    }
}

/// Parse one line of the response body.
///
/// Returns `Ok(None)` for lines that carry no frame: anything without the
/// `data: ` prefix, and payloads with none of the recognised fields.
///
/// # Errors
///
/// Returns [`ProtocolError`] when a `data: ` payload is not a JSON object.
pub fn parse_line(line: &str) -> Result<Option<StreamFrame>, ProtocolError> {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(None);
    };

    let payload: FramePayload =
        serde_json::from_str(payload).map_err(|source| ProtocolError {
            payload: payload.to_string(),
            source,
        })?;

    Ok(payload.into_frame())
}
