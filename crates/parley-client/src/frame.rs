//! Line reassembly for the chat response body.
//!
//! The body arrives in chunks whose boundaries have nothing to do with the
//! protocol: a line, or a multi-byte character inside it, can be split over
//! any number of reads. [`FrameDecoder`] keeps the unterminated tail between
//! chunks and only ever yields whole lines.

use std::collections::VecDeque;

use futures::{Stream, StreamExt};

use crate::error::TransportError;
use crate::transport::ByteStream;

/// Incremental splitter from byte chunks to `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    carry: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every line it completes, in order.
    ///
    /// Lines are returned without their terminator; a trailing `\r` is also
    /// stripped. Invalid UTF-8 is replaced rather than rejected.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // The carry never holds a newline, so only the new bytes need scanning.
        let scan_from = self.carry.len();
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut cursor = scan_from;
        while let Some(offset) = self.carry[cursor..].iter().position(|&b| b == b'\n') {
            let end = cursor + offset;
            lines.push(decode_line(&self.carry[start..end]));
            start = end + 1;
            cursor = start;
        }

        self.carry.drain(..start);
        lines
    }

    /// Number of bytes held back waiting for a terminator.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    /// End of input. Any unterminated tail is dropped.
    pub fn finish(self) {
        if !self.carry.is_empty() {
            tracing::debug!(
                bytes = self.carry.len(),
                "Discarding unterminated data at end of stream"
            );
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

struct Lines {
    bytes: ByteStream,
    decoder: Option<FrameDecoder>,
    ready: VecDeque<String>,
}

/// Adapt a byte stream into a lazy stream of lines.
///
/// A read error is yielded once and ends the stream. The result is tied to
/// `bytes` and cannot be restarted.
pub fn decode_lines(bytes: ByteStream) -> impl Stream<Item = Result<String, TransportError>> + Send {
    let state = Lines {
        bytes,
        decoder: Some(FrameDecoder::new()),
        ready: VecDeque::new(),
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }

            let decoder = state.decoder.as_mut()?;
            match state.bytes.next().await {
                Some(Ok(chunk)) => state.ready.extend(decoder.push(&chunk)),
                Some(Err(err)) => {
                    state.decoder = None;
                    return Some((Err(err), state));
                }
                None => {
                    if let Some(decoder) = state.decoder.take() {
                        decoder.finish();
                    }
                    return None;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    const BODY: &str = "data: {\"data\":\"Hello\"}\n\ndata: {\"data\":\" wörld ✓\"}\n: comment\ndata: {\"event\":\"end\"}\n";

    fn expected() -> Vec<String> {
        BODY.lines().map(str::to_string).collect()
    }

    fn byte_stream(chunks: Vec<Result<Bytes, TransportError>>) -> ByteStream {
        Box::pin(futures::stream::iter(chunks))
    }

    #[test]
    fn single_chunk() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push(BODY.as_bytes()), expected());
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn split_at_every_offset() {
        let body = BODY.as_bytes();
        for split in 0..=body.len() {
            let mut decoder = FrameDecoder::new();
            let mut lines = decoder.push(&body[..split]);
            lines.extend(decoder.push(&body[split..]));
            assert_eq!(lines, expected(), "split at byte {split}");
        }
    }

    #[test]
    fn byte_by_byte() {
        let mut decoder = FrameDecoder::new();
        let lines: Vec<String> = BODY
            .as_bytes()
            .iter()
            .flat_map(|b| decoder.push(std::slice::from_ref(b)))
            .collect();
        assert_eq!(lines, expected());
    }

    #[test]
    fn crlf_terminators() {
        let mut decoder = FrameDecoder::new();
        let lines = decoder.push(b"data: a\r\n\r\ndata: b\r");
        assert_eq!(lines, vec!["data: a".to_string(), String::new()]);
        assert_eq!(decoder.push(b"\n"), vec!["data: b".to_string()]);
    }

    #[test]
    fn unterminated_tail_is_held() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push(b"data: {\"data\":\"x\"}\ndata: {\"da"), vec![
            "data: {\"data\":\"x\"}".to_string()
        ]);
        assert_eq!(decoder.pending(), 10);
        decoder.finish();
    }

    #[tokio::test]
    async fn decode_lines_drops_tail() {
        let lines: Vec<String> = decode_lines(byte_stream(vec![
            Ok(Bytes::from_static(b"data: one\nda")),
            Ok(Bytes::from_static(b"ta: two\ndata: partial")),
        ]))
        .map(|line| line.unwrap())
        .collect()
        .await;

        assert_eq!(lines, vec!["data: one".to_string(), "data: two".to_string()]);
    }

    #[tokio::test]
    async fn decode_lines_stops_after_error() {
        let lines: Vec<Result<String, TransportError>> = decode_lines(byte_stream(vec![
            Ok(Bytes::from_static(b"data: one\n")),
            Err(TransportError::Status { status: 500 }),
            Ok(Bytes::from_static(b"data: two\n")),
        ]))
        .collect()
        .await;

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].as_ref().unwrap(), "data: one");
        assert!(matches!(lines[1], Err(TransportError::Status { status: 500 })));
    }
}
