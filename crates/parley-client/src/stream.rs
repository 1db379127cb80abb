//! Per-turn stream session controller.
//!
//! One [`StreamController`] drives at most one stream session at a time:
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Completed | Failed | Cancelled
//! ```
//!
//! [`StreamController::start`] spawns a pump task that opens the transport,
//! decodes lines, parses frames and forwards them over a channel. The
//! controller applies those signals in [`StreamController::next_update`],
//! which is where the accumulation buffer and the state live. Every signal is
//! tagged with the session sequence number, so anything a superseded or
//! already terminated session still manages to send is dropped there.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parley_core::SessionId;

use crate::config::ClientConfig;
use crate::error::StreamError;
use crate::event::{parse_line, StreamFrame};
use crate::frame::decode_lines;
use crate::transport::{cancellable, idle_limited, StreamTransport};

// =============================================================================
// Public Types
// =============================================================================

/// Lifecycle of the current stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    /// Nothing has been started yet.
    #[default]
    Idle,
    /// The request is being opened.
    Connecting,
    /// The response body is being read.
    Streaming,
    /// The backend finished the reply.
    Completed,
    /// The transport failed or the backend sent an error frame.
    Failed,
    /// The caller stopped the session.
    Cancelled,
}

impl StreamState {
    /// Check if a session is in flight.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }

    /// Check if the last session has ended.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Outcome delivered to the caller.
///
/// Zero or more `Delta`s are followed by at most one of `Failed` or
/// `Completed`. A cancelled session produces nothing further.
#[derive(Debug)]
pub enum StreamUpdate {
    /// A fragment was appended to the reply.
    Delta(String),
    /// The session failed. `partial` is the text received before the failure.
    Failed {
        /// Why the session failed.
        error: StreamError,
        /// Accumulated text at the time of failure.
        partial: String,
    },
    /// The session finished normally with the full reply text.
    Completed {
        /// Accumulated reply.
        text: String,
    },
}

// =============================================================================
// Pump Signals
// =============================================================================

#[derive(Debug)]
enum Signal {
    Opened,
    Frame(StreamFrame),
    Failed(StreamError),
    Exhausted,
}

impl Signal {
    fn is_terminal(&self) -> bool {
        match self {
            Self::Opened => false,
            Self::Frame(frame) => frame.is_terminal(),
            Self::Failed(_) | Self::Exhausted => true,
        }
    }
}

#[derive(Debug)]
struct Envelope {
    seq: u64,
    signal: Signal,
}

// =============================================================================
// Controller
// =============================================================================

/// Owner of the cancellation handle, state and buffer for streamed replies.
pub struct StreamController {
    transport: Arc<dyn StreamTransport>,
    idle_timeout: Duration,
    handle: Option<CancellationToken>,
    state: StreamState,
    buffer: String,
    seq: u64,
    tx: mpsc::Sender<Envelope>,
    rx: mpsc::Receiver<Envelope>,
}

impl fmt::Debug for StreamController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamController")
            .field("state", &self.state)
            .field("seq", &self.seq)
            .field("buffered", &self.buffer.len())
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl StreamController {
    /// Create an idle controller.
    #[must_use]
    pub fn new(transport: Arc<dyn StreamTransport>, config: &ClientConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        Self {
            transport,
            idle_timeout: config.idle_timeout(),
            handle: None,
            state: StreamState::Idle,
            buffer: String::new(),
            seq: 0,
            tx,
            rx,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Check if a session is in flight.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Text accumulated by the current session so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Start a new stream session for `text` in `session_id`.
    ///
    /// Any session still in flight is cancelled first. Must be called from
    /// within a tokio runtime.
    pub fn start(&mut self, session_id: SessionId, text: impl Into<String>) {
        if self.state.is_active() {
            self.cancel();
        }

        self.seq += 1;
        self.buffer.clear();
        self.state = StreamState::Connecting;

        let token = CancellationToken::new();
        self.handle = Some(token.clone());

        tracing::debug!(seq = self.seq, session_id = %session_id, "Stream session starting");

        let pump = Pump {
            seq: self.seq,
            token,
            tx: self.tx.clone(),
            idle_timeout: self.idle_timeout,
        };
        tokio::spawn(pump.run(Arc::clone(&self.transport), session_id, text.into()));
    }

    /// Stop the session in flight.
    ///
    /// Returns the text accumulated so far, or `None` if nothing was in flight
    /// (so a repeated cancel, or a cancel after completion, does nothing).
    pub fn cancel(&mut self) -> Option<String> {
        if !self.state.is_active() {
            return None;
        }

        if let Some(token) = self.handle.take() {
            token.cancel();
        }
        self.state = StreamState::Cancelled;

        tracing::debug!(seq = self.seq, buffered = self.buffer.len(), "Stream session cancelled");
        Some(std::mem::take(&mut self.buffer))
    }

    /// Wait for the next update of the current session.
    ///
    /// Pends forever while no session is in flight. Cancel safe, so it can
    /// sit in a `tokio::select!` next to other event sources.
    pub async fn next_update(&mut self) -> StreamUpdate {
        loop {
            match self.rx.recv().await {
                Some(envelope) => {
                    if let Some(update) = self.apply(envelope) {
                        return update;
                    }
                }
                // The controller holds a sender, so the channel never closes.
                None => std::future::pending::<()>().await,
            }
        }
    }

    fn apply(&mut self, envelope: Envelope) -> Option<StreamUpdate> {
        if envelope.seq != self.seq || !self.state.is_active() {
            tracing::debug!(
                seq = envelope.seq,
                current = self.seq,
                "Discarding signal from finished stream session"
            );
            return None;
        }

        match envelope.signal {
            Signal::Opened => {
                self.state = StreamState::Streaming;
                tracing::debug!(seq = self.seq, "Stream session open");
                None
            }
            Signal::Frame(StreamFrame::Delta(text)) => {
                self.state = StreamState::Streaming;
                self.buffer.push_str(&text);
                Some(StreamUpdate::Delta(text))
            }
            Signal::Frame(StreamFrame::End) | Signal::Exhausted => {
                let text = self.terminate(StreamState::Completed);
                Some(StreamUpdate::Completed { text })
            }
            Signal::Frame(StreamFrame::Error(message)) => {
                let partial = self.terminate(StreamState::Failed);
                Some(StreamUpdate::Failed {
                    error: StreamError::Upstream(message),
                    partial,
                })
            }
            Signal::Failed(error) => {
                let partial = self.terminate(StreamState::Failed);
                Some(StreamUpdate::Failed { error, partial })
            }
        }
    }

    fn terminate(&mut self, state: StreamState) -> String {
        self.state = state;
        self.handle = None;
        tracing::debug!(seq = self.seq, state = ?state, "Stream session finished");
        std::mem::take(&mut self.buffer)
    }
}

// =============================================================================
// Pump Task
// =============================================================================

struct Pump {
    seq: u64,
    token: CancellationToken,
    tx: mpsc::Sender<Envelope>,
    idle_timeout: Duration,
}

impl Pump {
    async fn run(self, transport: Arc<dyn StreamTransport>, session_id: SessionId, text: String) {
        let opened = tokio::select! {
            biased;
            () = self.token.cancelled() => return,
            opened = tokio::time::timeout(self.idle_timeout, transport.open(session_id, &text)) => opened,
        };

        let body = match opened {
            Ok(Ok(body)) => body,
            Ok(Err(err)) => {
                self.send(Signal::Failed(err.into())).await;
                return;
            }
            Err(_) => {
                self.send(Signal::Failed(StreamError::IdleTimeout(self.idle_timeout)))
                    .await;
                return;
            }
        };

        if !self.send(Signal::Opened).await {
            return;
        }

        let body = idle_limited(body, self.idle_timeout);
        let mut lines = Box::pin(decode_lines(cancellable(body, self.token.clone())));

        loop {
            let signal = match lines.next().await {
                None if self.token.is_cancelled() => return,
                None => Signal::Exhausted,
                Some(Err(err)) => Signal::Failed(err.into()),
                Some(Ok(line)) => match parse_line(&line) {
                    Ok(Some(frame)) => Signal::Frame(frame),
                    Ok(None) => continue,
                    Err(err) => {
                        tracing::warn!(seq = self.seq, error = %err, "Dropping malformed frame");
                        continue;
                    }
                },
            };

            let terminal = signal.is_terminal();
            if !self.send(signal).await || terminal {
                return;
            }
        }
    }

    /// Forward a signal. Returns `false` once the session has been cancelled.
    async fn send(&self, signal: Signal) -> bool {
        let envelope = Envelope {
            seq: self.seq,
            signal,
        };
        tokio::select! {
            biased;
            () = self.token.cancelled() => false,
            sent = self.tx.send(envelope) => sent.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::task::{Context, Poll};

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::Stream;

    use crate::error::TransportError;
    use crate::transport::ByteStream;

    // -------------------------------------------------------------------------
    // Scripted transport
    // -------------------------------------------------------------------------

    enum Script {
        Body {
            chunks: Vec<&'static str>,
            hold_open: bool,
            dropped: Arc<AtomicBool>,
        },
        Status(u16),
        /// `head` as one chunk, then `tail` one byte at a time, one byte
        /// every `every`.
        Trickle {
            head: &'static str,
            tail: &'static str,
            every: Duration,
        },
    }

    impl Script {
        fn body(chunks: &[&'static str]) -> Self {
            Self::Body {
                chunks: chunks.to_vec(),
                hold_open: false,
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }

        /// Body that never ends after its chunks. The flag flips when the
        /// stream is dropped.
        fn held(chunks: &[&'static str]) -> (Self, Arc<AtomicBool>) {
            let dropped = Arc::new(AtomicBool::new(false));
            let script = Self::Body {
                chunks: chunks.to_vec(),
                hold_open: true,
                dropped: Arc::clone(&dropped),
            };
            (script, dropped)
        }
    }

    struct Guarded {
        inner: ByteStream,
        dropped: Arc<AtomicBool>,
    }

    impl Stream for Guarded {
        type Item = Result<Bytes, TransportError>;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.get_mut().inner.as_mut().poll_next(cx)
        }
    }

    impl Drop for Guarded {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Script>>,
        opened: Mutex<Vec<(SessionId, String)>>,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                opened: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl StreamTransport for ScriptedTransport {
        async fn open(&self, session_id: SessionId, text: &str) -> Result<ByteStream, TransportError> {
            self.opened.lock().unwrap().push((session_id, text.to_string()));
            let script = self.scripts.lock().unwrap().pop_front().expect("unscripted open");

            match script {
                Script::Status(status) => Err(TransportError::Status { status }),
                Script::Body {
                    chunks,
                    hold_open,
                    dropped,
                } => {
                    let items: Vec<Result<Bytes, TransportError>> = chunks
                        .into_iter()
                        .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                        .collect();
                    let body = futures::stream::iter(items);
                    let inner: ByteStream = if hold_open {
                        Box::pin(body.chain(futures::stream::pending()))
                    } else {
                        Box::pin(body)
                    };
                    Ok(Box::pin(Guarded { inner, dropped }))
                }
                Script::Trickle { head, tail, every } => {
                    let head = futures::stream::once(async move {
                        Ok::<_, TransportError>(Bytes::from_static(head.as_bytes()))
                    });
                    let tail = futures::stream::iter(tail.as_bytes().iter().copied()).then(
                        move |byte| async move {
                            tokio::time::sleep(every).await;
                            Ok(Bytes::copy_from_slice(&[byte]))
                        },
                    );
                    Ok(Box::pin(head.chain(tail)))
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn controller(transport: Arc<ScriptedTransport>) -> StreamController {
        let config = ClientConfig {
            idle_timeout_seconds: 5,
            ..ClientConfig::default()
        };
        StreamController::new(transport, &config)
    }

    fn session() -> SessionId {
        SessionId::generate()
    }

    /// Collect updates up to and including the first terminal one.
    async fn run_to_end(controller: &mut StreamController) -> (Vec<String>, StreamUpdate) {
        let mut deltas = Vec::new();
        loop {
            match controller.next_update().await {
                StreamUpdate::Delta(text) => deltas.push(text),
                terminal => return (deltas, terminal),
            }
        }
    }

    async fn assert_quiet(controller: &mut StreamController) {
        let next = tokio::time::timeout(Duration::from_millis(50), controller.next_update()).await;
        assert!(next.is_err(), "unexpected update: {next:?}");
    }

    async fn wait_for(flag: &AtomicBool) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !flag.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("stream was not dropped");
    }

    // -------------------------------------------------------------------------
    // Tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn split_frames_end_to_end() {
        let transport = ScriptedTransport::new(vec![Script::body(&[
            "data: {\"data\":\"Hel",
            "lo\"}\n",
            "data: {\"data\":\" world\"}\n",
            "data: {\"event\":\"end\"}\n",
        ])]);
        let mut controller = controller(Arc::clone(&transport));
        let id = session();

        controller.start(id, "hi");
        assert_eq!(controller.state(), StreamState::Connecting);

        let (deltas, end) = run_to_end(&mut controller).await;
        assert_eq!(deltas, vec!["Hello", " world"]);
        match end {
            StreamUpdate::Completed { text } => assert_eq!(text, "Hello world"),
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(controller.state(), StreamState::Completed);
        assert_eq!(controller.text(), "");
        assert_eq!(transport.opened.lock().unwrap().as_slice(), &[(id, "hi".to_string())]);
    }

    #[tokio::test]
    async fn deltas_in_order_then_single_end() {
        let transport = ScriptedTransport::new(vec![Script::body(&[
            "data: {\"data\":\"1\"}\ndata: {\"data\":\"2\"}\n",
            "data: {\"data\":\"3\"}\n",
            "data: {\"event\":\"end\",\"data\":\"done\"}\n",
            "data: {\"data\":\"late\"}\n",
            "data: {\"event\":\"end\"}\n",
        ])]);
        let mut controller = controller(transport);

        controller.start(session(), "count");
        let (deltas, end) = run_to_end(&mut controller).await;

        assert_eq!(deltas, vec!["1", "2", "3"]);
        assert!(matches!(end, StreamUpdate::Completed { ref text } if text == "123"));
        assert_quiet(&mut controller).await;
    }

    #[tokio::test]
    async fn error_frame_is_terminal() {
        let transport = ScriptedTransport::new(vec![Script::body(&[
            "data: {\"data\":\"par\"}\n",
            "data: {\"data\":\"tial\"}\n",
            "data: {\"error\":\"model overloaded\"}\n",
            "data: {\"event\":\"end\"}\n",
        ])]);
        let mut controller = controller(transport);

        controller.start(session(), "hi");
        let (deltas, end) = run_to_end(&mut controller).await;

        assert_eq!(deltas, vec!["par", "tial"]);
        match end {
            StreamUpdate::Failed { error, partial } => {
                assert!(matches!(error, StreamError::Upstream(ref m) if m == "model overloaded"));
                assert_eq!(partial, "partial");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(controller.state(), StreamState::Failed);
        assert_quiet(&mut controller).await;
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let transport = ScriptedTransport::new(vec![Script::body(&[
            "data: {\"data\":\"a\"}\n",
            "data: {not json\n",
            ": keep-alive\n\n",
            "data: {\"data\":\"b\"}\n",
            "data: {\"event\":\"end\"}\n",
        ])]);
        let mut controller = controller(transport);

        controller.start(session(), "hi");
        let (deltas, end) = run_to_end(&mut controller).await;

        assert_eq!(deltas, vec!["a", "b"]);
        assert!(matches!(end, StreamUpdate::Completed { ref text } if text == "ab"));
    }

    #[tokio::test]
    async fn body_without_end_frame_completes() {
        let transport = ScriptedTransport::new(vec![Script::body(&[
            "data: {\"data\":\"x\"}\n",
            "data: {\"data\":\"trailing",
        ])]);
        let mut controller = controller(transport);

        controller.start(session(), "hi");
        let (deltas, end) = run_to_end(&mut controller).await;

        assert_eq!(deltas, vec!["x"]);
        assert!(matches!(end, StreamUpdate::Completed { ref text } if text == "x"));
    }

    #[tokio::test]
    async fn status_error_fails_before_streaming() {
        let transport = ScriptedTransport::new(vec![Script::Status(503)]);
        let mut controller = controller(transport);

        controller.start(session(), "hi");
        let (deltas, end) = run_to_end(&mut controller).await;

        assert!(deltas.is_empty());
        match end {
            StreamUpdate::Failed { error, partial } => {
                assert!(matches!(
                    error,
                    StreamError::Transport(TransportError::Status { status: 503 })
                ));
                assert!(partial.is_empty());
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (script, dropped) = Script::held(&["data: {\"data\":\"Hel\"}\n"]);
        let transport = ScriptedTransport::new(vec![script]);
        let mut controller = controller(transport);

        controller.start(session(), "hi");
        assert!(matches!(controller.next_update().await, StreamUpdate::Delta(ref t) if t == "Hel"));
        assert_eq!(controller.state(), StreamState::Streaming);

        assert_eq!(controller.cancel().as_deref(), Some("Hel"));
        assert_eq!(controller.state(), StreamState::Cancelled);
        assert_eq!(controller.cancel(), None);
        assert_eq!(controller.state(), StreamState::Cancelled);

        wait_for(&dropped).await;
        assert_quiet(&mut controller).await;
    }

    #[tokio::test]
    async fn cancel_after_completion_is_noop() {
        let transport = ScriptedTransport::new(vec![Script::body(&["data: {\"event\":\"end\"}\n"])]);
        let mut controller = controller(transport);

        assert_eq!(controller.cancel(), None);

        controller.start(session(), "hi");
        let (_, end) = run_to_end(&mut controller).await;
        assert!(matches!(end, StreamUpdate::Completed { .. }));

        assert_eq!(controller.cancel(), None);
        assert_eq!(controller.state(), StreamState::Completed);
    }

    #[tokio::test]
    async fn cancel_while_connecting() {
        let (script, _) = Script::held(&[]);
        let transport = ScriptedTransport::new(vec![script]);
        let mut controller = controller(transport);

        controller.start(session(), "hi");
        assert_eq!(controller.cancel().as_deref(), Some(""));
        assert_quiet(&mut controller).await;
        assert_eq!(controller.state(), StreamState::Cancelled);
    }

    #[tokio::test]
    async fn new_session_cancels_previous() {
        let (first, first_dropped) = Script::held(&["data: {\"data\":\"one\"}\n"]);
        let second = Script::body(&["data: {\"data\":\"two\"}\n", "data: {\"event\":\"end\"}\n"]);
        let transport = ScriptedTransport::new(vec![first, second]);
        let mut controller = controller(Arc::clone(&transport));

        controller.start(session(), "first");
        assert!(matches!(controller.next_update().await, StreamUpdate::Delta(ref t) if t == "one"));

        controller.start(session(), "second");
        assert_eq!(controller.state(), StreamState::Connecting);
        wait_for(&first_dropped).await;

        let (deltas, end) = run_to_end(&mut controller).await;
        assert_eq!(deltas, vec!["two"]);
        assert!(matches!(end, StreamUpdate::Completed { ref text } if text == "two"));
        assert_eq!(transport.opened.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stream_times_out() {
        let (script, _) = Script::held(&["data: {\"data\":\"slow\"}\n"]);
        let transport = ScriptedTransport::new(vec![script]);
        let mut controller = controller(transport);

        controller.start(session(), "hi");
        let (deltas, end) = run_to_end(&mut controller).await;

        assert_eq!(deltas, vec!["slow"]);
        match end {
            StreamUpdate::Failed { error, partial } => {
                assert!(matches!(error, StreamError::IdleTimeout(d) if d == Duration::from_secs(5)));
                assert_eq!(partial, "slow");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_line_within_idle_limit_completes() {
        // The line takes longer than the idle limit; each byte arrives well within it.
        let transport = ScriptedTransport::new(vec![Script::Trickle {
            head: "data: {\"data\":\"",
            tail: "slow reply\"}\n",
            every: Duration::from_secs(1),
        }]);
        let mut controller = controller(transport);

        controller.start(session(), "hi");
        let (deltas, end) = run_to_end(&mut controller).await;

        assert_eq!(deltas, vec!["slow reply"]);
        assert!(matches!(end, StreamUpdate::Completed { ref text } if text == "slow reply"));
    }

    #[tokio::test]
    async fn restart_discards_queued_signals() {
        // Three frames in one chunk land in the channel together.
        let (first, first_dropped) = Script::held(&[
            "data: {\"data\":\"one\"}\ndata: {\"data\":\"two\"}\ndata: {\"data\":\"three\"}\n",
        ]);
        let second = Script::body(&["data: {\"data\":\"new\"}\n", "data: {\"event\":\"end\"}\n"]);
        let transport = ScriptedTransport::new(vec![first, second]);
        let mut controller = controller(transport);

        controller.start(session(), "first");
        assert!(matches!(controller.next_update().await, StreamUpdate::Delta(ref t) if t == "one"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!controller.rx.is_empty(), "later frames should be queued");

        controller.start(session(), "fresh");
        wait_for(&first_dropped).await;

        let (deltas, end) = run_to_end(&mut controller).await;
        assert_eq!(deltas, vec!["new"]);
        assert!(matches!(end, StreamUpdate::Completed { ref text } if text == "new"));
        assert_quiet(&mut controller).await;
    }

    #[tokio::test]
    async fn idle_controller_pends() {
        let mut controller = controller(ScriptedTransport::new(Vec::new()));
        assert_eq!(controller.state(), StreamState::Idle);
        assert_quiet(&mut controller).await;
    }
}
