//! Integration tests for the chat stream over HTTP using wiremock.

use std::sync::Arc;

use parley_client::{
    ClientConfig, Conversation, HttpTransport, StreamController, StreamError, StreamState,
    StreamTransport, StreamUpdate, TransportError,
};
use parley_core::{Role, SessionId};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SESSION: &str = "6f1c2b7e-4d3a-4c55-9a1e-2b8f0d7c9e10";

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::with_base_url(format!("{}/api", server.uri()))
}

fn session_id() -> SessionId {
    SESSION.parse().expect("valid id")
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
}

async fn run_to_end(controller: &mut StreamController) -> (Vec<String>, StreamUpdate) {
    let mut deltas = Vec::new();
    loop {
        match controller.next_update().await {
            StreamUpdate::Delta(text) => deltas.push(text),
            terminal => return (deltas, terminal),
        }
    }
}

#[tokio::test]
async fn transport_posts_chat_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(header("accept", "text/event-stream"))
        .and(body_json(serde_json::json!({ "session_id": SESSION, "text": "hi" })))
        .respond_with(sse("data: {\"event\":\"end\",\"data\":\"done\"}\n\n"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(&config(&server)).unwrap();
    assert!(transport.open(session_id(), "hi").await.is_ok());
}

#[tokio::test]
async fn transport_rejects_error_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(&config(&server)).unwrap();
    let err = transport.open(session_id(), "hi").await.err().expect("status error");
    assert!(matches!(err, TransportError::Status { status: 500 }));
}

#[tokio::test]
async fn controller_streams_reply() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(sse(concat!(
            "data: {\"data\":\"Hello\"}\n\n",
            "data: {not json\n\n",
            "data: {\"data\":\" world\"}\n\n",
            "data: {\"event\":\"end\",\"data\":\"done\"}\n\n",
        )))
        .mount(&server)
        .await;

    let config = config(&server);
    let transport = Arc::new(HttpTransport::new(&config).unwrap());
    let mut controller = StreamController::new(transport, &config);

    controller.start(session_id(), "hi");
    let (deltas, end) = run_to_end(&mut controller).await;

    assert_eq!(deltas, vec!["Hello", " world"]);
    assert!(matches!(end, StreamUpdate::Completed { ref text } if text == "Hello world"));
    assert_eq!(controller.state(), StreamState::Completed);
}

#[tokio::test]
async fn controller_reports_upstream_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(sse("data: {\"error\":\"Session not found\"}\n\n"))
        .mount(&server)
        .await;

    let config = config(&server);
    let transport = Arc::new(HttpTransport::new(&config).unwrap());
    let mut controller = StreamController::new(transport, &config);

    controller.start(session_id(), "hi");
    let (deltas, end) = run_to_end(&mut controller).await;

    assert!(deltas.is_empty());
    match end {
        StreamUpdate::Failed { error, partial } => {
            assert!(matches!(error, StreamError::Upstream(ref m) if m == "Session not found"));
            assert!(partial.is_empty());
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn conversation_round_trip() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": SESSION })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(sse(concat!(
            "data: {\"data\":\"Hi \"}\n\n",
            "data: {\"data\":\"there\"}\n\n",
            "data: {\"event\":\"end\",\"data\":\"done\"}\n\n",
        )))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/api/sessions/{SESSION}/messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "messages": [
                { "id": "1d2c3b4a-5e6f-4a7b-8c9d-0e1f2a3b4c5d", "role": "user", "content": "hello", "created_at": "2025-01-15T10:30:00" },
                { "id": "2d2c3b4a-5e6f-4a7b-8c9d-0e1f2a3b4c5d", "role": "assistant", "content": "Hi there", "created_at": "2025-01-15T10:30:01" }
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/api/sessions/{SESSION}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": SESSION,
            "title": "hello",
            "created_at": "2025-01-15T10:29:59"
        })))
        .mount(&server)
        .await;

    let mut conversation = Conversation::connect(&config(&server)).unwrap();
    conversation.start_new().await.unwrap();
    conversation.send("hello").unwrap();

    loop {
        let update = conversation.next_update().await;
        let done = !matches!(update, StreamUpdate::Delta(_));
        conversation.apply(update).await;
        if done {
            break;
        }
    }

    let transcript: Vec<(Role, &str)> = conversation
        .messages()
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(transcript, vec![(Role::User, "hello"), (Role::Assistant, "Hi there")]);
    assert_eq!(conversation.title(), "hello");
    assert_eq!(conversation.error(), None);
}
