//! End-to-end tests for `PairSession`.
//!
//! The network is replaced on both sides: [`MockHttp`] answers control
//! calls per URI and records them, and [`MockConnector`] hands the test a
//! [`ServerSide`] for every socket the session opens, so the test plays the
//! backend frame by frame.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pairlink::prelude::*;
use pairlink::http::{ClientError, HttpClient, HttpError, HttpResponse, SignedRequest};
use pairlink::protocol::Signer;
use pairlink::session::LinkError;
use pairlink::transport::{Connector, Socket, SocketEvent, TransportError};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

const BASE_URL: &str = "https://api.test";
const SECRET: &str = "s3cret";
const BOOK_KEY: &str = "bk-1";

// =========================================================================
// Mock HTTP
// =========================================================================

#[derive(Clone, Default)]
struct MockHttp {
    inner: Arc<HttpInner>,
}

#[derive(Default)]
struct HttpInner {
    routes: Mutex<HashMap<String, HttpResponse>>,
    once: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    seen: Mutex<Vec<SignedRequest>>,
}

impl MockHttp {
    /// Answers every call to `uri` with this response.
    fn route(&self, uri: &str, status: u16, body: Value) -> &Self {
        self.inner.routes.lock().unwrap().insert(
            uri.to_string(),
            HttpResponse {
                status,
                body: body.to_string(),
            },
        );
        self
    }

    /// Answers the next call to `uri` with this response.
    fn route_once(&self, uri: &str, status: u16, body: Value) -> &Self {
        self.inner
            .once
            .lock()
            .unwrap()
            .entry(uri.to_string())
            .or_default()
            .push_back(HttpResponse {
                status,
                body: body.to_string(),
            });
        self
    }

    fn seen(&self) -> Vec<SignedRequest> {
        self.inner.seen.lock().unwrap().clone()
    }

    fn seen_uris(&self) -> Vec<String> {
        self.seen().iter().map(uri_of).collect()
    }
}

fn uri_of(request: &SignedRequest) -> String {
    request
        .url
        .strip_prefix(&format!("{BASE_URL}/"))
        .unwrap_or(&request.url)
        .to_string()
}

impl HttpClient for MockHttp {
    async fn execute(&self, request: SignedRequest) -> Result<HttpResponse, ClientError> {
        let uri = uri_of(&request);
        self.inner.seen.lock().unwrap().push(request);

        let once = self
            .inner
            .once
            .lock()
            .unwrap()
            .get_mut(&uri)
            .and_then(VecDeque::pop_front);
        if let Some(response) = once {
            return Ok(response);
        }
        let routed = self.inner.routes.lock().unwrap().get(&uri).cloned();
        Ok(routed.unwrap_or(HttpResponse {
            status: 200,
            body: "{}".to_string(),
        }))
    }
}

// =========================================================================
// Mock socket
// =========================================================================

/// The backend's end of one socket.
struct ServerSide {
    url: String,
    to_client: mpsc::UnboundedSender<SocketEvent>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerSide {
    fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string());
    }

    fn push_raw(&self, text: &str) {
        self.to_client
            .send(SocketEvent::Text(text.to_string()))
            .expect("client socket alive");
    }

    fn close(&self, code: Option<u16>) {
        let _ = self.to_client.send(SocketEvent::Closed(code));
    }

    async fn frame(&mut self) -> String {
        timeout(Duration::from_secs(2), self.from_client.recv())
            .await
            .expect("frame in time")
            .expect("socket open")
    }

    async fn json(&mut self) -> Value {
        let text = self.frame().await;
        serde_json::from_str(&text).expect("frame is JSON")
    }

    async fn is_silent(&mut self) -> bool {
        timeout(Duration::from_millis(100), self.from_client.recv())
            .await
            .is_err()
    }
}

struct MockSocket {
    incoming: mpsc::UnboundedReceiver<SocketEvent>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl Socket for MockSocket {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(text)
            .map_err(|_| TransportError::SendFailed(io::Error::other("server side dropped")))
    }

    async fn recv(&mut self) -> Result<SocketEvent, TransportError> {
        Ok(self.incoming.recv().await.unwrap_or(SocketEvent::Closed(None)))
    }

    async fn close(&mut self, _code: Option<u16>) -> Result<(), TransportError> {
        Ok(())
    }
}

struct MockConnector {
    servers: mpsc::UnboundedSender<ServerSide>,
    refuse: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl Connector for MockConnector {
    type Socket = MockSocket;

    async fn connect(&self, url: &str) -> Result<MockSocket, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed(io::Error::other("refused")));
        }
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let _ = self.servers.send(ServerSide {
            url: url.to_string(),
            to_client,
            from_client,
        });
        Ok(MockSocket { incoming, outgoing })
    }
}

// =========================================================================
// Harness
// =========================================================================

struct Harness {
    client: PairlinkClient<MockConnector>,
    http: MockHttp,
    servers: mpsc::UnboundedReceiver<ServerSide>,
    refuse: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        Self::with_heartbeat(HeartbeatConfig::with_interval(Duration::from_secs(3600)))
    }

    fn with_heartbeat(heartbeat: HeartbeatConfig) -> Self {
        let http = MockHttp::default();
        http.route("book/seq", 200, json!({"booked": false, "seq": 7}));

        let (servers_tx, servers) = mpsc::unbounded_channel();
        let refuse = Arc::new(AtomicBool::new(false));
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = MockConnector {
            servers: servers_tx,
            refuse: Arc::clone(&refuse),
            attempts: Arc::clone(&attempts),
        };

        let client = PairlinkClientBuilder::new(BASE_URL, "web", "1.0.0", SECRET)
            .session_token("unicorn")
            .heartbeat(heartbeat)
            .build_with(http.clone(), connector);

        Self {
            client,
            http,
            servers,
            refuse,
            attempts,
        }
    }

    fn ticket() -> RoomTicket {
        RoomTicket::new("wss://rt.test/pair", BookKey::new(BOOK_KEY))
    }

    async fn next_server(&mut self) -> ServerSide {
        timeout(Duration::from_secs(2), self.servers.recv())
            .await
            .expect("socket opened in time")
            .expect("connector alive")
    }

    /// Connects a fresh session and plays the backend up to `Begin`.
    async fn active_session(&mut self) -> (PairSession, ServerSide) {
        let mut session = self.client.session(Self::ticket());
        session.connect(json!({"deck": [1, 2, 3]})).unwrap();
        let server = self.next_server().await;
        server.push(json!({"phase": 4, "first": true}));
        assert!(matches!(next(&mut session).await, SessionEvent::Begin { message: None }));
        (session, server)
    }
}

async fn next(session: &mut PairSession) -> SessionEvent {
    timeout(Duration::from_secs(2), session.next_event())
        .await
        .expect("event in time")
        .expect("session alive")
}

fn seq_frame(seq: u64, data: Value) -> Value {
    json!({"seq": seq, "data": data})
}

// =========================================================================
// Booking handshake
// =========================================================================

#[tokio::test]
async fn test_connect_runs_booking_handshake_in_order() {
    let mut h = Harness::new();
    h.http.route("book/seq", 200, json!({"booked": true, "seq": 7}));

    let session = h.client.session(Harness::ticket());
    session.connect(json!({"deck": [1, 2, 3]})).unwrap();
    let server = h.next_server().await;

    let uris = h.http.seen_uris();
    assert_eq!(
        &uris[..4],
        &["book/seq", "book/release", "book/payload", "book/ready"]
    );
    let seen = h.http.seen();
    assert_eq!(
        seen[2].body.as_deref(),
        Some(json!({"payload": {"deck": [1, 2, 3]}}).to_string().as_str())
    );
    for request in &seen[..4] {
        assert_eq!(request.header("X-Book-Key"), Some(BOOK_KEY));
        assert_eq!(request.header("X-Unicorn"), None);
    }
    assert_eq!(server.url, "wss://rt.test/pair?v=web/1.0.0&key=bk-1");
}

#[tokio::test]
async fn test_unbooked_key_skips_release() {
    let mut h = Harness::new();
    let session = h.client.session(Harness::ticket());
    session.connect(json!({})).unwrap();
    let _server = h.next_server().await;

    assert_eq!(
        &h.http.seen_uris()[..3],
        &["book/seq", "book/payload", "book/ready"]
    );
}

#[tokio::test]
async fn test_socket_open_bootstraps_request_sequence() {
    let mut h = Harness::new();
    h.http.route("book/seq", 200, json!({"booked": false, "seq": 41}));
    let session = h.client.session(Harness::ticket());
    session.connect(json!({})).unwrap();
    let _server = h.next_server().await;

    let mut sequence = 0;
    for _ in 0..50 {
        sequence = h.client.http().status().await.unwrap().sequence;
        if sequence == 41 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(sequence, 41);
    assert_eq!(h.http.seen_uris().last().map(String::as_str), Some("book/seq"));
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let mut h = Harness::new();
    let session = h.client.session(Harness::ticket());
    session.connect(json!({})).unwrap();
    session.connect(json!({})).unwrap();
    let _server = h.next_server().await;
    session.connect(json!({})).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let payload_calls = h
        .http
        .seen_uris()
        .iter()
        .filter(|uri| *uri == "book/payload")
        .count();
    assert_eq!(payload_calls, 1);
    assert_eq!(h.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_handshake_failure_reports_error_and_allows_retry() {
    let mut h = Harness::new();
    h.http.route_once("book/ready", 409, json!({"reason": "busy"}));

    let mut session = h.client.session(Harness::ticket());
    session.connect(json!({})).unwrap();
    match next(&mut session).await {
        SessionEvent::Error(PairlinkError::Http(HttpError::Logic { status, .. })) => {
            assert_eq!(status, 409)
        }
        other => panic!("expected handshake error, got {other:?}"),
    }
    assert!(!session.is_finished());

    session.connect(json!({})).unwrap();
    let _server = h.next_server().await;
}

// =========================================================================
// Begin and gameplay
// =========================================================================

#[tokio::test]
async fn test_begin_once_then_turns_flow_both_ways() {
    let mut h = Harness::new();
    let mut session = h.client.session(Harness::ticket());
    session.connect(json!({})).unwrap();
    let mut server = h.next_server().await;

    server.push(json!({"phase": 2, "message": "waiting for opponent"}));
    assert!(matches!(next(&mut session).await, SessionEvent::Progress(m) if m == "waiting for opponent"));

    server.push(json!({"phase": 4, "first": true, "seed": 9}));
    assert!(matches!(next(&mut session).await, SessionEvent::Begin { message: None }));
    server.push(json!({"phase": 4}));

    server.push(seq_frame(1, json!({"move": "e4"})));
    match next(&mut session).await {
        SessionEvent::TurnMessage(turn) => assert_eq!(turn["move"], "e4"),
        other => panic!("expected turn, got {other:?}"),
    }

    session.send_turn(json!({"move": "d5"})).unwrap();
    session.send_turn(json!({"move": "c5"})).unwrap();

    let first = server.json().await;
    assert_eq!(first["seq"], 1);
    assert_eq!(first["data"]["move"], "d5");
    let expected = Signer::new(SECRET).sign_frame(&json!({"move": "d5"}), 1, BOOK_KEY);
    assert_eq!(first["sign"], expected.as_str());

    let second = server.json().await;
    assert_eq!(second["seq"], 2);
}

#[tokio::test]
async fn test_direct_frames_both_ways() {
    let mut h = Harness::new();
    let (mut session, mut server) = h.active_session().await;

    server.push_raw(r#"-{"emote":1}"#);
    match next(&mut session).await {
        SessionEvent::DirectMessage(payload) => assert_eq!(payload["emote"], 1),
        other => panic!("expected direct message, got {other:?}"),
    }

    session.send_direct(json!({"emote": 2})).unwrap();
    assert_eq!(server.frame().await, r#"-{"emote":2}"#);
}

#[tokio::test]
async fn test_not_ready_sentinel_holds_output() {
    let mut h = Harness::new();
    let (session, mut server) = h.active_session().await;

    server.push_raw("wait");
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.send_turn(json!({"move": 1})).unwrap();
    assert!(server.is_silent().await);

    server.push(json!({"phase": 4}));
    let frame = server.json().await;
    assert_eq!(frame["data"]["move"], 1);
}

#[tokio::test]
async fn test_sequence_gap_is_reported_but_not_fatal() {
    let mut h = Harness::new();
    let (mut session, server) = h.active_session().await;

    server.push(seq_frame(1, json!({"t": 1})));
    assert!(matches!(next(&mut session).await, SessionEvent::TurnMessage(_)));

    server.push(seq_frame(3, json!({"t": 3})));
    match next(&mut session).await {
        SessionEvent::Error(PairlinkError::Link(LinkError::SequenceGap { expected, received })) => {
            assert_eq!((expected, received), (2, 3));
        }
        other => panic!("expected gap error, got {other:?}"),
    }
    assert!(!session.is_finished());

    server.push(seq_frame(2, json!({"t": 2})));
    match next(&mut session).await {
        SessionEvent::TurnMessage(turn) => assert_eq!(turn["t"], 2),
        other => panic!("expected turn, got {other:?}"),
    }
}

#[tokio::test]
async fn test_error_frame_surfaces_remote_error() {
    let mut h = Harness::new();
    let (mut session, server) = h.active_session().await;

    server.push(seq_frame(1, json!({"error": "illegal move"})));
    assert!(matches!(
        next(&mut session).await,
        SessionEvent::Error(PairlinkError::Remote(e)) if e == "illegal move"
    ));
}

// =========================================================================
// Pause
// =========================================================================

#[tokio::test]
async fn test_pause_rejects_sends_until_unpaused() {
    let mut h = Harness::new();
    let (mut session, mut server) = h.active_session().await;

    server.push(json!({"pause": true, "message": "opponent left", "close": "opponent gone"}));
    match next(&mut session).await {
        SessionEvent::Paused {
            message,
            close_message,
        } => {
            assert_eq!(message.as_deref(), Some("opponent left"));
            assert_eq!(close_message.as_deref(), Some("opponent gone"));
        }
        other => panic!("expected pause, got {other:?}"),
    }
    assert!(session.is_paused());
    assert!(matches!(
        session.send_turn(json!({})),
        Err(PairlinkError::SessionPaused)
    ));
    assert!(matches!(
        session.send_direct(json!({})),
        Err(PairlinkError::SessionPaused)
    ));

    server.push(json!({"pause": false, "message": "opponent back"}));
    assert!(matches!(next(&mut session).await, SessionEvent::Unpaused { message: Some(m) } if m == "opponent back"));
    assert!(matches!(next(&mut session).await, SessionEvent::Model(Value::Null)));
    assert!(!session.is_paused());

    session.send_turn(json!({"move": 1})).unwrap();
    assert_eq!(server.json().await["seq"], 1);
}

// =========================================================================
// Reconnect
// =========================================================================

#[tokio::test]
async fn test_reconnect_replays_from_reported_baseline() {
    let mut h = Harness::new();
    let (mut session, mut server) = h.active_session().await;

    for turn in 1..=3 {
        session.send_turn(json!({"turn": turn})).unwrap();
    }
    for seq in 1..=3 {
        assert_eq!(server.json().await["seq"], seq);
    }

    server.close(None);
    let mut server = h.next_server().await;
    assert!(!server.url.contains("re=1"));

    session.send_turn(json!({"turn": 4})).unwrap();
    assert!(server.is_silent().await);

    // The peer saw our first two turns.
    server.push(json!({"code": 0, "mine": 2, "theirs": 0, "model": {"board": "b"}}));
    match next(&mut session).await {
        SessionEvent::Model(model) => assert_eq!(model["board"], "b"),
        other => panic!("expected model, got {other:?}"),
    }

    let replayed = server.json().await;
    assert_eq!(replayed["seq"], 3);
    assert_eq!(replayed["data"]["turn"], 3);
    let queued = server.json().await;
    assert_eq!(queued["seq"], 4);
    assert_eq!(queued["data"]["turn"], 4);
}

#[tokio::test]
async fn test_reconnect_with_peer_ahead_asks_for_sync() {
    let mut h = Harness::new();
    let (mut session, mut server) = h.active_session().await;

    session.send_turn(json!({"turn": 1})).unwrap();
    server.json().await;

    server.close(None);
    let server = h.next_server().await;
    server.push(json!({"code": 0, "mine": 5, "theirs": 3, "model": {"board": "full"}}));
    match next(&mut session).await {
        SessionEvent::Sync(Some(model)) => assert_eq!(model["board"], "full"),
        other => panic!("expected sync, got {other:?}"),
    }
}

#[tokio::test]
async fn test_force_disconnect_reconnects_with_flag() {
    let mut h = Harness::new();
    let (session, _server) = h.active_session().await;

    session.force_disconnect().unwrap();
    let server = h.next_server().await;
    assert!(server.url.ends_with("&re=1"));
}

#[tokio::test]
async fn test_manual_reconnect_opens_new_socket() {
    let mut h = Harness::new();
    let (session, _server) = h.active_session().await;

    session.reconnect().unwrap();
    let server = h.next_server().await;
    assert!(!server.url.contains("re=1"));
    assert_eq!(h.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_exhausted_connect_attempts_fail_once() {
    let mut h = Harness::new();
    h.refuse.store(true, Ordering::SeqCst);

    let mut session = h.client.session(Harness::ticket());
    session.connect(json!({})).unwrap();

    assert!(matches!(
        next(&mut session).await,
        SessionEvent::Error(PairlinkError::ConnectionLost(20))
    ));
    match next(&mut session).await {
        SessionEvent::Finish(finish) => assert_eq!(finish.reason, FinishReason::ConnectionLost),
        other => panic!("expected finish, got {other:?}"),
    }
    assert!(timeout(Duration::from_secs(1), session.next_event())
        .await
        .expect("channel closes")
        .is_none());
    assert_eq!(h.attempts.load(Ordering::SeqCst), 20);
    assert!(matches!(
        session.send_turn(json!({})),
        Err(PairlinkError::SessionClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stale_link_triggers_reconnect() {
    let heartbeat = HeartbeatConfig {
        interval: Duration::from_secs(1),
        stale_after: 2,
        initial_jitter: Duration::ZERO,
    };
    let mut h = Harness::with_heartbeat(heartbeat);
    let (_session, mut server) = h.active_session().await;

    let ping = server.json().await;
    assert_eq!(ping["ping"], 1);

    // No inbound traffic: the second beat declares the link stale.
    let server = h.next_server().await;
    assert!(server.url.contains("key=bk-1"));
}

// =========================================================================
// Finishing
// =========================================================================

#[tokio::test]
async fn test_terminal_frame_finishes_session() {
    let mut h = Harness::new();
    let (mut session, server) = h.active_session().await;

    server.push(json!({"code": -1, "message": "you won", "score": 3}));
    match next(&mut session).await {
        SessionEvent::Finish(finish) => {
            assert_eq!(finish.reason, FinishReason::Remote);
            assert_eq!(finish.message.as_deref(), Some("you won"));
            assert_eq!(finish.payload.as_ref().map(|p| p["score"].clone()), Some(json!(3)));
        }
        other => panic!("expected finish, got {other:?}"),
    }
    assert!(session.is_finished());
    assert!(matches!(
        session.send_turn(json!({})),
        Err(PairlinkError::SessionClosed)
    ));
    assert!(matches!(session.reconnect(), Err(PairlinkError::SessionClosed)));
    assert!(session.connect(json!({})).is_ok());
}

#[tokio::test]
async fn test_expired_close_code_is_terminal() {
    let mut h = Harness::new();
    let (mut session, server) = h.active_session().await;

    server.close(Some(4410));
    match next(&mut session).await {
        SessionEvent::Finish(finish) => assert_eq!(finish.reason, FinishReason::PairExpired),
        other => panic!("expected finish, got {other:?}"),
    }
    assert_eq!(h.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_force_destroy_finishes_immediately() {
    let mut h = Harness::new();
    let (mut session, _server) = h.active_session().await;

    session.force_destroy_client();
    assert!(session.is_finished());
    assert!(matches!(
        session.send_direct(json!({})),
        Err(PairlinkError::SessionClosed)
    ));
    match next(&mut session).await {
        SessionEvent::Finish(finish) => assert_eq!(finish.reason, FinishReason::Destroyed),
        other => panic!("expected finish, got {other:?}"),
    }
}

// =========================================================================
// Resume
// =========================================================================

#[tokio::test]
async fn test_resume_skips_handshake_and_begins_with_message() {
    let mut h = Harness::new();
    let mut session = h.client.resume(Harness::ticket());
    let server = h.next_server().await;

    assert!(server.url.ends_with("&re=1"));
    assert!(!h.http.seen_uris().iter().any(|uri| uri == "book/payload"));

    server.push(json!({"phase": 4, "message": "welcome back"}));
    assert!(matches!(
        next(&mut session).await,
        SessionEvent::Begin { message: Some(m) } if m == "welcome back"
    ));
}
