//! Integration tests for the request dispatcher.
//!
//! A scripted [`MockHttp`] stands in for the network: it answers from a
//! queue of canned responses, records every signed request, and tracks
//! how many requests are in flight at once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pairlink_http::{
    AuthFailure, ClientError, HttpClient, HttpConfig, HttpError, HttpRequest, HttpResponse,
    QueueOrder, RetryBudget, ServerError, SignedRequest, spawn_dispatcher,
};
use pairlink_protocol::BookKey;
use pairlink_protocol::sign::request_signature;
use serde_json::json;

// =========================================================================
// Helpers
// =========================================================================

#[derive(Clone, Default)]
struct MockHttp {
    inner: Arc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    script: Mutex<VecDeque<Result<HttpResponse, ClientError>>>,
    seen: Mutex<Vec<SignedRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Mutex<Duration>,
}

impl MockHttp {
    fn with_latency(latency: Duration) -> Self {
        let mock = Self::default();
        *mock.inner.latency.lock().unwrap() = latency;
        mock
    }

    fn respond(&self, status: u16, body: &str) -> &Self {
        self.inner.script.lock().unwrap().push_back(Ok(HttpResponse {
            status,
            body: body.to_string(),
        }));
        self
    }

    fn fail(&self, err: ClientError) -> &Self {
        self.inner.script.lock().unwrap().push_back(Err(err));
        self
    }

    fn seen(&self) -> Vec<SignedRequest> {
        self.inner.seen.lock().unwrap().clone()
    }

    fn seen_uris(&self) -> Vec<String> {
        self.seen()
            .into_iter()
            .map(|r| r.url.rsplit('/').next().unwrap_or_default().to_string())
            .collect()
    }

    fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }
}

impl HttpClient for MockHttp {
    async fn execute(&self, request: SignedRequest) -> Result<HttpResponse, ClientError> {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.inner.seen.lock().unwrap().push(request);

        let latency = *self.inner.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let next = self.inner.script.lock().unwrap().pop_front();
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        next.unwrap_or_else(|| {
            Ok(HttpResponse {
                status: 200,
                body: "{}".to_string(),
            })
        })
    }
}

fn config() -> HttpConfig {
    HttpConfig::new("https://api.test/v1/", "ios", "1.4.0", "s3cret")
}

// =========================================================================
// Mutual exclusion
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_request_at_most_one_in_flight() {
    let mock = MockHttp::with_latency(Duration::from_millis(50));
    let handle = spawn_dispatcher(mock.clone(), config());

    let mut tasks = Vec::new();
    for i in 0..5 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            handle.request(HttpRequest::get(format!("r{i}"))).await
        }));
    }
    for task in tasks {
        task.await.unwrap().expect("request should succeed");
    }

    assert_eq!(mock.seen().len(), 5);
    assert_eq!(mock.max_in_flight(), 1);
}

// =========================================================================
// Queue order
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_request_fifo_order() {
    let mock = MockHttp::with_latency(Duration::from_millis(100));
    let handle = spawn_dispatcher(mock.clone(), config());

    let first = tokio::spawn({
        let handle = handle.clone();
        async move { handle.request(HttpRequest::get("a")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let (b, c) = tokio::join!(
        handle.request(HttpRequest::get("b")),
        handle.request(HttpRequest::get("c")),
    );
    first.await.unwrap().unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(mock.seen_uris(), vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_request_lifo_order_pops_newest_first() {
    let mock = MockHttp::with_latency(Duration::from_millis(100));
    let handle = spawn_dispatcher(
        mock.clone(),
        HttpConfig {
            order: QueueOrder::Lifo,
            ..config()
        },
    );

    let first = tokio::spawn({
        let handle = handle.clone();
        async move { handle.request(HttpRequest::get("a")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let (b, c) = tokio::join!(
        handle.request(HttpRequest::get("b")),
        handle.request(HttpRequest::get("c")),
    );
    first.await.unwrap().unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(mock.seen_uris(), vec!["a", "c", "b"]);
}

// =========================================================================
// Fatal errors drop the queue
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_fatal_error_fails_every_pending_request_once() {
    let mock = MockHttp::with_latency(Duration::from_millis(20));
    mock.respond(500, r#"{"index":2}"#);
    let handle = spawn_dispatcher(mock.clone(), config());

    let (a, b, c) = tokio::join!(
        handle.request(HttpRequest::get("a")),
        handle.request(HttpRequest::get("b")),
        handle.request(HttpRequest::get("c")),
    );

    assert!(matches!(a, Err(HttpError::Server(ServerError::SessionDead))));
    assert!(matches!(b, Err(HttpError::EarlierRequestFailed)));
    assert!(matches!(c, Err(HttpError::EarlierRequestFailed)));
    assert_eq!(mock.seen().len(), 1, "dropped requests are never sent");

    // The dispatcher keeps serving new requests afterwards.
    handle
        .request(HttpRequest::get("d"))
        .await
        .expect("later request should succeed");
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_is_fatal() {
    let mock = MockHttp::with_latency(Duration::from_millis(20));
    mock.respond(401, r#"{"index":1}"#);
    let handle = spawn_dispatcher(mock.clone(), config());

    let (a, b) = tokio::join!(
        handle.request(HttpRequest::get("a")),
        handle.request(HttpRequest::get("b")),
    );

    assert!(matches!(
        a,
        Err(HttpError::Unauthorized(AuthFailure::ParallelRequest))
    ));
    assert!(matches!(b, Err(HttpError::EarlierRequestFailed)));
}

#[tokio::test(start_paused = true)]
async fn test_logic_error_only_fails_its_request() {
    let mock = MockHttp::with_latency(Duration::from_millis(20));
    mock.respond(404, "missing");
    let handle = spawn_dispatcher(mock.clone(), config());

    let (a, b) = tokio::join!(
        handle.request(HttpRequest::get("a")),
        handle.request(HttpRequest::get("b")),
    );

    assert!(matches!(a, Err(HttpError::Logic { status: 404, .. })));
    assert!(b.is_ok());
}

// =========================================================================
// Retries
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_timeout_retried_twice_then_succeeds() {
    let mock = MockHttp::default();
    mock.fail(ClientError::Timeout)
        .fail(ClientError::Timeout)
        .respond(200, r#"{"ok":true}"#);
    let handle = spawn_dispatcher(mock.clone(), config());

    let body = handle.request(HttpRequest::get("a")).await.unwrap();
    assert_eq!(body, json!({"ok": true}));
    assert_eq!(mock.seen().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_gives_up_after_cap() {
    let mock = MockHttp::default();
    for _ in 0..3 {
        mock.fail(ClientError::Timeout);
    }
    let handle = spawn_dispatcher(mock.clone(), config());

    let result = handle.request(HttpRequest::get("a")).await;
    assert!(matches!(result, Err(HttpError::Timeout { attempts: 3 })));
    assert_eq!(mock.seen().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_connection_error_is_not_retried() {
    let mock = MockHttp::default();
    mock.fail(ClientError::Connection("refused".into()));
    let handle = spawn_dispatcher(mock.clone(), config());

    let result = handle.request(HttpRequest::get("a")).await;
    assert!(matches!(result, Err(HttpError::Connection(ref r)) if r == "refused"));
    assert_eq!(mock.seen().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_overload_requeues_after_delay() {
    let mock = MockHttp::default();
    mock.respond(503, r#"{"index":4}"#)
        .respond(200, r#"{"done":1}"#);
    let handle = spawn_dispatcher(mock.clone(), config());
    let started = tokio::time::Instant::now();

    let body = handle.request(HttpRequest::get("a")).await.unwrap();

    assert_eq!(body, json!({"done": 1}));
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(mock.seen_uris(), vec!["a", "a"]);
}

#[tokio::test(start_paused = true)]
async fn test_overload_budget_exhausted_is_not_fatal() {
    let mock = MockHttp::with_latency(Duration::from_millis(20));
    mock.respond(503, r#"{"index":4}"#)
        .respond(503, r#"{"index":4}"#);
    let handle = spawn_dispatcher(mock.clone(), config());

    let (a, b) = tokio::join!(
        handle.request(HttpRequest::get("a").with_retry_budget(RetryBudget::Limited(1))),
        handle.request(HttpRequest::get("b")),
    );

    assert!(matches!(
        a,
        Err(HttpError::OverloadRetriesExhausted { retries: 1 })
    ));
    assert!(b.is_ok());
}

// =========================================================================
// Signing and headers
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_headers_and_signature() {
    let mock = MockHttp::default();
    let handle = spawn_dispatcher(
        mock.clone(),
        HttpConfig {
            session_token: Some("tok".into()),
            ..config()
        },
    );

    let body = json!({"score": 12});
    handle
        .request(HttpRequest::post("stats/submit", body.clone()))
        .await
        .unwrap();

    let sent = &mock.seen()[0];
    assert_eq!(sent.url, "https://api.test/v1/stats/submit");
    assert_eq!(sent.body.as_deref(), Some(r#"{"score":12}"#));
    assert_eq!(sent.header("Content-Type"), Some("application/json; charset=UTF-8"));
    assert_eq!(sent.header("X-Platform-Version"), Some("ios/1.4.0"));
    assert_eq!(sent.header("X-Req-Seq"), Some("1"));
    assert_eq!(sent.header("X-Unicorn"), Some("tok"));
    assert_eq!(sent.header("X-Book-Key"), None);
    assert_eq!(
        sent.header("X-Request-Sign"),
        Some(request_signature("stats/submit", Some(&body), 1, Some("tok"), "s3cret").as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn test_book_key_replaces_session_token() {
    let mock = MockHttp::default();
    let handle = spawn_dispatcher(
        mock.clone(),
        HttpConfig {
            session_token: Some("tok".into()),
            ..config()
        },
    );

    handle
        .request(HttpRequest::get("book/seq").book_key(BookKey::new("bk1")))
        .await
        .unwrap();

    let sent = &mock.seen()[0];
    assert_eq!(sent.header("X-Book-Key"), Some("bk1"));
    assert_eq!(sent.header("X-Unicorn"), None);
    assert_eq!(sent.body, None);
    assert_eq!(
        sent.header("X-Request-Sign"),
        Some(request_signature("book/seq", None, 1, Some("bk1"), "s3cret").as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn test_sequence_increments_per_send() {
    let mock = MockHttp::default();
    mock.fail(ClientError::Timeout);
    let handle = spawn_dispatcher(mock.clone(), config());

    handle.request(HttpRequest::get("a")).await.unwrap();
    handle.request(HttpRequest::get("b")).await.unwrap();

    let seqs: Vec<_> = mock
        .seen()
        .iter()
        .map(|r| r.header("X-Req-Seq").unwrap().to_string())
        .collect();
    // The timed-out attempt used 1, its retry 2, the next request 3.
    assert_eq!(seqs, vec!["1", "2", "3"]);
}

#[tokio::test(start_paused = true)]
async fn test_new_session_token_resets_sequence() {
    let mock = MockHttp::default();
    mock.respond(200, "{}")
        .respond(200, r#"{"unicorn":"tok2"}"#);
    let handle = spawn_dispatcher(mock.clone(), config());

    handle.request(HttpRequest::get("a")).await.unwrap();
    handle.request(HttpRequest::post("login", json!({"id": 7}))).await.unwrap();
    handle.request(HttpRequest::get("b")).await.unwrap();

    let status = handle.status().await.unwrap();
    assert!(status.has_session_token);
    assert_eq!(status.sequence, 2);

    let last = mock.seen().pop().unwrap();
    assert_eq!(last.header("X-Req-Seq"), Some("1"));
    assert_eq!(last.header("X-Unicorn"), Some("tok2"));
}

#[tokio::test(start_paused = true)]
async fn test_set_sequence_adopts_baseline() {
    let mock = MockHttp::default();
    let handle = spawn_dispatcher(mock.clone(), config());

    handle.set_sequence(42).await.unwrap();
    handle.request(HttpRequest::get("a")).await.unwrap();

    assert_eq!(mock.seen()[0].header("X-Req-Seq"), Some("42"));
    assert_eq!(handle.status().await.unwrap().sequence, 43);
}

#[tokio::test(start_paused = true)]
async fn test_set_session_token_used_by_next_request() {
    let mock = MockHttp::default();
    let handle = spawn_dispatcher(mock.clone(), config());

    handle.request(HttpRequest::get("a")).await.unwrap();
    handle.set_session_token(Some("late".into())).await.unwrap();
    handle.request(HttpRequest::get("b")).await.unwrap();

    let seen = mock.seen();
    assert_eq!(seen[0].header("X-Unicorn"), None);
    assert_eq!(seen[1].header("X-Unicorn"), Some("late"));
}
