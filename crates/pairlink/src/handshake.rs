//! The booking handshake and the per-socket bootstrap call.
//!
//! Before the first socket opens, the booking key has to be prepared over
//! HTTP:
//!
//! ```text
//! GET  book/seq       → { "booked": bool, "seq": n }
//! POST book/release   (only if a previous booking is still held)
//! POST book/payload   { "payload": <application payload> }
//! POST book/ready
//! ```
//!
//! Every call carries the booking key instead of a session token. All of
//! them go through the dispatcher, so they are signed and sequenced like
//! any other control call and never overlap with one.

use pairlink_http::{DispatcherHandle, HttpError, HttpRequest};
use pairlink_protocol::BookKey;
use serde_json::{Value, json};
use tracing::{debug, info};

pub const BOOK_SEQ_URI: &str = "book/seq";
pub const BOOK_RELEASE_URI: &str = "book/release";
pub const BOOK_PAYLOAD_URI: &str = "book/payload";
pub const BOOK_READY_URI: &str = "book/ready";

/// Runs the booking handshake for `book_key`.
pub async fn run_handshake(
    http: &DispatcherHandle,
    book_key: &BookKey,
    payload: Value,
) -> Result<(), HttpError> {
    let status = http
        .request(HttpRequest::get(BOOK_SEQ_URI).book_key(book_key.clone()))
        .await?;

    if status.get("booked").and_then(Value::as_bool).unwrap_or(false) {
        debug!(%book_key, "releasing previous booking");
        http.request(HttpRequest::post(BOOK_RELEASE_URI, Value::Null).book_key(book_key.clone()))
            .await?;
    }

    http.request(
        HttpRequest::post(BOOK_PAYLOAD_URI, json!({ "payload": payload })).book_key(book_key.clone()),
    )
    .await?;
    http.request(HttpRequest::post(BOOK_READY_URI, Value::Null).book_key(book_key.clone()))
        .await?;

    info!(%book_key, "booking handshake complete");
    Ok(())
}

/// Fetches the request-sequence baseline after a socket opened and hands
/// it to the dispatcher. Returns the adopted value, if the backend sent one.
pub async fn bootstrap_sequence(
    http: &DispatcherHandle,
    book_key: &BookKey,
) -> Result<Option<u64>, HttpError> {
    let status = http
        .request(HttpRequest::get(BOOK_SEQ_URI).book_key(book_key.clone()))
        .await?;

    let seq = status.get("seq").and_then(Value::as_u64);
    if let Some(seq) = seq {
        debug!(%book_key, seq, "adopting request sequence");
        http.set_sequence(seq).await?;
    }
    Ok(seq)
}
