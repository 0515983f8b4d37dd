//! Request and frame signing.
//!
//! HTTP control requests and sequenced socket frames share one template:
//!
//! ```text
//! hex(SHA-256(uri ‖ body-json? ‖ seq ‖ token? ‖ secret))
//! ```
//!
//! The parts are concatenated without separators. HTTP requests use the
//! session token (or the booking key during the handshake); socket frames
//! use an empty URI and the booking key.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// The JSON text of a body as it enters the signature, or `None` when the
/// body is left out of the template.
///
/// Absent bodies, `null`, `{}` and `[]` are all left out. Any other value,
/// including scalars, is included as its compact JSON serialization. The
/// same text must go on the wire, so callers send exactly what this returns.
pub fn canonical_body(body: Option<&Value>) -> Option<String> {
    match body? {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        Value::Array(items) if items.is_empty() => None,
        other => Some(other.to_string()),
    }
}

/// Computes the signature for one request or frame.
pub fn request_signature(
    uri: &str,
    body: Option<&Value>,
    seq: u64,
    token: Option<&str>,
    secret: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(uri.as_bytes());
    if let Some(body) = canonical_body(body) {
        hasher.update(body.as_bytes());
    }
    hasher.update(seq.to_string().as_bytes());
    if let Some(token) = token {
        hasher.update(token.as_bytes());
    }
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Holds the shared secret and signs with it.
///
/// Both the HTTP dispatcher and the session link own a `Signer`. The secret
/// never leaves this struct, and `Debug` redacts it.
#[derive(Clone)]
pub struct Signer {
    secret: String,
}

impl Signer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Signs an HTTP request.
    pub fn sign_request(
        &self,
        uri: &str,
        body: Option<&Value>,
        seq: u64,
        token: Option<&str>,
    ) -> String {
        request_signature(uri, body, seq, token, &self.secret)
    }

    /// Signs a sequenced socket frame's payload with the booking key.
    pub fn sign_frame(&self, payload: &Value, seq: u64, book_key: &str) -> String {
        request_signature("", Some(payload), seq, Some(book_key), &self.secret)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("secret", &"<redacted>").finish()
    }
}
