//! Requests as callers build them, and as they go on the wire.

use pairlink_protocol::BookKey;
use serde_json::Value;

/// HTTP method. The backend only uses these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// How many times an overloaded request may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryBudget {
    /// Retry until the dispatcher's `overload_retry_cap`.
    #[default]
    UntilCap,
    /// Retry at most this many times (still bounded by the cap).
    Limited(u32),
}

impl RetryBudget {
    /// Whether another retry is allowed after `done` retries.
    pub fn allows(self, done: u32, cap: u32) -> bool {
        match self {
            RetryBudget::UntilCap => done < cap,
            RetryBudget::Limited(limit) => done < limit.min(cap),
        }
    }
}

/// One control call as the caller describes it.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    /// Path relative to the base URL, e.g. `book/ready`.
    pub uri: String,
    pub body: Option<Value>,
    /// Authenticates with a booking key instead of the session token.
    pub book_key: Option<BookKey>,
    pub retry: RetryBudget,
}

impl HttpRequest {
    pub fn get(uri: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            uri: uri.into(),
            body: None,
            book_key: None,
            retry: RetryBudget::default(),
        }
    }

    pub fn post(uri: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            uri: uri.into(),
            body: Some(body),
            book_key: None,
            retry: RetryBudget::default(),
        }
    }

    /// Sign and authenticate with `key` (sent as `X-Book-Key`).
    pub fn book_key(mut self, key: BookKey) -> Self {
        self.book_key = Some(key);
        self
    }

    pub fn with_retry_budget(mut self, retry: RetryBudget) -> Self {
        self.retry = retry;
        self
    }
}

/// A request ready for the wire: absolute URL, body text and every header,
/// signature included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    pub headers: Vec<(&'static str, String)>,
}

impl SignedRequest {
    /// Looks up a header by exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_PLATFORM_VERSION: &str = "X-Platform-Version";
pub const HEADER_REQ_SEQ: &str = "X-Req-Seq";
pub const HEADER_REQUEST_SIGN: &str = "X-Request-Sign";
pub const HEADER_SESSION_TOKEN: &str = "X-Unicorn";
pub const HEADER_BOOK_KEY: &str = "X-Book-Key";

pub(crate) const CONTENT_TYPE_JSON: &str = "application/json; charset=UTF-8";
