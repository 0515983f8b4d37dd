//! Error types for the HTTP layer.

/// Errors a queued request can complete with.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// No response within the response timeout, after every timeout retry.
    #[error("request timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// The request never produced an HTTP status (DNS, TCP, TLS...).
    #[error("connection error: {0}")]
    Connection(String),

    /// Non-200 status without a server error index.
    #[error("server answered {status}: {body}")]
    Logic { status: u16, body: String },

    /// Non-200 status with a server error index.
    #[error("server error: {0}")]
    Server(ServerError),

    /// 401, classified by the server's index.
    #[error("unauthorized: {0}")]
    Unauthorized(AuthFailure),

    /// The backend stayed overloaded for the whole retry budget.
    #[error("server overloaded, gave up after {retries} retries")]
    OverloadRetriesExhausted { retries: u32 },

    /// Another request failed fatally while this one was queued.
    #[error("an earlier request failed")]
    EarlierRequestFailed,

    /// A 200 response whose body was not JSON.
    #[error("response body is not JSON: {0}")]
    Decode(#[source] serde_json::Error),

    /// The dispatcher task is gone.
    #[error("request dispatcher shut down")]
    Shutdown,
}

impl HttpError {
    /// Whether this error empties the whole queue.
    ///
    /// Every 401 and every indexed server error is fatal, except overload
    /// which is retried. Timeouts, connection errors and plain logic errors
    /// only fail the request that hit them.
    pub fn is_queue_fatal(&self) -> bool {
        match self {
            HttpError::Unauthorized(_) => true,
            HttpError::Server(e) => !matches!(e, ServerError::Overloaded),
            _ => false,
        }
    }
}

/// Server error selected by the numeric `index` of an error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ServerError {
    #[error("request signature rejected")]
    SignatureInvalid,
    #[error("session is dead")]
    SessionDead,
    #[error("backend in maintenance")]
    Maintenance,
    #[error("backend overloaded")]
    Overloaded,
    #[error("client version too old")]
    OutOfDate,
    #[error("unknown server error index {0}")]
    Unknown(i64),
}

impl ServerError {
    pub fn from_index(index: i64) -> Self {
        match index {
            1 => ServerError::SignatureInvalid,
            2 => ServerError::SessionDead,
            3 => ServerError::Maintenance,
            4 => ServerError::Overloaded,
            5 => ServerError::OutOfDate,
            other => ServerError::Unknown(other),
        }
    }
}

/// Reason for a 401, selected by the body's `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    /// Another request with the same session was in flight.
    #[error("parallel request prevented")]
    ParallelRequest,
    #[error("session is dead")]
    SessionDead,
    #[error("authentication problem")]
    Generic,
}

impl AuthFailure {
    pub fn from_index(index: Option<i64>) -> Self {
        match index {
            Some(1) => AuthFailure::ParallelRequest,
            Some(2) => AuthFailure::SessionDead,
            _ => AuthFailure::Generic,
        }
    }
}

/// Errors an [`HttpClient`](crate::HttpClient) reports when no HTTP status
/// came back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("timed out")]
    Timeout,
    #[error("{0}")]
    Connection(String),
}
