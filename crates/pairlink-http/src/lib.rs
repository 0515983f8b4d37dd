//! Request queue and signed HTTP transport for Pairlink.
//!
//! Control calls (the booking handshake, the sequence bootstrap) go through
//! a single dispatcher per client:
//!
//! - **Queue** ([`RequestQueue`], [`QueueOrder`]): one request in flight,
//!   the rest wait.
//! - **Signing**: every request carries `X-Req-Seq` and `X-Request-Sign`
//!   computed from a rolling sequence and the shared secret.
//! - **Classification** ([`classify`]): success, overload (requeue after a
//!   delay) or failure; fatal failures fail every queued request.
//! - **Client seam** ([`HttpClient`], [`ReqwestHttpClient`]).
//!
//! # Feature Flags
//!
//! - `reqwest` (default): [`ReqwestHttpClient`]

mod classify;
mod client;
mod config;
mod dispatcher;
mod error;
mod queue;
mod request;

pub use classify::{Outcome, classify};
#[cfg(feature = "reqwest")]
pub use client::ReqwestHttpClient;
pub use client::{HttpClient, HttpResponse};
pub use config::HttpConfig;
pub use dispatcher::{DispatcherHandle, DispatcherStatus, INITIAL_SEQUENCE, spawn_dispatcher};
pub use error::{AuthFailure, ClientError, HttpError, ServerError};
pub use queue::{PendingRequest, QueueOrder, RequestQueue};
pub use request::{
    HEADER_BOOK_KEY, HEADER_CONTENT_TYPE, HEADER_PLATFORM_VERSION, HEADER_REQ_SEQ,
    HEADER_REQUEST_SIGN, HEADER_SESSION_TOKEN, HttpRequest, Method, RetryBudget, SignedRequest,
};
