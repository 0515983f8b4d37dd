//! The HTTP client seam.
//!
//! The dispatcher only needs "send this signed request, give me a status
//! and a body". [`HttpClient`] is that seam: [`ReqwestHttpClient`] in
//! production, scripted mocks in tests.

use std::future::Future;
#[cfg(feature = "reqwest")]
use std::time::Duration;

use crate::{ClientError, SignedRequest};

/// A minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Sends signed requests.
///
/// Returns `impl Future + Send` so the dispatcher task can be spawned for
/// any client. Implementations can write `async fn`.
pub trait HttpClient: Send + Sync + 'static {
    /// Sends one request. Any HTTP status is `Ok`; `Err` means no status
    /// came back at all.
    fn execute(
        &self,
        request: SignedRequest,
    ) -> impl Future<Output = Result<HttpResponse, ClientError>> + Send;
}

#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Connection(e.to_string())
        }
    }
}

/// A [`reqwest`]-backed [`HttpClient`].
///
/// Two timeouts apply: `response_timeout` bounds the wait for the status
/// line and headers, `deadline` bounds the whole exchange.
#[cfg(feature = "reqwest")]
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
    response_timeout: Duration,
}

#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
    pub fn new(response_timeout: Duration, deadline: Duration) -> Self {
        Self {
            inner: reqwest::Client::builder()
                .timeout(deadline)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            response_timeout,
        }
    }

    /// Client using the timeouts from an [`HttpConfig`](crate::HttpConfig).
    pub fn from_config(config: &crate::HttpConfig) -> Self {
        Self::new(config.response_timeout, config.deadline)
    }
}

#[cfg(feature = "reqwest")]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: SignedRequest) -> Result<HttpResponse, ClientError> {
        let mut builder = match request.method {
            crate::Method::Get => self.inner.get(&request.url),
            crate::Method::Post => self.inner.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = tokio::time::timeout(self.response_timeout, builder.send())
            .await
            .map_err(|_| ClientError::Timeout)??;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(HttpResponse { status, body })
    }
}
