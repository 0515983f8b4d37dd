//! Dispatcher configuration.

use std::fmt;
use std::time::Duration;

use crate::QueueOrder;

/// Configuration for one request dispatcher.
#[derive(Clone)]
pub struct HttpConfig {
    /// Backend base URL, e.g. `https://api.example.net/v1`.
    pub base_url: String,
    /// Platform identifier sent in `X-Platform-Version`.
    pub platform: String,
    /// Client semantic version sent in `X-Platform-Version`.
    pub version: String,
    /// Shared signing secret.
    pub secret: String,
    /// Session token ("unicorn") if the account layer already has one.
    pub session_token: Option<String>,
    /// Order in which queued requests are popped.
    pub order: QueueOrder,
    /// Extra attempts after a timeout before giving up. Default: 2.
    pub timeout_retries: u32,
    /// Pause before retrying an overloaded request. Default: 3 s.
    pub overload_retry_delay: Duration,
    /// Most overload retries any one request gets. Default: 10.
    pub overload_retry_cap: u32,
    /// Time allowed until the response headers arrive. Default: 10 s.
    pub response_timeout: Duration,
    /// Time allowed for the whole exchange, body included. Default: 30 s.
    pub deadline: Duration,
    /// Capacity of the command channel. Default: 64.
    pub channel_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            platform: "unknown".to_string(),
            version: "0.0.0".to_string(),
            secret: String::new(),
            session_token: None,
            order: QueueOrder::default(),
            timeout_retries: 2,
            overload_retry_delay: Duration::from_secs(3),
            overload_retry_cap: 10,
            response_timeout: Duration::from_secs(10),
            deadline: Duration::from_secs(30),
            channel_size: 64,
        }
    }
}

impl HttpConfig {
    /// Config for one backend with default timing.
    pub fn new(
        base_url: impl Into<String>,
        platform: impl Into<String>,
        version: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            platform: platform.into(),
            version: version.into(),
            secret: secret.into(),
            ..Default::default()
        }
    }

    /// `platform/version`, as sent in `X-Platform-Version` and the socket URL.
    pub fn platform_version(&self) -> String {
        format!("{}/{}", self.platform, self.version)
    }

    /// Joins the base URL and a request URI.
    pub fn url_for(&self, uri: &str) -> String {
        format!("{}/{}", self.base_url, uri.trim_start_matches('/'))
    }

    /// Fix out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`spawn_dispatcher`](crate::spawn_dispatcher):
    /// - trailing `/` stripped from `base_url`,
    /// - `deadline` raised to at least `response_timeout`,
    /// - `channel_size` raised to at least 1.
    pub fn validated(mut self) -> Self {
        while self.base_url.ends_with('/') {
            self.base_url.pop();
        }
        if self.deadline < self.response_timeout {
            tracing::warn!(
                deadline_ms = self.deadline.as_millis() as u64,
                response_timeout_ms = self.response_timeout.as_millis() as u64,
                "deadline shorter than response timeout, raising it"
            );
            self.deadline = self.response_timeout;
        }
        self.channel_size = self.channel_size.max(1);
        self
    }
}

impl fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConfig")
            .field("base_url", &self.base_url)
            .field("platform", &self.platform)
            .field("version", &self.version)
            .field("secret", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("order", &self.order)
            .field("timeout_retries", &self.timeout_retries)
            .field("overload_retry_delay", &self.overload_retry_delay)
            .field("overload_retry_cap", &self.overload_retry_cap)
            .field("response_timeout", &self.response_timeout)
            .field("deadline", &self.deadline)
            .finish()
    }
}
