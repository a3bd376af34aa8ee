//! SSE connection configuration.

use std::time::Duration;

use bytes::Bytes;
use url::Url;

use super::types::SseRequest;
use crate::{
    error::{TransportError, TransportResult},
    reconnect::BackoffConfig,
};

/// Configuration for SSE connections.
///
/// Sensible defaults with chainable setter methods. With the defaults a
/// connection retries forever, waiting a constant 3 seconds (or whatever the
/// server suggests through `retry:`) between attempts.
#[derive(Clone, Debug)]
pub struct SseConfig {
    /// SSE endpoint URL.
    pub url: String,
    /// Query parameters appended to the URL.
    pub query: Vec<(String, String)>,
    /// HTTP method (usually GET, some APIs use POST).
    pub method: http::Method,
    /// Additional HTTP headers to include with every SSE request.
    pub headers: http::HeaderMap,
    /// Optional request body (for POST-based SSE).
    pub body: Option<Bytes>,
    /// Timeout for receiving the response head.
    pub connect_timeout: Duration,
    /// Maximum silence between body chunks before the stream is treated as
    /// broken (None = wait forever).
    pub read_timeout: Option<Duration>,
    /// Delay before reconnecting, until the server suggests another one.
    pub retry_delay: Duration,
    /// Maximum delay between reconnection attempts when backing off.
    pub reconnect_max_delay: Duration,
    /// Backoff multiplier for consecutive failed attempts (1.0 = constant).
    pub reconnect_backoff_factor: f64,
    /// Random jitter factor (0.0–1.0) for reconnection delays.
    pub reconnect_jitter: f64,
    /// Maximum number of consecutive reconnection attempts (None = infinite).
    pub reconnect_max_attempts: Option<u32>,
    /// Event ID to resume from on the very first request.
    pub last_event_id: Option<String>,
    /// Upper bound on the body bytes kept from a rejected handshake.
    pub max_error_body_bytes: usize,
    /// Maximum bytes buffered for one unterminated line before the stream is
    /// treated as broken (None = unlimited).
    pub max_line_len: Option<usize>,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            query: Vec::new(),
            method: http::Method::GET,
            headers: http::HeaderMap::new(),
            body: None,
            connect_timeout: Duration::from_secs(10),
            read_timeout: None,
            retry_delay: Duration::from_secs(3),
            reconnect_max_delay: Duration::from_secs(60),
            reconnect_backoff_factor: 1.0,
            reconnect_jitter: 0.0,
            reconnect_max_attempts: None,
            last_event_id: None,
            max_error_body_bytes: 64 * 1024,
            max_line_len: None,
        }
    }
}

impl SseConfig {
    /// Create a new SSE configuration with the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Append a query parameter.
    #[must_use]
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set the HTTP method (e.g., `POST` for POST-based SSE).
    #[must_use]
    pub fn method(mut self, method: http::Method) -> Self {
        self.method = method;
        self
    }

    /// Set additional HTTP headers.
    #[must_use]
    pub fn headers(mut self, headers: http::HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Add a single HTTP header.
    #[must_use]
    pub fn header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the request body (for POST-based SSE).
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the initial retry delay.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the maximum reconnection delay.
    #[must_use]
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    /// Set the reconnection backoff factor.
    #[must_use]
    pub fn reconnect_backoff_factor(mut self, factor: f64) -> Self {
        self.reconnect_backoff_factor = factor;
        self
    }

    /// Set the reconnection jitter factor.
    #[must_use]
    pub fn reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    /// Set the maximum reconnection attempts.
    #[must_use]
    pub fn reconnect_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.reconnect_max_attempts = attempts;
        self
    }

    /// Resume from a known event ID.
    #[must_use]
    pub fn last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = Some(id.into());
        self
    }

    /// Set the bound on captured error body bytes.
    #[must_use]
    pub fn max_error_body_bytes(mut self, limit: usize) -> Self {
        self.max_error_body_bytes = limit;
        self
    }

    /// Set the line length limit.
    #[must_use]
    pub fn max_line_len(mut self, limit: Option<usize>) -> Self {
        self.max_line_len = limit;
        self
    }

    pub(crate) fn backoff(&self, retry_delay: Duration) -> BackoffConfig {
        BackoffConfig {
            initial_delay: retry_delay,
            max_delay: self.reconnect_max_delay,
            factor: self.reconnect_backoff_factor,
            jitter: self.reconnect_jitter,
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.read_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err("Read timeout must be > 0".to_string());
        }
        if self.max_line_len == Some(0) {
            return Err("Max line length must be > 0".to_string());
        }
        self.backoff(self.retry_delay).validate()
    }

    /// Parse the URL and append the query parameters.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] if the URL does not parse or is
    /// not `http`/`https`.
    pub fn build_url(&self) -> TransportResult<Url> {
        let mut url =
            Url::parse(&self.url).map_err(|e| TransportError::invalid_url(&self.url, e))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransportError::invalid_url(
                &self.url,
                format!("unsupported scheme {:?}", url.scheme()),
            ));
        }

        if !self.query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(self.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        Ok(url)
    }

    /// Build the first request of a connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] for a malformed URL and
    /// [`TransportError::Config`] for invalid settings.
    pub fn build_request(&self) -> TransportResult<SseRequest> {
        let url = self.build_url()?;
        self.validate().map_err(TransportError::config)?;

        let mut request = SseRequest::new(url);
        request.method = self.method.clone();
        // User headers replace the defaults of the same name.
        request.headers.extend(self.headers.clone());
        request.body = self.body.clone();
        request.set_last_event_id(self.last_event_id.as_deref());
        Ok(request)
    }
}
