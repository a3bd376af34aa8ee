//! Error handling for the SSE transport.
//!
//! Only [`TransportError::InvalidUrl`] and [`TransportError::Config`] are ever
//! returned synchronously (from [`SseClient::open`](crate::sse::SseClient::open)).
//! Everything that goes wrong once a connection is running is handed to
//! [`SseListener::on_transport_error`](crate::sse::SseListener::on_transport_error)
//! as data instead.

use std::time::Duration;

use thiserror::Error;

/// The main result type used throughout the transport layer.
pub type TransportResult<T> = Result<T, TransportError>;

/// Comprehensive error type for all transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The target URL could not be parsed or uses an unsupported scheme.
    #[error("Invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// HTTP request errors (connect, TLS, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered the handshake with a non-success status.
    #[error("SSE handshake failed with status {status}")]
    InvalidStatus { status: http::StatusCode },

    /// The server answered with something other than `text/event-stream`.
    #[error("SSE handshake returned unexpected content type {content_type:?}")]
    InvalidContentType { content_type: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The server closed the event stream.
    #[error("SSE stream ended")]
    StreamEnded,

    /// A line grew past the configured limit without a terminator.
    #[error("SSE line exceeded {limit} bytes without a terminator")]
    LineTooLong { limit: usize },

    /// The connection has already been shut down.
    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },
}

impl TransportError {
    /// Create an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an invalid status error.
    pub fn sse_invalid_status(status: http::StatusCode) -> Self {
        Self::InvalidStatus { status }
    }

    /// Create an invalid content type error.
    pub fn sse_invalid_content_type(content_type: impl Into<String>) -> Self {
        Self::InvalidContentType {
            content_type: content_type.into(),
        }
    }

    /// Create a stream ended error.
    pub fn sse_stream_ended() -> Self {
        Self::StreamEnded
    }

    /// Create a line too long error.
    pub fn sse_line_too_long(limit: usize) -> Self {
        Self::LineTooLong { limit }
    }

    /// Create a connection closed error.
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Whether this error happened after a response was received (as opposed
    /// to DNS, connect, TLS or timeout failures).
    pub fn is_handshake_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidStatus { .. } | Self::InvalidContentType { .. }
        )
    }
}
