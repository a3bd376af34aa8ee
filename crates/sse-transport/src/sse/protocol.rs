//! Listener trait for SSE connections.
//!
//! Provides the [`SseListener`] trait through which a connection reports
//! everything it sees and asks the caller for retry decisions.

use std::time::Duration;

use super::{
    parse::Event,
    types::{ResponseSnapshot, SseRequest},
};
use crate::error::TransportError;

/// Callbacks for one SSE connection.
///
/// Every method has a default, so implementors only override what they care
/// about. Callbacks run on the connection's background task, one at a time,
/// in stream order. They must not block: a slow callback stalls reading.
///
/// Once [`on_closed`](SseListener::on_closed) has run, no other method is
/// called again.
///
/// A callback may close its own connection, in which case `on_closed` runs
/// before [`SseHandle::close`](super::SseHandle::close) returns. It may also
/// close other connections; if one of those is itself inside a callback at
/// that moment, the close takes effect at once but its `on_closed` is
/// delivered later, from that connection's task.
pub trait SseListener: Send + Sync + 'static {
    /// A connection attempt succeeded (status 2xx, `text/event-stream`).
    ///
    /// Called once per successful attempt, before any message or comment
    /// from that attempt.
    fn on_open(&self) {}

    /// A complete event was parsed.
    fn on_message(&self, _event: &Event) {}

    /// A comment line was parsed.
    fn on_comment(&self, _comment: &str) {}

    /// The server suggested a new retry delay.
    ///
    /// Return `true` to adopt it as this connection's retry delay.
    fn on_retry_time_suggested(&self, _delay: Duration) -> bool {
        true
    }

    /// The connection attempt failed or the stream broke.
    ///
    /// `response` is present when the server answered the handshake with an
    /// unacceptable status or content type. Return `true` to retry after the
    /// retry delay, `false` to give up.
    fn on_transport_error(
        &self,
        _error: &TransportError,
        _response: Option<&ResponseSnapshot>,
    ) -> bool {
        true
    }

    /// The connection reached a terminal state.
    fn on_closed(&self) {}

    /// About to retry with `request`, which already carries the current
    /// `Last-Event-ID`.
    ///
    /// Return the request to send, or `None` to give up instead.
    fn on_before_retry(&self, request: &SseRequest) -> Option<SseRequest> {
        Some(request.clone())
    }
}

impl<L: SseListener> SseListener for std::sync::Arc<L> {
    fn on_open(&self) {
        (**self).on_open();
    }

    fn on_message(&self, event: &Event) {
        (**self).on_message(event);
    }

    fn on_comment(&self, comment: &str) {
        (**self).on_comment(comment);
    }

    fn on_retry_time_suggested(&self, delay: Duration) -> bool {
        (**self).on_retry_time_suggested(delay)
    }

    fn on_transport_error(
        &self,
        error: &TransportError,
        response: Option<&ResponseSnapshot>,
    ) -> bool {
        (**self).on_transport_error(error, response)
    }

    fn on_closed(&self) {
        (**self).on_closed();
    }

    fn on_before_retry(&self, request: &SseRequest) -> Option<SseRequest> {
        (**self).on_before_retry(request)
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    struct Silent;

    impl SseListener for Silent {}

    #[test]
    fn test_default_policy_retries_and_accepts_hints() {
        let listener = Silent;
        listener.on_open();
        listener.on_comment("ping");
        listener.on_closed();

        assert!(listener.on_retry_time_suggested(Duration::from_millis(250)));
        assert!(listener.on_transport_error(&TransportError::sse_stream_ended(), None));
    }

    #[test]
    fn test_default_before_retry_reuses_request() {
        let mut request =
            SseRequest::new(Url::parse("http://localhost/events").expect("valid url"));
        request.set_last_event_id(Some("12"));

        let next = Silent.on_before_retry(&request).expect("retry request");
        assert_eq!(next.url, request.url);
        assert_eq!(next.last_event_id(), Some("12"));
    }

    #[test]
    fn test_arc_forwards_to_inner() {
        struct Decline;

        impl SseListener for Decline {
            fn on_transport_error(
                &self,
                _error: &TransportError,
                _response: Option<&ResponseSnapshot>,
            ) -> bool {
                false
            }
        }

        let listener = std::sync::Arc::new(Decline);
        assert!(!listener.on_transport_error(&TransportError::sse_stream_ended(), None));
        assert!(listener.on_retry_time_suggested(Duration::from_secs(1)));
    }
}
