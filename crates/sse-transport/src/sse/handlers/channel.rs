//! Listener that turns callbacks into a stream of notifications.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    error::TransportError,
    sse::{connection::SseStream, parse::Event, protocol::SseListener, types::ResponseSnapshot},
};

/// One listener callback, as an owned value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseNotification {
    /// A connection attempt succeeded.
    Open,
    /// A complete event.
    Message(Event),
    /// A comment line.
    Comment(String),
    /// The server suggested a retry delay (always adopted).
    RetryTime(Duration),
    /// An attempt failed; the connection will retry.
    TransportError {
        /// The error, rendered with [`Display`](std::fmt::Display).
        message: String,
        /// The rejected response, when the handshake was refused.
        response: Option<ResponseSnapshot>,
    },
    /// The connection reached a terminal state. Always the last item.
    Closed,
}

/// Forwards every callback into an unbounded channel.
///
/// Accepts every retry hint and keeps retrying for as long as the
/// [`SseStream`] is alive. Once the stream is dropped the next failure ends
/// the connection.
#[derive(Debug)]
pub struct ChannelListener {
    tx: Mutex<Option<mpsc::UnboundedSender<SseNotification>>>,
}

impl ChannelListener {
    /// Create a listener and the stream it feeds.
    #[must_use]
    pub fn new() -> (Self, SseStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Self {
            tx: Mutex::new(Some(tx)),
        };
        (listener, SseStream::new(rx))
    }

    fn send(&self, notification: SseNotification) {
        if let Some(tx) = self.tx.lock().as_ref()
            && tx.send(notification).is_err()
        {
            debug!("SSE stream dropped, notification discarded");
        }
    }

    fn consumer_alive(&self) -> bool {
        self.tx.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl SseListener for ChannelListener {
    fn on_open(&self) {
        self.send(SseNotification::Open);
    }

    fn on_message(&self, event: &Event) {
        self.send(SseNotification::Message(event.clone()));
    }

    fn on_comment(&self, comment: &str) {
        self.send(SseNotification::Comment(comment.to_string()));
    }

    fn on_retry_time_suggested(&self, delay: Duration) -> bool {
        self.send(SseNotification::RetryTime(delay));
        true
    }

    fn on_transport_error(
        &self,
        error: &TransportError,
        response: Option<&ResponseSnapshot>,
    ) -> bool {
        self.send(SseNotification::TransportError {
            message: error.to_string(),
            response: response.cloned(),
        });
        self.consumer_alive()
    }

    fn on_closed(&self) {
        // Dropping the sender ends the stream after `Closed`.
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(SseNotification::Closed);
        }
    }
}
