//! Events re-emitted to the host, and the listener that produces them.

use std::{collections::BTreeMap, error::Error as _, sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    error::TransportError,
    sse::{Event, ResponseSnapshot, SseListener, SseRequest},
};

/// Receives bridge events, tagged with the id of the source that produced
/// them.
///
/// Called from connection tasks; implementations must not block.
pub trait EventEmitter: Send + Sync + 'static {
    /// Deliver one event.
    fn emit(&self, source_id: &str, event: BridgeEvent);
}

impl<F> EventEmitter for F
where
    F: Fn(&str, BridgeEvent) + Send + Sync + 'static,
{
    fn emit(&self, source_id: &str, event: BridgeEvent) {
        self(source_id, event);
    }
}

/// A connection occurrence in host-facing form.
///
/// Serializes as `{"type": "<NAME>", "payload": ...}`; unit variants have no
/// payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeEvent {
    /// The connection opened.
    Open,
    /// An event arrived.
    Message(MessagePayload),
    /// A comment arrived.
    Comment(String),
    /// The server suggested a retry delay, in milliseconds.
    RetryTime(u64),
    /// An attempt failed; the connection retries.
    RetryError(RetryErrorPayload),
    /// The connection is closed for good.
    Closed,
}

impl BridgeEvent {
    /// The event name the host subscribes to.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Message(_) => "MESSAGE",
            Self::Comment(_) => "COMMENT",
            Self::RetryTime(_) => "RETRY_TIME",
            Self::RetryError(_) => "RETRY_ERROR",
            Self::Closed => "CLOSED",
        }
    }
}

/// Payload of [`BridgeEvent::Message`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessagePayload {
    pub id: Option<String>,
    pub event: String,
    pub data: String,
}

impl From<&Event> for MessagePayload {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.as_ref().map(|id| id.to_string()),
            event: event.event.to_string(),
            data: event.data.to_string(),
        }
    }
}

/// Payload of [`BridgeEvent::RetryError`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RetryErrorPayload {
    pub throwable: Option<ThrowablePayload>,
    pub response: Option<ResponsePayload>,
}

impl RetryErrorPayload {
    pub fn new(error: &TransportError, response: Option<&ResponseSnapshot>) -> Self {
        Self {
            throwable: Some(ThrowablePayload::from(error)),
            response: response.map(ResponsePayload::from),
        }
    }
}

/// The failure, flattened to text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ThrowablePayload {
    pub message: String,
    /// The error's source chain, outermost first, one per line.
    #[serde(rename = "stackTrace")]
    pub stack_trace: String,
}

impl From<&TransportError> for ThrowablePayload {
    fn from(error: &TransportError) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        Self {
            message: error.to_string(),
            stack_trace: chain.join("\n"),
        }
    }
}

/// The rejected handshake response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResponsePayload {
    pub status: u16,
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

impl From<&ResponseSnapshot> for ResponsePayload {
    fn from(snapshot: &ResponseSnapshot) -> Self {
        Self {
            status: snapshot.status.as_u16(),
            body: snapshot.body.clone(),
            headers: snapshot.header_map(),
        }
    }
}

/// Forwards every callback of one source to an [`EventEmitter`].
///
/// Adopts every retry hint and always retries.
pub(crate) struct BridgeListener {
    source_id: String,
    emitter: Arc<dyn EventEmitter>,
}

impl BridgeListener {
    pub(crate) fn new(source_id: String, emitter: Arc<dyn EventEmitter>) -> Self {
        Self { source_id, emitter }
    }

    fn emit(&self, event: BridgeEvent) {
        debug!(source_id = %self.source_id, event = event.name(), "Bridge event");
        self.emitter.emit(&self.source_id, event);
    }
}

impl SseListener for BridgeListener {
    fn on_open(&self) {
        info!(source_id = %self.source_id, "SSE source open");
        self.emit(BridgeEvent::Open);
    }

    fn on_message(&self, event: &Event) {
        self.emit(BridgeEvent::Message(MessagePayload::from(event)));
    }

    fn on_comment(&self, comment: &str) {
        self.emit(BridgeEvent::Comment(comment.to_string()));
    }

    fn on_retry_time_suggested(&self, delay: Duration) -> bool {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.emit(BridgeEvent::RetryTime(millis));
        true
    }

    fn on_transport_error(
        &self,
        error: &TransportError,
        response: Option<&ResponseSnapshot>,
    ) -> bool {
        warn!(
            source_id = %self.source_id,
            error = %error,
            rejected = error.is_handshake_rejection(),
            "SSE source retrying"
        );
        self.emit(BridgeEvent::RetryError(RetryErrorPayload::new(error, response)));
        true
    }

    fn on_closed(&self) {
        info!(source_id = %self.source_id, "SSE source closed");
        self.emit(BridgeEvent::Closed);
    }

    fn on_before_retry(&self, request: &SseRequest) -> Option<SseRequest> {
        debug!(source_id = %self.source_id, last_event_id = ?request.last_event_id(), "About to retry");
        Some(request.clone())
    }
}

#[cfg(test)]
mod tests {
    use bytes_utils::Str;
    use http::{HeaderMap, HeaderValue, StatusCode};
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, BridgeEvent)>>,
    }

    impl EventEmitter for Recorder {
        fn emit(&self, source_id: &str, event: BridgeEvent) {
            self.events.lock().push((source_id.to_string(), event));
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(BridgeEvent::Open.name(), "OPEN");
        assert_eq!(BridgeEvent::Comment(String::new()).name(), "COMMENT");
        assert_eq!(BridgeEvent::RetryTime(1).name(), "RETRY_TIME");
        assert_eq!(BridgeEvent::Closed.name(), "CLOSED");
    }

    #[test]
    fn test_message_serialization() {
        let event = Event {
            id: Some(Str::from("7")),
            event: Str::from("update"),
            data: Str::from("a\nb"),
            offset: 30,
        };
        let value = serde_json::to_value(BridgeEvent::Message(MessagePayload::from(&event)))
            .expect("serialize");
        assert_eq!(
            value,
            json!({"type": "MESSAGE", "payload": {"id": "7", "event": "update", "data": "a\nb"}})
        );

        let value = serde_json::to_value(BridgeEvent::Open).expect("serialize");
        assert_eq!(value, json!({"type": "OPEN"}));

        let value = serde_json::to_value(BridgeEvent::RetryTime(1500)).expect("serialize");
        assert_eq!(value, json!({"type": "RETRY_TIME", "payload": 1500}));
    }

    #[test]
    fn test_retry_error_payload_shape() {
        let mut headers = HeaderMap::new();
        headers.insert("x-reason", HeaderValue::from_static("banned"));
        let snapshot = ResponseSnapshot {
            status: StatusCode::FORBIDDEN,
            headers,
            body: "go away".to_string(),
        };
        let error = TransportError::sse_invalid_status(StatusCode::FORBIDDEN);

        let value = serde_json::to_value(BridgeEvent::RetryError(RetryErrorPayload::new(
            &error,
            Some(&snapshot),
        )))
        .expect("serialize");

        assert_eq!(value["type"], "RETRY_ERROR");
        assert_eq!(
            value["payload"]["throwable"]["message"],
            "SSE handshake failed with status 403 Forbidden"
        );
        assert_eq!(value["payload"]["throwable"]["stackTrace"], "");
        assert_eq!(value["payload"]["response"]["status"], 403);
        assert_eq!(value["payload"]["response"]["body"], "go away");
        assert_eq!(value["payload"]["response"]["headers"]["x-reason"], "banned");
    }

    #[test]
    fn test_listener_forwards_with_source_id() {
        let recorder = Arc::new(Recorder::default());
        let emitter: Arc<dyn EventEmitter> = recorder.clone();
        let listener = BridgeListener::new("feed".to_string(), emitter);

        listener.on_open();
        listener.on_comment("hi");
        assert!(listener.on_retry_time_suggested(Duration::from_millis(250)));
        assert!(listener.on_transport_error(&TransportError::sse_stream_ended(), None));
        listener.on_closed();

        let events = recorder.events.lock();
        let names: Vec<_> = events.iter().map(|(_, e)| e.name()).collect();
        assert_eq!(
            names,
            ["OPEN", "COMMENT", "RETRY_TIME", "RETRY_ERROR", "CLOSED"]
        );
        assert!(events.iter().all(|(id, _)| id == "feed"));
        assert_eq!(events[2].1, BridgeEvent::RetryTime(250));
        match &events[3].1 {
            BridgeEvent::RetryError(payload) => {
                assert!(payload.response.is_none());
                assert_eq!(
                    payload.throwable.as_ref().map(|t| t.message.as_str()),
                    Some("SSE stream ended")
                );
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_closure_emitter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let emitter: Arc<dyn EventEmitter> =
            Arc::new(move |id: &str, event: BridgeEvent| sink.lock().push((id.to_string(), event)));

        emitter.emit("a", BridgeEvent::Open);
        assert_eq!(seen.lock().as_slice(), [("a".to_string(), BridgeEvent::Open)]);
    }
}
