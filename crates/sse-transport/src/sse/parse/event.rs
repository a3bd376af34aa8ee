//! Items produced by the SSE parser.

use core::time::Duration;

use bytes_utils::Str;

/// One dispatched SSE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// The last event ID in effect when this event was dispatched.
    ///
    /// `None` when no `id` field has been seen yet, or when the most recent
    /// one was empty.
    pub id: Option<Str>,
    /// The event type field (`"message"` when unspecified).
    pub event: Str,
    /// The data payload, `data` lines joined by `\n`.
    pub data: Str,
    /// Byte offset in the transport stream just past the blank line that
    /// completed this event.
    pub offset: u64,
}

impl Event {
    /// The event ID as a string slice, empty when absent.
    pub fn id_str(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }
}

/// A parser output item, in the order it was found in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete event (terminated by a blank line, with at least one
    /// `data` line).
    Event(Event),
    /// A comment line, without the leading colon and optional space.
    Comment(Str),
    /// A valid `retry` field.
    Retry(Duration),
}
