//! Incremental event parser and the [`Stream`] adapter built on it.
//!
//! [`EventParser`] is synchronous: push byte chunks in, pull [`Frame`]s out.
//! [`EventStream`] drives an [`EventParser`] from any stream of byte chunks.
//! Both produce the same frames no matter where the chunk boundaries fall.

use core::{
    pin::Pin,
    task::{Context, Poll, ready},
    time::Duration,
};

use bytes::{Buf, BytesMut};
use bytes_utils::{Str, StrMut};
use futures_core::Stream;
use tracing::{debug, trace};

use super::{
    constants::{BOM, EMPTY_STR, MESSAGE_STR},
    errors::EventStreamError,
    event::{Event, Frame},
    parser::{FieldName, ValidatedEventLine, parse_line_from_buffer},
};

// ---------------------------------------------------------------------------
// EventBuilder
// ---------------------------------------------------------------------------

/// Pending event fields, reset after every blank line.
#[derive(Debug, Clone)]
struct EventBuilder {
    event: Str,
    data_buffer: EventBuilderDataBuffer,
}

/// Optimised data buffer.
///
/// The common case is a single `data:` line per event, so we keep the first
/// value as an immutable [`Str`] and only upgrade to a mutable buffer when a
/// second `data:` line arrives.
#[derive(Debug, Default, Clone)]
enum EventBuilderDataBuffer {
    #[default]
    Uninit,
    Immutable(Str),
    Mutable(StrMut),
}

impl EventBuilderDataBuffer {
    fn freeze(self) -> Str {
        match self {
            Self::Uninit => EMPTY_STR,
            Self::Immutable(s) => s,
            Self::Mutable(s) => s.freeze(),
        }
    }

    fn push_str(&mut self, s: Str) {
        match self {
            Self::Uninit => *self = Self::Immutable(s),
            Self::Immutable(immutable_buf) => {
                let len = immutable_buf.len() + 1 + s.len();
                let inner = BytesMut::with_capacity(len);
                // Safety: The buffer is empty, there are no bytes to be
                // invalid.
                let mut buf = unsafe { StrMut::from_inner_unchecked(inner) };
                buf.push_str(immutable_buf);
                buf.push('\n');
                buf.push_str(&s);
                *self = Self::Mutable(buf);
            }
            Self::Mutable(mutable_buf) => {
                mutable_buf.push('\n');
                mutable_buf.push_str(&s);
            }
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, Self::Uninit)
    }
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self {
            event: EMPTY_STR,
            data_buffer: EventBuilderDataBuffer::default(),
        }
    }
}

impl EventBuilder {
    /// Takes the pending fields, leaving the builder reset.
    ///
    /// Returns `None` when no `data` line was seen since the last reset.
    fn dispatch(&mut self, id: Option<Str>, offset: u64) -> Option<Event> {
        let EventBuilder {
            mut event,
            data_buffer,
        } = core::mem::take(self);

        if data_buffer.is_empty() {
            return None;
        }

        if event.is_empty() {
            event = MESSAGE_STR;
        }

        Some(Event {
            id,
            event,
            data: data_buffer.freeze(),
            offset,
        })
    }
}

// ---------------------------------------------------------------------------
// BOM helper
// ---------------------------------------------------------------------------

/// `None` means "not enough bytes to tell yet".
const fn starts_with_bom(buf: &[u8]) -> Option<bool> {
    match buf.len() {
        0 => None,
        1 => {
            if buf[0] == BOM[0] {
                None
            } else {
                Some(false)
            }
        }
        2 => {
            if buf[0] == BOM[0] && buf[1] == BOM[1] {
                None
            } else {
                Some(false)
            }
        }
        _gte_3 => {
            if buf[0] == BOM[0] && buf[1] == BOM[1] && buf[2] == BOM[2] {
                Some(true)
            } else {
                Some(false)
            }
        }
    }
}

fn is_retry_value(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// EventParser
// ---------------------------------------------------------------------------

/// Incremental SSE parser.
///
/// Only complete lines are interpreted, so splitting the input at arbitrary
/// byte positions never changes the frames produced. A trailing line without
/// its terminator is held back until more bytes arrive.
///
/// ```
/// use sse_transport::sse::{EventParser, Frame};
///
/// let mut parser = EventParser::new();
/// parser.push(b"id: 7\nevent: ping\nda");
/// assert!(parser.next_frame().is_none());
///
/// parser.push(b"ta: hello\n\n");
/// match parser.next_frame() {
///     Some(Frame::Event(event)) => {
///         assert_eq!(event.id_str(), "7");
///         assert_eq!(&*event.event, "ping");
///         assert_eq!(&*event.data, "hello");
///     }
///     other => panic!("unexpected frame {other:?}"),
/// }
/// ```
#[derive(Debug, Default)]
pub struct EventParser {
    buffer: BytesMut,
    builder: EventBuilder,
    started: bool,
    offset: u64,
    last_event_id: Option<Str>,
    max_line_len: Option<usize>,
}

impl EventParser {
    /// Create a parser positioned at the start of a stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser that resumes with a known last event ID.
    pub fn with_last_event_id(id: Option<Str>) -> Self {
        Self {
            last_event_id: id,
            ..Self::default()
        }
    }

    /// Cap the bytes held while waiting for a line terminator.
    ///
    /// `None` (the default) never gives up on a line.
    #[must_use]
    pub fn with_max_line_len(mut self, limit: Option<usize>) -> Self {
        self.max_line_len = limit;
        self
    }

    /// Append raw bytes from the transport.
    pub fn push(&mut self, chunk: &[u8]) {
        if !chunk.is_empty() {
            self.buffer.extend_from_slice(chunk);
        }
    }

    /// Interpret buffered lines until one produces a [`Frame`].
    ///
    /// Returns `None` once the buffer holds no further complete line.
    pub fn next_frame(&mut self) -> Option<Frame> {
        if !self.started {
            match starts_with_bom(&self.buffer) {
                Some(true) => {
                    self.buffer.advance(BOM.len());
                    self.offset += BOM.len() as u64;
                    self.started = true;
                }
                Some(false) => self.started = true,
                None => return None,
            }
        }

        loop {
            let (line, consumed) = parse_line_from_buffer(&mut self.buffer)?;
            self.offset += consumed as u64;

            if let Some(frame) = self.apply(line.validate()) {
                return Some(frame);
            }
        }
    }

    fn apply(&mut self, line: ValidatedEventLine) -> Option<Frame> {
        match line {
            ValidatedEventLine::Empty => {
                let event = self
                    .builder
                    .dispatch(self.last_event_id.clone(), self.offset)?;
                Some(Frame::Event(event))
            }
            ValidatedEventLine::Comment(text) => Some(Frame::Comment(text)),
            ValidatedEventLine::Field {
                field_name,
                field_value,
            } => {
                match field_name {
                    FieldName::Data => self.builder.data_buffer.push_str(field_value),
                    FieldName::Event => self.builder.event = field_value,
                    FieldName::Id => {
                        if memchr::memchr(0, field_value.as_bytes()).is_some() {
                            debug!("ignoring SSE id containing NUL");
                        } else if field_value.is_empty() {
                            self.last_event_id = None;
                        } else {
                            self.last_event_id = Some(field_value);
                        }
                    }
                    FieldName::Retry => {
                        match is_retry_value(&field_value)
                            .then(|| field_value.parse::<u64>().ok())
                            .flatten()
                        {
                            Some(millis) => return Some(Frame::Retry(Duration::from_millis(millis))),
                            None => debug!(value = %&*field_value, "ignoring invalid SSE retry field"),
                        }
                    }
                    FieldName::Ignored => trace!("ignoring unknown SSE field"),
                }
                None
            }
        }
    }

    /// The last event ID seen, carried across events.
    pub fn last_event_id(&self) -> Option<&Str> {
        self.last_event_id.as_ref()
    }

    /// Replace the last event ID.
    pub fn set_last_event_id(&mut self, id: Option<Str>) {
        self.last_event_id = id;
    }

    /// Number of bytes consumed so far, including a skipped BOM.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes waiting for a line terminator.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// The configured line limit, if the pending partial line exceeds it.
    ///
    /// Only meaningful once [`next_frame()`](Self::next_frame) has returned
    /// `None`, when the buffer holds at most one unterminated line.
    pub fn exceeded_line_limit(&self) -> Option<usize> {
        self.max_line_len.filter(|&limit| self.buffer.len() > limit)
    }
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

pin_project_lite::pin_project! {
    /// A [`Stream`] that converts a stream of byte chunks into parsed SSE
    /// [`Frame`]s.
    ///
    /// Errors from the inner stream are passed through as
    /// [`EventStreamError::Transport`]; the parser state is kept, so polling
    /// again after such an error continues where it left off. A line longer
    /// than the parser's limit yields [`EventStreamError::LineTooLong`] and
    /// ends the stream. When the inner stream ends, an incomplete trailing
    /// event is discarded.
    #[project = EventStreamProjection]
    #[derive(Debug)]
    pub struct EventStream<S> {
        #[pin]
        stream: S,
        parser: EventParser,
        terminated: bool,
    }
}

impl<S> EventStream<S> {
    /// Create a new [`EventStream`] from an underlying byte stream.
    pub fn new(stream: S) -> Self {
        Self::with_parser(stream, EventParser::new())
    }

    /// Create a new [`EventStream`] around an existing parser.
    pub fn with_parser(stream: S, parser: EventParser) -> Self {
        Self {
            stream,
            parser,
            terminated: false,
        }
    }

    /// Reference to the last event ID given out by this stream.
    pub fn last_event_id(&self) -> Option<&Str> {
        self.parser.last_event_id()
    }

    /// The underlying parser.
    pub fn parser(&self) -> &EventParser {
        &self.parser
    }
}

impl<S, E, B> Stream for EventStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    type Item = Result<Frame, EventStreamError<E>>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<<Self as Stream>::Item>> {
        let mut this = self.project();

        loop {
            if let Some(frame) = this.parser.next_frame() {
                return Poll::Ready(Some(Ok(frame)));
            }

            if *this.terminated {
                return Poll::Ready(None);
            }

            if let Some(limit) = this.parser.exceeded_line_limit() {
                debug!(limit, buffered = this.parser.buffered_len(), "SSE line too long");
                *this.terminated = true;
                return Poll::Ready(Some(Err(EventStreamError::LineTooLong { limit })));
            }

            match ready!(this.stream.as_mut().poll_next(cx)) {
                Some(Ok(bytes)) => this.parser.push(bytes.as_ref()),
                Some(Err(e)) => return Poll::Ready(Some(Err(EventStreamError::Transport(e)))),
                None => *this.terminated = true,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
