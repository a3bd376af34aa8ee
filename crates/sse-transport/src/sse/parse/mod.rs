//! SSE wire-format parsing.
//!
//! Lines are separated by `\n` with an optional trailing `\r`. Invalid UTF-8
//! is replaced with U+FFFD line by line, so malformed input never stops the
//! parser. A leading byte order mark is skipped. An optional limit caps the
//! bytes held for a line that has not been terminated yet.

pub(crate) mod constants;
pub mod errors;
pub mod event;
pub mod event_stream;
pub(crate) mod parser;

pub use errors::EventStreamError;
pub use event::{Event, Frame};
pub use event_stream::{EventParser, EventStream};
pub(crate) use parser::str_from_string;
