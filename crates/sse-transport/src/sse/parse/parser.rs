//! Line-level parser for SSE streams.

use bytes::{Bytes, BytesMut};
use bytes_utils::Str;
use tracing::debug;

use super::constants::{COLON, CR, LF};

/// A full line from an SSE stream, borrowing from the line buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RawEventLine<'a> {
    /// Comment line (starts with `:`), text after the marker.
    Comment(&'a [u8]),
    /// A field line. A line without a colon has an empty value.
    Field {
        field_name: &'a [u8],
        field_value: &'a [u8],
    },
    /// An empty line (event delimiter).
    Empty,
}

/// Full line from an SSE stream, owned version of [`RawEventLine`].
#[derive(Debug, Clone)]
pub(crate) enum RawEventLineOwned {
    Comment(Bytes),
    Empty,
    Field {
        field_name: Bytes,
        field_value: Bytes,
    },
}

/// Recognised field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldName {
    Event,
    Data,
    Id,
    Retry,
    Ignored,
}

/// A line with its text decoded.
#[derive(Debug, Clone)]
pub(crate) enum ValidatedEventLine {
    Comment(Str),
    Empty,
    Field {
        field_name: FieldName,
        field_value: Str,
    },
}

/// Converts an owned `String` without copying.
pub(crate) fn str_from_string(s: String) -> Str {
    // Safety: the bytes come from a `String`.
    unsafe { Str::from_inner_unchecked(Bytes::from(s.into_bytes())) }
}

/// Decodes `val` as UTF-8, substituting U+FFFD for invalid sequences.
fn decode_lossy(val: Bytes) -> Str {
    match core::str::from_utf8(val.as_ref()) {
        // Safety: we just validated the bytes are valid UTF-8.
        Ok(_) => unsafe { Str::from_inner_unchecked(val) },
        Err(err) => {
            debug!(
                valid_up_to = err.valid_up_to(),
                "invalid UTF-8 in SSE line, substituting replacement characters"
            );
            str_from_string(String::from_utf8_lossy(val.as_ref()).into_owned())
        }
    }
}

impl RawEventLineOwned {
    pub(crate) fn validate(self) -> ValidatedEventLine {
        match self {
            Self::Comment(text) => ValidatedEventLine::Comment(decode_lossy(text)),
            Self::Empty => ValidatedEventLine::Empty,
            Self::Field {
                field_name,
                field_value,
            } => {
                let field_name = match field_name.as_ref() {
                    b"event" => FieldName::Event,
                    b"data" => FieldName::Data,
                    b"id" => FieldName::Id,
                    b"retry" => FieldName::Retry,
                    _ => FieldName::Ignored,
                };

                ValidatedEventLine::Field {
                    field_name,
                    field_value: decode_lossy(field_value),
                }
            }
        }
    }
}

/// Drops a single leading space.
fn strip_leading_space(value: &[u8]) -> &[u8] {
    match value {
        [b' ', rest @ ..] => rest,
        _ => value,
    }
}

fn read_line(bytes: &[u8]) -> RawEventLine<'_> {
    if bytes.is_empty() {
        return RawEventLine::Empty;
    }

    match memchr::memchr(COLON, bytes) {
        Some(0) => RawEventLine::Comment(strip_leading_space(&bytes[1..])),
        Some(colon_pos) => RawEventLine::Field {
            field_name: &bytes[..colon_pos],
            field_value: strip_leading_space(&bytes[colon_pos + 1..]),
        },
        None => RawEventLine::Field {
            field_name: bytes,
            field_value: &[],
        },
    }
}

/// Reads the next line from the buffer and advances the buffer past its
/// `\n` terminator. A `\r` right before the terminator is dropped.
///
/// Returns the line and the number of bytes consumed, or `None` if the buffer
/// does not yet hold a complete line.
pub(crate) fn parse_line_from_buffer(buffer: &mut BytesMut) -> Option<(RawEventLineOwned, usize)> {
    let lf = memchr::memchr(LF, buffer)?;

    let mut line = buffer.split_to(lf + 1).freeze();
    let consumed = line.len();
    line.truncate(lf);
    if line.last() == Some(&CR) {
        line.truncate(lf - 1);
    }

    let owned = match read_line(&line) {
        RawEventLine::Field {
            field_name,
            field_value,
        } => RawEventLineOwned::Field {
            field_name: line.slice_ref(field_name),
            field_value: line.slice_ref(field_value),
        },
        RawEventLine::Comment(text) => RawEventLineOwned::Comment(line.slice_ref(text)),
        RawEventLine::Empty => RawEventLineOwned::Empty,
    };

    Some((owned, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next_line(input: &'static [u8]) -> Option<(ValidatedEventLine, usize, usize)> {
        let mut buffer = BytesMut::from(input);
        parse_line_from_buffer(&mut buffer)
            .map(|(line, consumed)| (line.validate(), consumed, buffer.len()))
    }

    #[test]
    fn incomplete_line_needs_more_data() {
        assert!(next_line(b"data: partial").is_none());
        assert!(next_line(b"data: partial\r").is_none());
        assert!(next_line(b"").is_none());
    }

    #[test]
    fn field_with_space() {
        let (line, consumed, rest) = next_line(b"data: hello\nnext").expect("line");
        assert_eq!(consumed, 12);
        assert_eq!(rest, 4);
        match line {
            ValidatedEventLine::Field {
                field_name,
                field_value,
            } => {
                assert_eq!(field_name, FieldName::Data);
                assert_eq!(&*field_value, "hello");
            }
            other => panic!("unexpected line {other:?}"),
        }
    }

    #[test]
    fn only_one_space_is_stripped() {
        let (line, ..) = next_line(b"event:  spaced\n").expect("line");
        assert!(matches!(
            line,
            ValidatedEventLine::Field { field_name: FieldName::Event, ref field_value }
                if &**field_value == " spaced"
        ));
    }

    #[test]
    fn crlf_is_stripped() {
        let (line, consumed, _) = next_line(b"id:42\r\n").expect("line");
        assert_eq!(consumed, 7);
        assert!(matches!(
            line,
            ValidatedEventLine::Field { field_name: FieldName::Id, ref field_value }
                if &**field_value == "42"
        ));
    }

    #[test]
    fn empty_and_cr_only_lines() {
        assert!(matches!(
            next_line(b"\n"),
            Some((ValidatedEventLine::Empty, 1, 0))
        ));
        assert!(matches!(
            next_line(b"\r\n"),
            Some((ValidatedEventLine::Empty, 2, 0))
        ));
    }

    #[test]
    fn comment_text() {
        let (line, ..) = next_line(b":heartbeat\n").expect("line");
        assert!(matches!(line, ValidatedEventLine::Comment(ref t) if &**t == "heartbeat"));

        let (line, ..) = next_line(b": keep-alive\n").expect("line");
        assert!(matches!(line, ValidatedEventLine::Comment(ref t) if &**t == "keep-alive"));

        let (line, ..) = next_line(b":\n").expect("line");
        assert!(matches!(line, ValidatedEventLine::Comment(ref t) if t.is_empty()));
    }

    #[test]
    fn field_without_colon_has_empty_value() {
        let (line, ..) = next_line(b"data\n").expect("line");
        assert!(matches!(
            line,
            ValidatedEventLine::Field { field_name: FieldName::Data, ref field_value }
                if field_value.is_empty()
        ));
    }

    #[test]
    fn unknown_field_is_ignored() {
        let (line, ..) = next_line(b"foo: bar\n").expect("line");
        assert!(matches!(
            line,
            ValidatedEventLine::Field {
                field_name: FieldName::Ignored,
                ..
            }
        ));
    }

    #[test]
    fn invalid_utf8_is_substituted() {
        let (line, ..) = next_line(b"data: a\xFFb\n").expect("line");
        assert!(matches!(
            line,
            ValidatedEventLine::Field { ref field_value, .. } if &**field_value == "a\u{FFFD}b"
        ));
    }
}
