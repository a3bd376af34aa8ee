//! Error type of [`EventStream`](super::event_stream::EventStream).

use core::fmt::{Display, Formatter};

/// Errors produced by [`EventStream`](super::event_stream::EventStream).
#[derive(Debug, PartialEq)]
pub enum EventStreamError<E> {
    /// Something went wrong with the underlying stream.
    Transport(E),
    /// More than `limit` bytes arrived without a line terminator.
    LineTooLong {
        /// The configured maximum.
        limit: usize,
    },
}

impl<E> Display for EventStreamError<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Transport(e) => e.fmt(f),
            Self::LineTooLong { limit } => {
                write!(f, "SSE line exceeded {limit} bytes without a terminator")
            }
        }
    }
}

impl<E> core::error::Error for EventStreamError<E>
where
    E: core::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::LineTooLong { .. } => None,
        }
    }
}
