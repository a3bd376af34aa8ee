//! Ready-made listeners.
//!
//! - [`ChannelListener`]: forwards every callback into an [`SseStream`](super::SseStream)

mod channel;

pub use channel::{ChannelListener, SseNotification};
