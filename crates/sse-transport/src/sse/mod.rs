//! Server-Sent Events (SSE) client.
//!
//! This module provides a reconnecting SSE client with support for:
//!
//! - **Event Streaming**: An incremental, chunk-boundary-insensitive parser
//!   ([`EventParser`]) that reports events, comments and retry hints in
//!   stream order.
//! - **Auto-Reconnection**: Retries after the server-suggested or configured
//!   delay, resuming with `Last-Event-ID`, with optional backoff and attempt
//!   limits.
//! - **Listener Callbacks**: Every connection reports to an [`SseListener`],
//!   which also decides whether to adopt retry hints, whether to retry after a
//!   failure, and which request to send on the next attempt.
//! - **Handle/Stream Split**: [`SseClient::connect`] wraps the callbacks in a
//!   [`ChannelListener`](handlers::ChannelListener) so notifications can be
//!   consumed as a [`Stream`](futures_util::Stream) through [`SseStream`].
//!
//! # Architecture
//!
//! ```text
//! SseClient::open(config, listener)
//!   └─ spawns background task ──► sse_connection_driver
//!        │                              │
//!        ├── SseHandle ──► mpsc ───────►┤  (commands: Close, Reconnect)
//!        │                              │
//!        └── SseListener ◄──────────────┘  (callbacks, one at a time)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use futures_util::StreamExt;
//! use sse_transport::sse::{SseClient, SseConfig, SseNotification};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SseClient::new()?;
//! let config = SseConfig::new("https://api.example.com/v1/stream")
//!     .connect_timeout(Duration::from_secs(10))
//!     .reconnect_max_attempts(Some(5));
//!
//! let (handle, mut stream) = client.connect(config)?.split();
//!
//! while let Some(notification) = stream.next().await {
//!     match notification {
//!         SseNotification::Message(event) => {
//!             println!("type={} data={}", &*event.event, &*event.data);
//!         }
//!         SseNotification::Closed => break,
//!         _ => {}
//!     }
//! }
//! handle.close();
//! # Ok(())
//! # }
//! ```
//!
//! # Module Index
//!
//! | Module | Description |
//! |--------|-------------|
//! | `config` | [`SseConfig`] builder for connection settings |
//! | [`connection`] | [`SseClient`], [`SseConnection`], [`SseHandle`], [`SseStream`] |
//! | `protocol` | [`SseListener`] trait |
//! | `types` | [`SseRequest`], [`ResponseSnapshot`] |
//! | [`parse`] | [`EventParser`], [`EventStream`], [`EventStreamError`], [`Event`], [`Frame`] |
//! | [`handlers`] | Ready-made listeners ([`ChannelListener`](handlers::ChannelListener)) |

mod config;
pub mod connection;
pub mod handlers;
pub mod parse;
mod protocol;
mod types;

// Re-export config types
pub use config::SseConfig;
// Re-export connection types
pub use connection::{SseClient, SseConnection, SseConnectionState, SseHandle, SseStream};
// Re-export listeners
pub use handlers::{ChannelListener, SseNotification};
// Re-export parser types
pub use parse::{Event, EventParser, EventStream, EventStreamError, Frame};
// Re-export protocol types
pub use protocol::SseListener;
// Re-export core types
pub use types::{LAST_EVENT_ID, ResponseSnapshot, SseRequest};
