//! # SSE Transport
//!
//! A reconnecting Server-Sent Events client for Tokio, plus a small bridge
//! for hosts that address connections by name.
//!
//! ## Features
//!
//! - **Incremental Parsing**: Events, comments and retry hints are reported
//!   as soon as their terminating line arrives, independent of how the
//!   transport chunks the body
//! - **Automatic Reconnection**: Retry delay from the server or the config,
//!   `Last-Event-ID` resumption, optional backoff and attempt limits
//! - **Listener Control**: The caller decides whether to adopt retry hints,
//!   whether to retry, and what the retry request looks like
//! - **Deterministic Shutdown**: `close()` is idempotent and nothing is
//!   delivered after `on_closed`
//! - **Bridge Registry**: Named sources re-emitted as typed, serializable
//!   events
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sse_transport::sse::{Event, SseClient, SseConfig, SseListener};
//!
//! struct Printer;
//!
//! impl SseListener for Printer {
//!     fn on_message(&self, event: &Event) {
//!         println!("{}: {}", &*event.event, &*event.data);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SseClient::new()?;
//!     let handle = client.open(SseConfig::new("https://api.example.com/stream"), Printer)?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//!     handle.close();
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod error;
pub(crate) mod reconnect;
pub mod sse;

// Re-export commonly used types
pub use bridge::{BridgeEvent, EventEmitter, SourceArgs, SourceRegistry};
pub use error::{TransportError, TransportResult};
pub use sse::{SseClient, SseConfig, SseHandle, SseListener};
