//! Host bridge: named SSE sources whose callbacks are re-emitted as events.
//!
//! A host (an embedding application, a scripting layer, an IPC peer) asks the
//! [`SourceRegistry`] to open connections under ids of its choosing and
//! receives everything that happens on them through one [`EventEmitter`], as
//! [`BridgeEvent`]s tagged with the source id.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sse_transport::{
//!     bridge::{BridgeEvent, EventEmitter, SourceArgs, SourceRegistry},
//!     sse::SseClient,
//! };
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let emitter: Arc<dyn EventEmitter> = Arc::new(|id: &str, event: BridgeEvent| {
//!     println!("{id}: {}", event.name());
//! });
//! let registry = SourceRegistry::new(SseClient::new()?, emitter);
//!
//! registry.initialize("prices", SourceArgs::new("https://api.example.com/prices"))?;
//! registry.close("prices");
//! # Ok(())
//! # }
//! ```

mod events;
mod registry;

pub use events::{
    BridgeEvent, EventEmitter, MessagePayload, ResponsePayload, RetryErrorPayload,
    ThrowablePayload,
};
pub use registry::{SourceArgs, SourceConfig, SourceRegistry};
