//! Id → connection registry.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use http::{HeaderName, HeaderValue};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info};

use super::events::{BridgeListener, EventEmitter};
use crate::{
    error::{TransportError, TransportResult},
    sse::{SseClient, SseConfig, SseHandle},
};

/// Arguments for [`SourceRegistry::initialize`].
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SourceArgs {
    /// Stream URL.
    #[serde(default)]
    pub url: String,
    /// Optional query parameters and headers.
    #[serde(default)]
    pub config: Option<SourceConfig>,
}

/// Extra request settings for a source.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SourceConfig {
    /// Appended to the URL's query string.
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// Added to the request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl SourceArgs {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            config: None,
        }
    }

    /// Build the connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Config`] if a header name or value is not
    /// valid HTTP.
    pub fn to_config(&self) -> TransportResult<SseConfig> {
        let mut config = SseConfig::new(self.url.clone());
        let Some(extra) = &self.config else {
            return Ok(config);
        };

        for (key, value) in &extra.query {
            config = config.query_param(key, value);
        }
        for (key, value) in &extra.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                TransportError::config(format!("Invalid header name {key:?}: {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                TransportError::config(format!("Invalid value for header {key:?}: {e}"))
            })?;
            config = config.header(name, value);
        }
        Ok(config)
    }
}

/// Keeps one SSE connection per caller-chosen id and re-emits their
/// callbacks through an [`EventEmitter`].
///
/// Dropping the registry closes every connection it holds.
pub struct SourceRegistry {
    client: SseClient,
    emitter: Arc<dyn EventEmitter>,
    sources: Mutex<HashMap<String, SseHandle>>,
    listener_count: Mutex<usize>,
}

impl SourceRegistry {
    /// Create an empty registry.
    pub fn new(client: SseClient, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            client,
            emitter,
            sources: Mutex::new(HashMap::new()),
            listener_count: Mutex::new(0),
        }
    }

    /// Open a connection for `id`.
    ///
    /// An existing connection under the same id is closed first; its
    /// `CLOSED` event is emitted before anything from the new one. Safe to
    /// call from threads outside the client's runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] or [`TransportError::Config`]
    /// without touching an existing connection under `id`.
    pub fn initialize(&self, id: impl Into<String>, args: SourceArgs) -> TransportResult<()> {
        let id = id.into();
        let config = args.to_config()?;
        let request = config.build_request()?;
        let runtime = self.client.runtime()?;

        // Nothing below can fail.
        let stale = self.sources.lock().remove(&id);
        if let Some(stale) = stale {
            info!(source_id = %id, "Replacing SSE source");
            stale.close();
        }

        let listener = BridgeListener::new(id.clone(), Arc::clone(&self.emitter));
        let handle = self.client.spawn(&runtime, config, request, listener);
        info!(source_id = %id, url = handle.url(), "SSE source initialized");

        let raced = self.sources.lock().insert(id, handle);
        if let Some(raced) = raced {
            raced.close();
        }
        Ok(())
    }

    /// Close and forget the connection for `id`.
    ///
    /// Returns `false` if there was none.
    pub fn close(&self, id: &str) -> bool {
        let Some(handle) = self.sources.lock().remove(id) else {
            debug!(source_id = %id, "Close requested for unknown SSE source");
            return false;
        };
        handle.close();
        true
    }

    /// Close every connection.
    pub fn close_all(&self) {
        let handles: Vec<_> = self.sources.lock().drain().map(|(_, handle)| handle).collect();
        for handle in handles {
            handle.close();
        }
    }

    /// The handle registered under `id`.
    pub fn get(&self, id: &str) -> Option<SseHandle> {
        self.sources.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sources.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.lock().is_empty()
    }

    /// Record a host subscription to `event_name`.
    pub fn add_listener(&self, event_name: &str) {
        let mut count = self.listener_count.lock();
        *count += 1;
        debug!(event_name, listeners = *count, "Bridge listener added");
    }

    /// Record `count` host unsubscriptions. Never goes below zero.
    pub fn remove_listeners(&self, count: usize) {
        let mut current = self.listener_count.lock();
        *current = current.saturating_sub(count);
        debug!(listeners = *current, "Bridge listeners removed");
    }

    pub fn listener_count(&self) -> usize {
        *self.listener_count.lock()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.len())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}
