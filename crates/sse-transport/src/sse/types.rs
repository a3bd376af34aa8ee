//! Request and response values exchanged with an [`SseListener`](super::SseListener).

use std::{collections::BTreeMap, time::Duration};

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use tokio::time::timeout;
use url::Url;

/// Resumption header sent on (re)connect.
pub const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");

/// The HTTP request issued for one connection attempt.
///
/// [`SseListener::on_before_retry`](super::SseListener::on_before_retry)
/// receives the request about to be retried and may return a modified copy.
#[derive(Clone, Debug)]
pub struct SseRequest {
    /// HTTP method (usually GET).
    pub method: Method,
    /// Target URL, query parameters included.
    pub url: Url,
    /// Request headers, `Accept` and `Last-Event-ID` included.
    pub headers: HeaderMap,
    /// Optional request body.
    pub body: Option<Bytes>,
}

impl SseRequest {
    /// Create a GET request for `url` with the standard SSE headers.
    pub fn new(url: Url) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        Self {
            method: Method::GET,
            url,
            headers,
            body: None,
        }
    }

    /// Set or remove the `Last-Event-ID` header.
    ///
    /// IDs that are not valid header values are not sent.
    pub fn set_last_event_id(&mut self, id: Option<&str>) {
        match id.map(HeaderValue::from_str) {
            Some(Ok(value)) => {
                self.headers.insert(LAST_EVENT_ID, value);
            }
            Some(Err(_)) | None => {
                self.headers.remove(LAST_EVENT_ID);
            }
        }
    }

    /// The `Last-Event-ID` header value, if present.
    pub fn last_event_id(&self) -> Option<&str> {
        self.headers
            .get(LAST_EVENT_ID)
            .and_then(|value| value.to_str().ok())
    }
}

/// Status, headers and a bounded body prefix of a rejected handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseSnapshot {
    /// Response status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Body prefix, decoded lossily as UTF-8.
    pub body: String,
}

impl ResponseSnapshot {
    /// Read up to `limit` body bytes, waiting at most `wait` for them.
    pub(crate) async fn capture(response: reqwest::Response, limit: usize, wait: Duration) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let mut body = BytesMut::new();
        let mut chunks = response.bytes_stream();

        let read = async {
            while body.len() < limit {
                match chunks.next().await {
                    Some(Ok(chunk)) => {
                        let room = limit - body.len();
                        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
                    }
                    Some(Err(_)) | None => break,
                }
            }
        };
        // A slow error body still yields whatever arrived in time.
        let _ = timeout(wait, read).await;

        Self {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        }
    }

    /// Headers as a name → value map; repeated names are joined with `", "`
    /// and values that are not visible ASCII are decoded lossily.
    pub fn header_map(&self) -> BTreeMap<String, String> {
        let mut map: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &self.headers {
            let value = String::from_utf8_lossy(value.as_bytes());
            map.entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert_with(|| value.into_owned());
        }
        map
    }
}
