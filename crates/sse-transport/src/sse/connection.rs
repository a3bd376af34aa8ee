//! SSE connection driver implementation.
//!
//! Provides [`SseClient`] to open connections, [`SseHandle`] to control them,
//! and [`SseConnection`] / [`SseStream`] for consuming notifications as a
//! [`Stream`].

use std::{
    cell::Cell,
    fmt,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use bytes_utils::Str;
use futures_util::{Stream, StreamExt};
use parking_lot::{Mutex, ReentrantMutex};
use tokio::{
    runtime::Handle,
    sync::mpsc,
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};

use super::{
    config::SseConfig,
    handlers::{ChannelListener, SseNotification},
    parse::{EventParser, EventStream, EventStreamError, Frame, str_from_string},
    protocol::SseListener,
    types::{ResponseSnapshot, SseRequest},
};
use crate::{
    error::{TransportError, TransportResult},
    reconnect::calculate_backoff,
};

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// SSE connection state machine states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SseConnectionState {
    /// Sending the request and waiting for the response head.
    Connecting,
    /// Actively receiving events.
    Open,
    /// Waiting out the retry delay after a failure.
    Retrying {
        /// Consecutive failed attempts so far.
        attempt: u32,
    },
    /// Gave up: the listener declined to retry or attempts ran out.
    Failed,
    /// Closed by the caller.
    Closed,
}

impl SseConnectionState {
    /// Returns `true` if the connection is actively streaming.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` if the connection will never deliver anything again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Control commands sent from [`SseHandle`] to the background task.
#[derive(Debug)]
pub(crate) enum SseCommand {
    /// Stop the connection.
    Close,
    /// Drop the current attempt and connect again without waiting.
    Reconnect {
        /// Human-readable reason for the reconnection request.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

thread_local! {
    /// Number of listener callbacks running on this thread, across all
    /// connections.
    static CALLBACK_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct CallbackScope;

impl CallbackScope {
    fn enter() -> Self {
        CALLBACK_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }

    fn active() -> bool {
        CALLBACK_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        CALLBACK_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// State shared between the handles and the background task.
///
/// Every listener callback runs under `gate`. Closing takes the same gate, so
/// once [`Shared::terminate`] returns no callback is running or will run.
/// The gate is re-entrant so a callback may close its own connection.
///
/// A callback that closes a *different* connection whose gate is busy does
/// not wait for it: the connection is marked `closing`, which stops further
/// callbacks, and the driver delivers `on_closed` once the busy callback
/// returns. Two callbacks closing each other's connections cannot deadlock.
struct Shared {
    url: String,
    state: Mutex<SseConnectionState>,
    last_event_id: Mutex<Option<Str>>,
    gate: ReentrantMutex<()>,
    closing: AtomicBool,
    closed: AtomicBool,
    listener: Box<dyn SseListener>,
}

impl Shared {
    fn new(url: String, last_event_id: Option<Str>, listener: Box<dyn SseListener>) -> Self {
        Self {
            url,
            state: Mutex::new(SseConnectionState::Connecting),
            last_event_id: Mutex::new(last_event_id),
            gate: ReentrantMutex::new(()),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            listener,
        }
    }

    /// `true` once the connection is terminal or a close is pending.
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.closing.load(Ordering::Acquire)
    }

    /// Run a listener callback unless the connection is already terminal.
    fn deliver<R>(&self, f: impl FnOnce(&dyn SseListener) -> R) -> Option<R> {
        let _gate = self.gate.lock();
        if self.is_closed() {
            return None;
        }
        let _scope = CallbackScope::enter();
        Some(f(self.listener.as_ref()))
    }

    /// Enter a terminal state and notify `on_closed`.
    ///
    /// Returns `false` if the connection was already terminal.
    fn terminate(&self, state: SseConnectionState) -> bool {
        let _gate = self.gate.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.state.lock() = state;
        let _scope = CallbackScope::enter();
        self.listener.on_closed();
        true
    }

    /// Close on behalf of a handle.
    ///
    /// Returns `true` if `on_closed` was delivered by this call. Returns
    /// `false` if the connection was already terminal, or if the close was
    /// deferred to the driver because another connection's callback on this
    /// thread asked for it while this connection's gate was busy.
    fn close(&self) -> bool {
        let _gate = match self.gate.try_lock() {
            Some(gate) => gate,
            None if CallbackScope::active() => {
                self.closing.store(true, Ordering::Release);
                if !self.closed.load(Ordering::Acquire) {
                    *self.state.lock() = SseConnectionState::Closed;
                }
                return false;
            }
            None => self.gate.lock(),
        };
        self.terminate(SseConnectionState::Closed)
    }

    fn set_state(&self, state: SseConnectionState) {
        let _gate = self.gate.lock();
        if !self.is_closed() {
            *self.state.lock() = state;
        }
    }

    fn state(&self) -> SseConnectionState {
        *self.state.lock()
    }

    fn last_event_id(&self) -> Option<Str> {
        self.last_event_id.lock().clone()
    }

    fn set_last_event_id(&self, id: Option<&Str>) {
        let mut current = self.last_event_id.lock();
        if current.as_ref() != id {
            *current = id.cloned();
        }
    }
}

// ---------------------------------------------------------------------------
// Public API: SseClient
// ---------------------------------------------------------------------------

/// Opens SSE connections over one shared HTTP connection pool.
///
/// Cloning is cheap; clones share the pool.
///
/// A client created inside a Tokio runtime remembers that runtime, so
/// [`open()`](SseClient::open) also works from threads outside it.
#[derive(Clone, Debug)]
pub struct SseClient {
    http: reqwest::Client,
    runtime: Option<Handle>,
}

impl SseClient {
    /// Create a client with a fresh connection pool.
    ///
    /// Captures the current Tokio runtime, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new() -> TransportResult<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self::with_http_client(http))
    }

    /// Use an existing [`reqwest::Client`] and its pool.
    ///
    /// Captures the current Tokio runtime, if any. Timeouts set on the client
    /// apply to the whole body and would cut long streams; leave them unset
    /// and use [`SseConfig`] timeouts instead.
    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self {
            http,
            runtime: Handle::try_current().ok(),
        }
    }

    /// Spawn connection tasks on `runtime`.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// The runtime connection tasks are spawned on: the one given at
    /// construction, else the current one.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Config`] if there is neither.
    pub(crate) fn runtime(&self) -> TransportResult<Handle> {
        match &self.runtime {
            Some(runtime) => Ok(runtime.clone()),
            None => Handle::try_current().map_err(|_| {
                TransportError::config(
                    "SSE client has no Tokio runtime; create it inside one or use with_runtime",
                )
            }),
        }
    }

    /// Open a connection that reports to `listener`.
    ///
    /// Returns immediately; connecting happens on a background task. Dropping
    /// every [`SseHandle`] closes the connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] for a malformed URL and
    /// [`TransportError::Config`] for invalid settings or when no runtime is
    /// available (see [`with_runtime()`](SseClient::with_runtime)). No
    /// callback runs in either case.
    pub fn open<L: SseListener>(&self, config: SseConfig, listener: L) -> TransportResult<SseHandle> {
        let request = config.build_request()?;
        let runtime = self.runtime()?;
        Ok(self.spawn(&runtime, config, request, listener))
    }

    /// Start the driver for an already validated request.
    pub(crate) fn spawn<L: SseListener>(
        &self,
        runtime: &Handle,
        config: SseConfig,
        request: SseRequest,
        listener: L,
    ) -> SseHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(
            request.url.to_string(),
            config.last_event_id.clone().map(str_from_string),
            Box::new(listener),
        ));

        runtime.spawn(sse_connection_driver(
            self.http.clone(),
            Arc::new(config),
            Arc::clone(&shared),
            cmd_rx,
            request,
        ));

        SseHandle { shared, cmd_tx }
    }

    /// Open a connection whose notifications are consumed as a [`Stream`].
    ///
    /// # Errors
    ///
    /// Same as [`open()`](SseClient::open).
    pub fn connect(&self, config: SseConfig) -> TransportResult<SseConnection> {
        let (listener, stream) = ChannelListener::new();
        let handle = self.open(config, listener)?;
        Ok(SseConnection { handle, stream })
    }
}

// ---------------------------------------------------------------------------
// Public API: SseConnection
// ---------------------------------------------------------------------------

/// A connection opened with [`SseClient::connect`].
///
/// Call [`split()`](SseConnection::split) to obtain a [`SseHandle`]
/// (for control) and [`SseStream`] (for notifications).
pub struct SseConnection {
    handle: SseHandle,
    stream: SseStream,
}

impl SseConnection {
    /// Split the connection into a control handle and notification stream.
    pub fn split(self) -> (SseHandle, SseStream) {
        (self.handle, self.stream)
    }

    /// Get a reference to the control handle.
    pub fn handle(&self) -> &SseHandle {
        &self.handle
    }
}

impl Stream for SseConnection {
    type Item = SseNotification;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.stream).poll_next(cx)
    }
}

// ---------------------------------------------------------------------------
// SseHandle
// ---------------------------------------------------------------------------

/// Clone-able handle for controlling a running SSE connection.
#[derive(Clone)]
pub struct SseHandle {
    shared: Arc<Shared>,
    cmd_tx: mpsc::UnboundedSender<SseCommand>,
}

impl SseHandle {
    /// Close the connection.
    ///
    /// Idempotent. Never waits on network I/O, but if one of this
    /// connection's callbacks is running on another thread it waits for that
    /// callback to return. `on_closed` is then delivered before this returns
    /// (unless the connection was already terminal), and no callback follows
    /// it.
    ///
    /// Called from inside a callback of a different connection whose own
    /// callback is running at that moment, it does not wait: no further
    /// callback starts, the state reads `Closed` at once, and `on_closed`
    /// follows as soon as the running callback returns.
    pub fn close(&self) {
        if self.shared.close() {
            info!(url = %self.shared.url, "SSE connection closed");
        }
        // The task may already be gone.
        let _ = self.cmd_tx.send(SseCommand::Close);
    }

    /// Abandon the current attempt and reconnect without waiting out the
    /// retry delay.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the connection is
    /// terminal.
    pub fn reconnect(&self, reason: &str) -> TransportResult<()> {
        if self.shared.is_closed() {
            return Err(TransportError::connection_closed("SSE connection is closed"));
        }
        self.cmd_tx
            .send(SseCommand::Reconnect {
                reason: reason.to_string(),
            })
            .map_err(|_| TransportError::connection_closed("SSE background task shut down"))
    }

    /// Current state of the connection.
    pub fn state(&self) -> SseConnectionState {
        self.shared.state()
    }

    /// The id that will be sent as `Last-Event-ID` on the next attempt.
    pub fn last_event_id(&self) -> Option<String> {
        self.shared.last_event_id().map(|id| id.to_string())
    }

    /// Returns `true` once the connection is closed or has failed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// The URL of the first request, query parameters included.
    pub fn url(&self) -> &str {
        &self.shared.url
    }
}

impl fmt::Debug for SseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseHandle")
            .field("url", &self.shared.url)
            .field("state", &self.shared.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SseStream
// ---------------------------------------------------------------------------

/// Stream of [`SseNotification`]s from an SSE connection.
///
/// Ends after [`SseNotification::Closed`].
pub struct SseStream {
    rx: mpsc::UnboundedReceiver<SseNotification>,
}

impl SseStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<SseNotification>) -> Self {
        Self { rx }
    }

    /// Receive the next notification, waiting until one is available.
    pub async fn next_notification(&mut self) -> Option<SseNotification> {
        self.rx.recv().await
    }
}

impl Stream for SseStream {
    type Item = SseNotification;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll_recv(cx)
    }
}

// ---------------------------------------------------------------------------
// Internal: establish a single HTTP connection
// ---------------------------------------------------------------------------

type Failure = (TransportError, Option<ResponseSnapshot>);

/// Send `request` and validate the response head.
///
/// Rejections carry a [`ResponseSnapshot`] of the response.
async fn establish_sse_connection(
    http: &reqwest::Client,
    config: &SseConfig,
    request: &SseRequest,
) -> Result<impl Stream<Item = Result<Bytes, reqwest::Error>> + use<>, Failure> {
    let mut req = http
        .request(request.method.clone(), request.url.clone())
        .headers(request.headers.clone());
    if let Some(body) = &request.body {
        req = req.body(body.clone());
    }

    let resp = match timeout(config.connect_timeout, req.send()).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(err)) => return Err((TransportError::Http(err), None)),
        Err(_) => return Err((TransportError::timeout(config.connect_timeout), None)),
    };

    // Validate status.
    let status = resp.status();
    if !status.is_success() {
        let snapshot =
            ResponseSnapshot::capture(resp, config.max_error_body_bytes, config.connect_timeout)
                .await;
        return Err((TransportError::sse_invalid_status(status), Some(snapshot)));
    }

    // Validate Content-Type.
    if let Some(ct) = resp.headers().get(http::header::CONTENT_TYPE) {
        let ct_str = String::from_utf8_lossy(ct.as_bytes()).into_owned();
        if !ct_str.to_ascii_lowercase().contains("text/event-stream") {
            let snapshot = ResponseSnapshot::capture(
                resp,
                config.max_error_body_bytes,
                config.connect_timeout,
            )
            .await;
            return Err((TransportError::sse_invalid_content_type(ct_str), Some(snapshot)));
        }
    }

    Ok(resp.bytes_stream())
}

/// Wait for the next frame, bounded by `read_timeout` when set.
async fn next_frame<S>(
    mut events: Pin<&mut S>,
    read_timeout: Option<Duration>,
) -> Result<Option<Frame>, TransportError>
where
    S: Stream<Item = Result<Frame, EventStreamError<reqwest::Error>>>,
{
    let item = match read_timeout {
        Some(limit) => timeout(limit, events.next())
            .await
            .map_err(|_| TransportError::timeout(limit))?,
        None => events.next().await,
    };
    item.transpose().map_err(|err| match err {
        EventStreamError::Transport(err) => TransportError::Http(err),
        EventStreamError::LineTooLong { limit } => TransportError::sse_line_too_long(limit),
    })
}

// ---------------------------------------------------------------------------
// Internal: background driver
// ---------------------------------------------------------------------------

/// How a single attempt ended.
enum Attempt {
    /// The connection is terminal; the driver exits.
    Closed,
    /// The caller asked for an immediate reconnect.
    Reconnect(String),
    /// Connecting or reading failed.
    Failed(Failure),
}

fn on_command(shared: &Shared, cmd: Option<SseCommand>) -> Attempt {
    match cmd {
        Some(SseCommand::Close) | None => {
            if shared.terminate(SseConnectionState::Closed) {
                info!(url = %shared.url, "SSE connection closing");
            }
            Attempt::Closed
        }
        Some(SseCommand::Reconnect { reason }) => Attempt::Reconnect(reason),
    }
}

/// Connect once and read until the stream breaks or a command arrives.
async fn run_attempt(
    http: &reqwest::Client,
    config: &SseConfig,
    shared: &Shared,
    cmd_rx: &mut mpsc::UnboundedReceiver<SseCommand>,
    request: &SseRequest,
    retry_delay: &mut Duration,
    attempt: &mut u32,
) -> Attempt {
    let connecting = tokio::select! {
        biased;

        cmd = cmd_rx.recv() => return on_command(shared, cmd),
        result = establish_sse_connection(http, config, request) => result,
    };
    let body = match connecting {
        Ok(body) => body,
        Err(failure) => return Attempt::Failed(failure),
    };

    let parser = EventParser::with_last_event_id(shared.last_event_id())
        .with_max_line_len(config.max_line_len);
    let mut events = Box::pin(EventStream::with_parser(body, parser));

    shared.set_state(SseConnectionState::Open);
    info!(url = %request.url, "SSE connection established");
    *attempt = 0;
    if shared.deliver(|l| l.on_open()).is_none() {
        return Attempt::Closed;
    }

    loop {
        let item = tokio::select! {
            biased;

            cmd = cmd_rx.recv() => return on_command(shared, cmd),
            item = next_frame(events.as_mut(), config.read_timeout) => item,
        };
        // Id-only blocks move the id without producing a frame.
        shared.set_last_event_id(events.last_event_id());

        let frame = match item {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!(url = %request.url, "SSE stream ended");
                return Attempt::Failed((TransportError::sse_stream_ended(), None));
            }
            Err(err) => return Attempt::Failed((err, None)),
        };

        let delivered = match frame {
            Frame::Event(event) => {
                debug!(
                    event_type = %&*event.event,
                    id = event.id_str(),
                    offset = event.offset,
                    "SSE event received",
                );
                shared.deliver(|l| l.on_message(&event))
            }
            Frame::Comment(comment) => shared.deliver(|l| l.on_comment(&comment)),
            Frame::Retry(suggested) => shared
                .deliver(|l| l.on_retry_time_suggested(suggested))
                .map(|accepted| {
                    if accepted {
                        debug!(delay_ms = suggested.as_millis() as u64, "SSE retry delay updated");
                        *retry_delay = suggested;
                    }
                }),
        };
        if delivered.is_none() {
            return Attempt::Closed;
        }
    }
}

/// The long-lived background task that drives the SSE connection.
///
/// It connects, reads frames, reports them to the listener, and reconnects
/// after the retry delay on failures.
async fn sse_connection_driver(
    http: reqwest::Client,
    config: Arc<SseConfig>,
    shared: Arc<Shared>,
    cmd_rx: mpsc::UnboundedReceiver<SseCommand>,
    request: SseRequest,
) {
    drive(&http, &config, &shared, cmd_rx, request).await;
    // Delivers a deferred `on_closed`; a no-op if already terminal.
    if shared.terminate(SseConnectionState::Closed) {
        info!(url = %shared.url, "SSE connection closed");
    }
}

async fn drive(
    http: &reqwest::Client,
    config: &SseConfig,
    shared: &Shared,
    mut cmd_rx: mpsc::UnboundedReceiver<SseCommand>,
    mut request: SseRequest,
) {
    let mut retry_delay = config.retry_delay;
    let mut attempt: u32 = 0;

    loop {
        if shared.is_closed() {
            return;
        }

        // --- Connect and read ---
        shared.set_state(SseConnectionState::Connecting);
        info!(url = %request.url, attempt, "SSE connecting");
        let outcome = run_attempt(
            http,
            config,
            shared,
            &mut cmd_rx,
            &request,
            &mut retry_delay,
            &mut attempt,
        )
        .await;

        let wait = match outcome {
            Attempt::Closed => return,
            Attempt::Reconnect(reason) => {
                warn!(reason = %reason, "SSE reconnect requested");
                false
            }
            Attempt::Failed((err, response)) => {
                error!(url = %request.url, error = %err, "SSE transport error");
                match shared.deliver(|l| l.on_transport_error(&err, response.as_ref())) {
                    None => return,
                    Some(false) => {
                        warn!("Listener declined retry, closing");
                        shared.terminate(SseConnectionState::Failed);
                        return;
                    }
                    Some(true) => true,
                }
            }
        };

        // --- Wait out the retry delay ---
        if wait {
            if let Some(max) = config.reconnect_max_attempts
                && attempt >= max
            {
                error!(attempts = max, "Max SSE reconnect attempts exceeded");
                shared.terminate(SseConnectionState::Failed);
                return;
            }

            let delay = calculate_backoff(config.backoff(retry_delay), attempt);
            attempt = attempt.saturating_add(1);
            shared.set_state(SseConnectionState::Retrying { attempt });
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "SSE reconnecting after delay"
            );

            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match on_command(shared, cmd) {
                        Attempt::Reconnect(reason) => {
                            debug!(reason = %reason, "SSE retry delay skipped");
                        }
                        _ => return,
                    }
                }
                () = sleep(delay) => {}
            }
        } else {
            shared.set_state(SseConnectionState::Retrying { attempt });
        }

        // --- Prepare the next request ---
        let mut next = request.clone();
        next.set_last_event_id(shared.last_event_id().as_deref());
        match shared.deliver(|l| l.on_before_retry(&next)) {
            None => return,
            Some(Some(replacement)) => request = replacement,
            Some(None) => {
                warn!("Listener cancelled retry, closing");
                shared.terminate(SseConnectionState::Failed);
                return;
            }
        }
    }
}
