//! Persistent WebSocket transport.
//!
//! One socket carries both correlated commands and server-pushed events.
//!
//! # State Machine
//!
//! ```text
//!             new()
//!               │
//!               ▼
//!  ┌──────► Connecting ──open──► Connected
//!  │            │                    │
//!  │       fail │          close/error
//!  │            ▼                    │
//!  └─backoff─ Disconnected ◄─────────┘
//! ```
//!
//! A supervisor task owns the socket and applies every transition, so
//! transitions are serialized. Each socket gets a generation number; cleanup
//! for a superseded generation is a no-op.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::codec;
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::identifiers::{RequestId, RequestIdGenerator};
use crate::protocol::{ControlFrame, Request, Response, ServerMessage};

use super::backoff::{Backoff, ReconnectPolicy};
use super::listeners::{EventCallback, EventRegistry, StatusCallback, StatusNotifier, Subscription};
use super::ws::{self, WsStream};
use super::{ConnectionStatus, Transport, TransportKind};

// ============================================================================
// Constants
// ============================================================================

/// Deadline for a correlated response.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for a connection to become available to `invoke`.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Keepalive ping period while connected.
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

// ============================================================================
// SocketOptions
// ============================================================================

/// Tunables for [`SocketTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct SocketOptions {
    /// Deadline for each correlated response.
    pub request_timeout: Duration,
    /// Deadline for `invoke` to wait for a connection, and for each dial.
    pub connect_timeout: Duration,
    /// Keepalive ping period.
    pub keepalive_interval: Duration,
    /// Whether responses may carry compressed data.
    pub accept_gzip: bool,
    /// Reconnect backoff policy.
    pub reconnect: ReconnectPolicy,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            accept_gzip: true,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// A caller waiting for its correlated response.
struct PendingRequest {
    command: String,
    response_tx: oneshot::Sender<Result<Value>>,
}

/// Map of request IDs to response channels.
type CorrelationMap = FxHashMap<RequestId, PendingRequest>;

/// Outgoing frame queue of the current socket.
struct SocketWriter {
    generation: u64,
    tx: mpsc::UnboundedSender<Message>,
}

// ============================================================================
// Shared
// ============================================================================

/// State shared between the public handle and the supervisor task.
struct Shared {
    url: Url,
    token: Option<String>,
    options: SocketOptions,
    ids: RequestIdGenerator,
    status: StatusNotifier,
    pending: Mutex<CorrelationMap>,
    waiters: Mutex<Vec<oneshot::Sender<Result<()>>>>,
    writer: Mutex<Option<SocketWriter>>,
    generation: AtomicU64,
    listeners: EventRegistry,
    disposed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

// ============================================================================
// SocketTransport
// ============================================================================

/// Transport over one persistent WebSocket.
///
/// Construction starts the first connection attempt immediately; the
/// initial status is `connecting`. Dropping the transport disposes it.
///
/// # Example
///
/// ```ignore
/// let url = Url::parse("wss://backend.example/ws")?;
/// let transport = SocketTransport::new(url, Some(token), SocketOptions::default());
///
/// let sessions = transport.invoke("sessions.list", None, false).await?;
/// let sub = transport.on_event("sessions-changed", Arc::new(|payload| {
///     println!("changed: {payload}");
/// }));
/// ```
pub struct SocketTransport {
    shared: Arc<Shared>,
}

// ============================================================================
// SocketTransport - Constructor
// ============================================================================

impl SocketTransport {
    /// Creates the transport and spawns its supervisor task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(url: Url, token: Option<String>, options: SocketOptions) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            url,
            token,
            options,
            ids: RequestIdGenerator::new(),
            status: StatusNotifier::new(ConnectionStatus::Connecting),
            pending: Mutex::new(CorrelationMap::default()),
            waiters: Mutex::new(Vec::new()),
            writer: Mutex::new(None),
            generation: AtomicU64::new(0),
            listeners: EventRegistry::new(),
            disposed: AtomicBool::new(false),
            shutdown_tx,
        });

        tokio::spawn(Shared::run_supervisor(Arc::clone(&shared), shutdown_rx));

        Self { shared }
    }

    /// Creates the transport from a resolved remote configuration.
    #[must_use]
    pub fn from_config(config: &RemoteConfig, options: SocketOptions) -> Self {
        Self::new(config.ws_url.clone(), config.token.clone(), options)
    }

    /// Returns the number of requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Returns a receiver that observes every status change.
    #[inline]
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.watch()
    }
}

// ============================================================================
// SocketTransport - Transport
// ============================================================================

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn invoke(
        &self,
        command: &str,
        payload: Option<Value>,
        use_compression: bool,
    ) -> Result<Value> {
        let shared = &self.shared;

        if shared.is_disposed() {
            return Err(Error::Disposed);
        }

        if !self.is_connected() {
            shared.wait_for_connection().await?;
        }

        let request_id = shared.ids.next_id();
        let request = Request::prepare(
            request_id,
            command,
            payload,
            use_compression,
            shared.options.accept_gzip,
            codec::encode_payload,
        );
        let message = ws::text_frame(&request)?;

        let (response_tx, response_rx) = oneshot::channel();
        shared.pending.lock().insert(
            request_id,
            PendingRequest {
                command: command.to_string(),
                response_tx,
            },
        );
        let _guard = PendingGuard {
            shared,
            request_id,
        };

        shared.send(message)?;
        trace!(%request_id, command, compressed = request.compressed, "Request sent");

        let request_timeout = shared.options.request_timeout;
        match timeout(request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                warn!(%request_id, command, "Request timed out");
                Err(Error::request_timeout(
                    request_id,
                    request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    fn on_event(&self, event: &str, callback: EventCallback) -> Subscription {
        self.shared.listeners.subscribe(event, callback)
    }

    fn is_connected(&self) -> bool {
        !self.shared.is_disposed() && self.shared.status.get().is_connected()
    }

    fn on_status_change(&self, listener: StatusCallback) -> Option<Subscription> {
        Some(self.shared.status.subscribe(listener))
    }

    fn status(&self) -> ConnectionStatus {
        self.shared.status.get()
    }

    fn dispose(&self) {
        self.shared.dispose();
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

// ============================================================================
// PendingGuard
// ============================================================================

/// Removes a correlation entry when the invoking future finishes or is
/// dropped, whichever comes first.
struct PendingGuard<'a> {
    shared: &'a Shared,
    request_id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.request_id);
    }
}

// ============================================================================
// Shared - Caller Side
// ============================================================================

impl Shared {
    #[inline]
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Waits until the socket opens, it closes, or the connect deadline
    /// passes.
    async fn wait_for_connection(&self) -> Result<()> {
        let waiter = {
            let mut waiters = self.waiters.lock();
            if self.is_disposed() {
                return Err(Error::Disposed);
            }
            if self.status.get().is_connected() {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            rx
        };

        let connect_timeout = self.options.connect_timeout;
        match timeout(connect_timeout, waiter).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::connection_timeout(
                connect_timeout.as_millis() as u64,
            )),
        }
    }

    /// Queues a frame on the current socket.
    fn send(&self, message: Message) -> Result<()> {
        let writer = self.writer.lock();
        match writer.as_ref() {
            Some(writer) => writer
                .tx
                .send(message)
                .map_err(|_| Error::ConnectionClosed),
            None => Err(Error::ConnectionClosed),
        }
    }

    /// Rejects every pending request.
    fn fail_pending(&self, make_error: fn() -> Error) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        let count = pending.len();

        for (_, request) in pending {
            let _ = request.response_tx.send(Err(make_error()));
        }

        if count > 0 {
            debug!(count, "Failed pending requests");
        }
    }

    /// Rejects every caller waiting for the connection.
    fn fail_waiters(&self, make_error: fn() -> Error) {
        let waiters: Vec<_> = self.waiters.lock().drain(..).collect();
        for waiter in waiters {
            let _ = waiter.send(Err(make_error()));
        }
    }

    /// Disposes the transport. Idempotent.
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Supersede the live socket so its late cleanup is ignored.
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.writer.lock().take();
        self.shutdown_tx.send_replace(true);

        self.fail_pending(|| Error::Disposed);
        self.fail_waiters(|| Error::Disposed);
        self.status.set(ConnectionStatus::Disconnected);

        info!(url = %self.url, "Socket transport disposed");
    }
}

// ============================================================================
// Shared - Supervisor
// ============================================================================

impl Shared {
    /// Connect → session → cleanup → backoff, until disposed.
    async fn run_supervisor(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.options.reconnect);

        loop {
            if self.is_disposed() {
                break;
            }

            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.status.set(ConnectionStatus::Connecting);

            let connected = tokio::select! {
                result = ws::connect(&self.url, self.options.connect_timeout) => result,
                () = ws::shutdown_requested(&mut shutdown_rx) => break,
            };

            match connected {
                Ok(stream) => {
                    self.run_session(generation, stream, &mut backoff, &mut shutdown_rx)
                        .await;
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, "Socket connect failed");
                }
            }

            self.handle_terminated(generation);

            if self.is_disposed() {
                break;
            }

            let Some(delay) = backoff.schedule() else {
                continue;
            };
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = backoff.attempt(),
                "Scheduling reconnect"
            );

            tokio::select! {
                () = sleep(delay) => backoff.fire(),
                () = ws::shutdown_requested(&mut shutdown_rx) => {
                    backoff.fire();
                    break;
                }
            }
        }

        debug!("Socket supervisor terminated");
    }

    /// Runs one open socket until it closes or the transport is disposed.
    async fn run_session(
        &self,
        generation: u64,
        stream: WsStream,
        backoff: &mut Backoff,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        let (mut ws_write, mut ws_read) = stream.split();

        // Auth must be the first frame on the wire.
        if let Some(token) = &self.token {
            let sent = match ws::text_frame(&ControlFrame::auth(token.as_str())) {
                Ok(frame) => ws_write.send(frame).await.map_err(Error::from),
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                warn!(error = %e, "Failed to send auth frame");
                return;
            }
        }

        let (tx, mut outgoing_rx) = mpsc::unbounded_channel();
        if !self.handle_open(generation, tx) {
            let _ = ws_write.close().await;
            return;
        }
        backoff.reset();

        let mut keepalive = ws::keepalive(self.options.keepalive_interval);

        loop {
            tokio::select! {
                // Incoming frames from the server
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = self.dispatch(&text)
                                && let Ok(frame) = ws::text_frame(&reply)
                                && let Err(e) = ws_write.send(frame).await
                            {
                                warn!(error = %e, "Failed to send pong");
                                break;
                            }
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Binary and protocol-level ping/pong
                        Some(Ok(_)) => {}
                    }
                }

                // Frames queued by callers
                outgoing = outgoing_rx.recv() => {
                    let Some(message) = outgoing else {
                        break;
                    };
                    if let Err(e) = ws_write.send(message).await {
                        warn!(error = %e, "Failed to send frame");
                        break;
                    }
                }

                // Keepalive
                _ = keepalive.tick() => {
                    let ping = ws::text_frame(&ControlFrame::ping());
                    if let Ok(ping) = ping
                        && let Err(e) = ws_write.send(ping).await
                    {
                        warn!(error = %e, "Failed to send keepalive");
                        break;
                    }
                    trace!("Keepalive sent");
                }

                // Disposal
                () = ws::shutdown_requested(shutdown_rx) => {
                    let _ = ws_write.close().await;
                    break;
                }
            }
        }
    }

    /// Applies the open transition. Returns `false` if the socket is stale.
    fn handle_open(&self, generation: u64, tx: mpsc::UnboundedSender<Message>) -> bool {
        if self.is_disposed() || self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }

        *self.writer.lock() = Some(SocketWriter { generation, tx });
        self.status.set(ConnectionStatus::Connected);

        let waiters: Vec<_> = self.waiters.lock().drain(..).collect();
        for waiter in waiters {
            let _ = waiter.send(Ok(()));
        }

        info!(url = %self.url, generation, "Socket connected");
        true
    }

    /// Applies the terminated transition (close and error are one signal).
    ///
    /// No-op unless `generation` is still the current socket.
    fn handle_terminated(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            trace!(generation, "Ignoring termination of superseded socket");
            return;
        }

        {
            let mut writer = self.writer.lock();
            if writer.as_ref().is_some_and(|w| w.generation == generation) {
                *writer = None;
            }
        }

        self.fail_pending(|| Error::ConnectionClosed);
        self.fail_waiters(|| Error::ConnectionClosed);

        if self.status.set(ConnectionStatus::Disconnected) {
            info!(url = %self.url, generation, "Socket disconnected");
        }
    }

    /// Handles one text frame. Returns a frame to send back, if any.
    fn dispatch(&self, text: &str) -> Option<ControlFrame> {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, text = %text, "Failed to parse incoming frame");
                return None;
            }
        };

        match message {
            ServerMessage::Response(response) => self.resolve(response),
            ServerMessage::MalformedResponse { id, reason } => self.reject(&id, &reason),
            ServerMessage::Event(frame) => {
                let delivered = self.listeners.emit(&frame.event, &frame.payload);
                trace!(event = %frame.event, delivered, "Event dispatched");
            }
            ServerMessage::Pong => {}
            ServerMessage::Ping => return Some(ControlFrame::pong()),
            ServerMessage::AuthOk => debug!("Auth accepted"),
            ServerMessage::AuthRejected(message) => {
                error!(message = %message, "Server reported an error");
            }
            ServerMessage::Unknown(value) => {
                warn!(frame = %value, "Unrecognized frame");
            }
        }

        None
    }

    /// Completes the pending request a response belongs to.
    fn resolve(&self, response: Response) {
        let Ok(request_id) = response.id.parse::<RequestId>() else {
            warn!(id = %response.id, "Response with malformed id");
            return;
        };

        let pending = self.pending.lock().remove(&request_id);
        match pending {
            Some(pending) => {
                let result = response.into_result(&pending.command);
                let _ = pending.response_tx.send(result);
            }
            None => warn!(%request_id, "Response for unknown request"),
        }
    }

    /// Fails the pending request a malformed response belongs to.
    fn reject(&self, id: &str, reason: &str) {
        let pending = id
            .parse::<RequestId>()
            .ok()
            .and_then(|request_id| self.pending.lock().remove(&request_id));

        match pending {
            Some(pending) => {
                warn!(id, command = %pending.command, reason, "Malformed response");
                let _ = pending.response_tx.send(Err(Error::protocol(format!(
                    "Malformed response to '{}': {reason}",
                    pending.command
                ))));
            }
            None => warn!(id, reason, "Malformed response for unknown request"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
