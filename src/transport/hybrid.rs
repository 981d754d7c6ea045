//! HTTP commands plus a WebSocket event feed.
//!
//! Commands are stateless `POST <base>/api` exchanges, so no correlation map
//! is needed. Server pushes arrive over a separate socket that runs its own
//! lifecycle:
//!
//! ```text
//!  Disconnected ──► Connecting ──open──► Authenticating ──{auth:"ok"}──► Ready
//!       ▲                │                     │                          │
//!       │                │ fail      {error} / deadline             close/error
//!       └────backoff─────┴─────────────────────┴──────────────────────────┘
//! ```
//!
//! Without a token the socket goes straight from open to `Ready`. Events are
//! only dispatched while `Ready`.
//!
//! The visible status combines both channels, see [`composite_status`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::header::ACCEPT_ENCODING;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::protocol::{ControlFrame, HttpCommand, HttpReply, ServerMessage};

use super::backoff::{Backoff, ReconnectPolicy};
use super::listeners::{EventCallback, EventRegistry, StatusCallback, StatusNotifier, Subscription};
use super::ws::{self, WsStream};
use super::{ConnectionStatus, Transport, TransportKind};

// ============================================================================
// Constants
// ============================================================================

/// Deadline for each HTTP command.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for dialing the event socket or the HTTP endpoint.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for the server to answer the auth frame.
const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Keepalive ping period on the event socket.
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

// ============================================================================
// HybridOptions
// ============================================================================

/// Tunables for [`HybridTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct HybridOptions {
    /// Deadline for each HTTP command.
    pub request_timeout: Duration,
    /// Deadline for dialing either channel.
    pub connect_timeout: Duration,
    /// Deadline for `{"auth": "ok"}` after the auth frame is sent.
    pub auth_timeout: Duration,
    /// Keepalive ping period on the event socket.
    pub keepalive_interval: Duration,
    /// Event socket reconnect policy.
    pub reconnect: ReconnectPolicy,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

// ============================================================================
// EventPhase
// ============================================================================

/// Lifecycle of the event socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    /// No socket; a reconnect may be pending.
    Disconnected,
    /// Dialing.
    Connecting,
    /// Open, auth frame sent, waiting for `{"auth": "ok"}`.
    Authenticating,
    /// Events flow.
    Ready,
}

/// Derives the visible status from both channels.
///
/// `Connected` requires a ready event socket. While the socket is down, a
/// reachable HTTP channel holds the status at `Connecting` so a brief event
/// reconnect does not flap to `Disconnected`.
#[must_use]
pub const fn composite_status(phase: EventPhase, http_reachable: bool) -> ConnectionStatus {
    match phase {
        EventPhase::Ready => ConnectionStatus::Connected,
        EventPhase::Connecting | EventPhase::Authenticating => ConnectionStatus::Connecting,
        EventPhase::Disconnected if http_reachable => ConnectionStatus::Connecting,
        EventPhase::Disconnected => ConnectionStatus::Disconnected,
    }
}

// ============================================================================
// Shared
// ============================================================================

struct Shared {
    api_url: Url,
    ws_url: Url,
    token: Option<String>,
    options: HybridOptions,
    client: reqwest::Client,
    phase: Mutex<EventPhase>,
    http_reachable: AtomicBool,
    status: StatusNotifier,
    listeners: EventRegistry,
    generation: AtomicU64,
    disposed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

// ============================================================================
// HybridTransport
// ============================================================================

/// HTTP command channel with a WebSocket event feed.
///
/// A failed command never tears down the event socket, and a dropped event
/// socket never fails a command, and [`dispose`](Transport::dispose)
/// cancels commands still in flight.
pub struct HybridTransport {
    shared: Arc<Shared>,
}

impl HybridTransport {
    /// Creates the transport and starts the event socket.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the API URL cannot be derived from `http_base`
    /// or the HTTP client cannot be built.
    pub fn new(
        http_base: Url,
        ws_url: Url,
        token: Option<String>,
        options: HybridOptions,
    ) -> Result<Self> {
        let api_url = Url::parse(&format!(
            "{}/api",
            http_base.as_str().trim_end_matches('/')
        ))?;

        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            api_url,
            ws_url,
            token,
            options,
            client,
            phase: Mutex::new(EventPhase::Connecting),
            http_reachable: AtomicBool::new(false),
            status: StatusNotifier::new(ConnectionStatus::Connecting),
            listeners: EventRegistry::new(),
            generation: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            shutdown_tx,
        });

        tokio::spawn(Shared::run_supervisor(Arc::clone(&shared), shutdown_rx));

        Ok(Self { shared })
    }

    /// Creates the transport from a resolved remote configuration.
    ///
    /// # Errors
    ///
    /// See [`HybridTransport::new`].
    pub fn from_config(config: &RemoteConfig, options: HybridOptions) -> Result<Self> {
        Self::new(
            config.http_base_url.clone(),
            config.ws_url.clone(),
            config.token.clone(),
            options,
        )
    }

    /// Returns the command endpoint.
    #[inline]
    #[must_use]
    pub fn api_url(&self) -> &Url {
        &self.shared.api_url
    }

    /// Returns the event socket phase.
    #[inline]
    #[must_use]
    pub fn event_phase(&self) -> EventPhase {
        *self.shared.phase.lock()
    }

    /// Returns whether the last HTTP command reached the server.
    #[inline]
    #[must_use]
    pub fn http_reachable(&self) -> bool {
        self.shared.http_reachable.load(Ordering::SeqCst)
    }

    /// Returns a receiver that observes every status change.
    #[inline]
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.watch()
    }
}

#[async_trait]
impl Transport for HybridTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Hybrid
    }

    async fn invoke(
        &self,
        command: &str,
        payload: Option<Value>,
        use_compression: bool,
    ) -> Result<Value> {
        if self.shared.is_disposed() {
            return Err(Error::Disposed);
        }
        self.shared.post(command, payload, use_compression).await
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

impl Drop for HybridTransport {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

// ============================================================================
// Shared - Command Channel
// ============================================================================

impl Shared {
    #[inline]
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Sends one command over HTTP.
    async fn post(
        &self,
        command: &str,
        payload: Option<Value>,
        use_compression: bool,
    ) -> Result<Value> {
        let body = HttpCommand {
            command,
            payload: payload.unwrap_or(Value::Null),
        };
        let encoding = if use_compression { "gzip" } else { "identity" };

        let mut request = self
            .client
            .post(self.api_url.clone())
            .timeout(self.options.request_timeout)
            .header(ACCEPT_ENCODING, encoding)
            .json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        trace!(command, url = %self.api_url, "POST command");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let sent = tokio::select! {
            sent = request.send() => sent,
            () = ws::shutdown_requested(&mut shutdown_rx) => return Err(Error::Disposed),
        };

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                self.set_http_reachable(false);
                warn!(command, error = %e, "Command request failed");
                return Err(if e.is_timeout() {
                    Error::timeout(
                        format!("POST {} ({command})", self.api_url),
                        self.options.request_timeout.as_millis() as u64,
                    )
                } else {
                    Error::connection(format!("POST {} failed: {e}", self.api_url))
                });
            }
        };

        // Any HTTP answer proves the server is up.
        self.set_http_reachable(true);

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                body = response.text() => body.unwrap_or_default(),
                () = ws::shutdown_requested(&mut shutdown_rx) => return Err(Error::Disposed),
            };
            debug!(command, %status, "Command rejected by HTTP status");
            return Err(Error::command_failed(command, format!("HTTP {status}: {body}")));
        }

        let reply = tokio::select! {
            reply = response.json::<HttpReply>() => reply,
            () = ws::shutdown_requested(&mut shutdown_rx) => return Err(Error::Disposed),
        };
        reply
            .map_err(|e| Error::decode(format!("Invalid reply to '{command}': {e}")))?
            .into_result(command)
    }

    fn set_http_reachable(&self, reachable: bool) {
        let previous = self.http_reachable.swap(reachable, Ordering::SeqCst);
        if previous != reachable {
            self.refresh_status();
        }
    }
}

// ============================================================================
// Shared - Status
// ============================================================================

impl Shared {
    /// Sets the event phase if `generation` is still current.
    fn set_phase(&self, generation: u64, phase: EventPhase) {
        if self.generation.load(Ordering::SeqCst) != generation {
            trace!(generation, ?phase, "Ignoring phase of superseded socket");
            return;
        }
        *self.phase.lock() = phase;
        self.refresh_status();
    }

    fn phase(&self) -> EventPhase {
        *self.phase.lock()
    }

    /// Recomputes the visible status. Listeners run after the status lock
    /// is released, so they may call back into the transport.
    fn refresh_status(&self) {
        let changed = self.status.update(|_| {
            if self.is_disposed() {
                ConnectionStatus::Disconnected
            } else {
                composite_status(self.phase(), self.http_reachable.load(Ordering::SeqCst))
            }
        });
        if let Some(status) = changed {
            debug!(%status, "Hybrid status changed");
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);
        *self.phase.lock() = EventPhase::Disconnected;
        self.refresh_status();

        info!(url = %self.ws_url, "Hybrid transport disposed");
    }
}

// ============================================================================
// Shared - Event Channel
// ============================================================================

impl Shared {
    async fn run_supervisor(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.options.reconnect);

        loop {
            if self.is_disposed() {
                break;
            }

            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.set_phase(generation, EventPhase::Connecting);

            let connected = tokio::select! {
                result = ws::connect(&self.ws_url, self.options.connect_timeout) => result,
                () = ws::shutdown_requested(&mut shutdown_rx) => break,
            };

            match connected {
                Ok(stream) => {
                    self.run_session(generation, stream, &mut backoff, &mut shutdown_rx)
                        .await;
                }
                Err(e) => warn!(url = %self.ws_url, error = %e, "Event socket connect failed"),
            }

            self.set_phase(generation, EventPhase::Disconnected);

            if self.is_disposed() {
                break;
            }

            let Some(delay) = backoff.schedule() else {
                continue;
            };
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = backoff.attempt(),
                "Scheduling event socket reconnect"
            );

            tokio::select! {
                () = sleep(delay) => backoff.fire(),
                () = ws::shutdown_requested(&mut shutdown_rx) => {
                    backoff.fire();
                    break;
                }
            }
        }

        debug!("Event socket supervisor terminated");
    }

    /// Runs one open event socket until it closes, auth fails, or the
    /// transport is disposed.
    async fn run_session(
        &self,
        generation: u64,
        stream: WsStream,
        backoff: &mut Backoff,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        let (mut ws_write, mut ws_read) = stream.split();

        match &self.token {
            Some(token) => {
                let sent = match ws::text_frame(&ControlFrame::auth(token.as_str())) {
                    Ok(frame) => ws_write.send(frame).await.map_err(Error::from),
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    warn!(error = %e, "Failed to send auth frame");
                    return;
                }
                self.set_phase(generation, EventPhase::Authenticating);
                debug!("Event socket authenticating");
            }
            None => {
                self.set_phase(generation, EventPhase::Ready);
                backoff.reset();
                info!(url = %self.ws_url, "Event socket ready");
            }
        }

        let auth_deadline = sleep(self.options.auth_timeout);
        tokio::pin!(auth_deadline);
        let mut keepalive = ws::keepalive(self.options.keepalive_interval);

        loop {
            let authenticating = self.phase() == EventPhase::Authenticating;

            tokio::select! {
                message = ws_read.next() => {
                    let text = match message {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "Event socket closed by remote");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Event socket error");
                            break;
                        }
                        None => break,
                        Some(Ok(_)) => continue,
                    };

                    match self.handle_frame(generation, &text, backoff) {
                        FrameOutcome::Continue => {}
                        FrameOutcome::Reply(frame) => {
                            if let Ok(frame) = ws::text_frame(&frame)
                                && let Err(e) = ws_write.send(frame).await
                            {
                                warn!(error = %e, "Failed to send pong");
                                break;
                            }
                        }
                        FrameOutcome::Close => {
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }

                () = &mut auth_deadline, if authenticating => {
                    warn!(
                        timeout_ms = self.options.auth_timeout.as_millis() as u64,
                        "Auth handshake timed out"
                    );
                    let _ = ws_write.close().await;
                    break;
                }

                _ = keepalive.tick() => {
                    if let Ok(ping) = ws::text_frame(&ControlFrame::ping())
                        && let Err(e) = ws_write.send(ping).await
                    {
                        warn!(error = %e, "Failed to send keepalive");
                        break;
                    }
                }

                () = ws::shutdown_requested(shutdown_rx) => {
                    let _ = ws_write.close().await;
                    break;
                }
            }
        }
    }

    /// Handles one text frame from the event socket.
    fn handle_frame(&self, generation: u64, text: &str, backoff: &mut Backoff) -> FrameOutcome {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, text = %text, "Failed to parse event frame");
                return FrameOutcome::Continue;
            }
        };

        let phase = self.phase();
        match message {
            ServerMessage::Event(frame) if phase == EventPhase::Ready => {
                let delivered = self.listeners.emit(&frame.event, &frame.payload);
                trace!(event = %frame.event, delivered, "Event dispatched");
            }
            ServerMessage::Event(frame) => {
                debug!(event = %frame.event, ?phase, "Dropping event before auth");
            }
            ServerMessage::AuthOk if phase == EventPhase::Authenticating => {
                self.set_phase(generation, EventPhase::Ready);
                backoff.reset();
                info!(url = %self.ws_url, "Event socket ready");
            }
            ServerMessage::AuthOk => {}
            ServerMessage::AuthRejected(message) if phase == EventPhase::Authenticating => {
                warn!(message = %message, "Event socket auth rejected");
                return FrameOutcome::Close;
            }
            ServerMessage::AuthRejected(message) => {
                error!(message = %message, "Server reported an error");
            }
            ServerMessage::Ping => return FrameOutcome::Reply(ControlFrame::pong()),
            ServerMessage::Pong => {}
            ServerMessage::Response(response) => {
                warn!(id = %response.id, "Unexpected response on event socket");
            }
            ServerMessage::MalformedResponse { id, .. } => {
                warn!(id = %id, "Unexpected response on event socket");
            }
            ServerMessage::Unknown(value) => warn!(frame = %value, "Unrecognized frame"),
        }

        FrameOutcome::Continue
    }
}

/// What the session loop does after a frame.
enum FrameOutcome {
    Continue,
    Reply(ControlFrame),
    Close,
}

// ============================================================================
// Tests
// ============================================================================
