//! Transport layer.
//!
//! Every backend channel is exposed through the [`Transport`] trait, so
//! application code sends commands and subscribes to events without knowing
//! which concrete channel backs it.
//!
//! # Architecture
//!
//! ```text
//!                         ┌──────────────────┐
//!                         │  dyn Transport   │
//!                         └────────┬─────────┘
//!          ┌───────────────────────┼────────────────────────┐
//!          ▼                       ▼                        ▼
//! ┌─────────────────┐   ┌────────────────────┐   ┌──────────────────────┐
//! │ LocalTransport  │   │  SocketTransport   │   │   HybridTransport    │
//! │ in-process host │   │ one WebSocket for  │   │ HTTP POST commands + │
//! │ bridge          │   │ commands + events  │   │ WebSocket for events │
//! └─────────────────┘   └────────────────────┘   └──────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `backoff` | Reconnect delay policy and single-timer guard |
//! | `hybrid` | HTTP command channel with a WebSocket event feed |
//! | `listeners` | Event registry, status notifier, subscription handles |
//! | `local` | In-process host bridge adapter |
//! | `socket` | Persistent WebSocket RPC/event multiplexer |
//! | `status` | Status monitor for UI consumers |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// Reconnect backoff policy.
pub mod backoff;

/// HTTP commands plus WebSocket events.
pub mod hybrid;

/// Listener registries and subscription handles.
pub mod listeners;

/// In-process host bridge transport.
pub mod local;

/// Persistent WebSocket transport.
pub mod socket;

/// Connection status monitor.
pub mod status;

mod ws;

#[cfg(test)]
mod test_server;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::{Backoff, ReconnectPolicy};
pub use hybrid::{HybridOptions, HybridTransport};
pub use listeners::{EventCallback, EventRegistry, StatusCallback, StatusNotifier, Subscription};
pub use local::{HostBridge, InProcessBridge, LocalTransport};
pub use socket::{SocketOptions, SocketTransport};
pub use status::StatusMonitor;

// ============================================================================
// ConnectionStatus
// ============================================================================

/// Externally visible connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No usable connection; a reconnect may be scheduled.
    Disconnected,
    /// A connection attempt (or handshake) is in progress.
    Connecting,
    /// Commands and events can flow.
    Connected,
}

impl ConnectionStatus {
    /// Returns `true` for [`ConnectionStatus::Connected`].
    #[inline]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

// ============================================================================
// TransportKind
// ============================================================================

/// Which concrete channel backs a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process host bridge.
    Local,
    /// Persistent WebSocket for commands and events.
    Socket,
    /// HTTP commands plus WebSocket events.
    Hybrid,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Socket => "socket",
            Self::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Uniform command/event contract.
///
/// # Errors
///
/// [`invoke`](Self::invoke) fails with:
///
/// - [`Error::CommandFailed`](crate::Error::CommandFailed) if the remote end
///   reports failure
/// - a timeout error if no response (or no connection) arrives in time
/// - [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if the
///   channel drops mid-flight
/// - [`Error::Disposed`](crate::Error::Disposed) after [`dispose`](Self::dispose)
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns which channel backs this transport.
    fn kind(&self) -> TransportKind;

    /// Sends one command and waits for its result.
    ///
    /// `use_compression` asks for a compressed request payload (socket) or
    /// a gzip-negotiated response (HTTP). It is a hint; transports without a
    /// wire ignore it.
    async fn invoke(
        &self,
        command: &str,
        payload: Option<Value>,
        use_compression: bool,
    ) -> Result<Value>;

    /// Registers an event listener. Additive; the returned handle's
    /// `unsubscribe` is idempotent.
    fn on_event(&self, event: &str, callback: EventCallback) -> Subscription;

    /// Point-in-time connection snapshot.
    fn is_connected(&self) -> bool;

    /// Registers a status listener, replaying the current status first.
    ///
    /// `None` means the transport has no status: treat it as always connected.
    fn on_status_change(&self, _listener: StatusCallback) -> Option<Subscription> {
        None
    }

    /// Current status.
    fn status(&self) -> ConnectionStatus {
        if self.is_connected() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    /// Tears the transport down. Later calls fail with `Disposed`.
    fn dispose(&self) {}
}

// ============================================================================
// TransportExt
// ============================================================================

/// Typed helpers over [`Transport`].
pub trait TransportExt: Transport {
    /// Invokes a command with a serializable payload and deserializes the
    /// result.
    fn invoke_as<T, P>(
        &self,
        command: &str,
        payload: &P,
    ) -> impl Future<Output = Result<T>> + Send
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload);
        async move {
            let value = self.invoke(command, Some(payload?), false).await?;
            Ok(serde_json::from_value(value)?)
        }
    }

    /// Registers a typed event listener.
    ///
    /// Payloads that do not deserialize into `T` are logged and skipped.
    fn on_event_as<T, F>(&self, event: &str, callback: F) -> Subscription
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = event.to_string();
        self.on_event(
            event,
            Arc::new(move |payload: &Value| match T::deserialize(payload) {
                Ok(typed) => callback(typed),
                Err(e) => warn!(event = %name, error = %e, "Dropping event with unexpected payload"),
            }),
        )
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}

// ============================================================================
// Tests
// ============================================================================
