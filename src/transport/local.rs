//! In-process host bridge transport.
//!
//! When the application runs inside a host that exposes commands and events
//! directly, there is no network: [`LocalTransport`] forwards every call to a
//! [`HostBridge`], reports itself as always connected, and has no status
//! stream.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};

use super::listeners::{EventCallback, EventRegistry, Subscription};
use super::{Transport, TransportKind};

// ============================================================================
// HostBridge
// ============================================================================

/// The host's always-available command/event bridge.
#[async_trait]
pub trait HostBridge: Send + Sync {
    /// Runs a command in the host.
    async fn invoke(&self, command: &str, payload: Value) -> Result<Value>;

    /// Subscribes to a host event.
    fn listen(&self, event: &str, callback: EventCallback) -> Subscription;
}

// ============================================================================
// InProcessBridge
// ============================================================================

/// Async command handler registered on an [`InProcessBridge`].
pub type CommandHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A [`HostBridge`] backed by handlers registered in the same process.
///
/// # Example
///
/// ```ignore
/// let bridge = Arc::new(InProcessBridge::new());
/// bridge.register("app.version", |_| async { Ok(json!("1.4.0")) });
/// bridge.emit("sessions-changed", &json!({"count": 3}));
/// ```
#[derive(Default)]
pub struct InProcessBridge {
    handlers: RwLock<FxHashMap<String, CommandHandler>>,
    listeners: EventRegistry,
}

impl InProcessBridge {
    /// Creates a bridge with no handlers.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the handler for `command`.
    pub fn register<F, Fut>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: CommandHandler = Arc::new(move |payload| handler(payload).boxed());
        self.handlers.write().insert(command.into(), handler);
    }

    /// Pushes an event to every listener of `event`.
    ///
    /// Returns the number of listeners invoked.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        self.listeners.emit(event, payload)
    }
}

#[async_trait]
impl HostBridge for InProcessBridge {
    async fn invoke(&self, command: &str, payload: Value) -> Result<Value> {
        let handler = self.handlers.read().get(command).cloned();
        match handler {
            Some(handler) => handler(payload).await,
            None => Err(Error::command_failed(command, "Unknown command")),
        }
    }

    fn listen(&self, event: &str, callback: EventCallback) -> Subscription {
        self.listeners.subscribe(event, callback)
    }
}

// ============================================================================
// LocalTransport
// ============================================================================

/// Transport over an in-process [`HostBridge`].
pub struct LocalTransport {
    bridge: Arc<dyn HostBridge>,
}

impl LocalTransport {
    /// Wraps a host bridge.
    #[inline]
    #[must_use]
    pub fn new(bridge: Arc<dyn HostBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    async fn invoke(
        &self,
        command: &str,
        payload: Option<Value>,
        _use_compression: bool,
    ) -> Result<Value> {
        trace!(command, "Invoking host command");
        self.bridge
            .invoke(command, payload.unwrap_or(Value::Null))
            .await
    }

    fn on_event(&self, event: &str, callback: EventCallback) -> Subscription {
        self.bridge.listen(event, callback)
    }

    fn is_connected(&self) -> bool {
        true
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::transport::ConnectionStatus;

    fn echo_bridge() -> Arc<InProcessBridge> {
        let bridge = Arc::new(InProcessBridge::new());
        bridge.register("echo", |payload| async move { Ok(payload) });
        bridge.register("fail", |_| async {
            Err(Error::command_failed("fail", "host refused"))
        });
        bridge
    }

    #[tokio::test]
    async fn test_invoke_delegates_to_bridge() {
        let transport = LocalTransport::new(echo_bridge());

        let result = transport
            .invoke("echo", Some(json!({"x": 1})), true)
            .await
            .expect("invoke");
        assert_eq!(result, json!({"x": 1}));

        let empty = transport.invoke("echo", None, false).await.expect("invoke");
        assert_eq!(empty, Value::Null);
    }

    #[tokio::test]
    async fn test_invoke_failures() {
        let transport = LocalTransport::new(echo_bridge());

        let err = transport.invoke("fail", None, false).await.unwrap_err();
        assert!(err.is_command_failure());

        let err = transport.invoke("missing", None, false).await.unwrap_err();
        assert!(
            matches!(err, Error::CommandFailed { ref command, .. } if command == "missing")
        );
    }

    #[test]
    fn test_always_connected_without_status_stream() {
        let transport = LocalTransport::new(echo_bridge());

        assert!(transport.is_connected());
        assert_eq!(transport.status(), ConnectionStatus::Connected);
        assert!(transport.on_status_change(Arc::new(|_| {})).is_none());
        assert_eq!(transport.kind(), TransportKind::Local);
    }

    #[test]
    fn test_events_flow_through_bridge() {
        let bridge = echo_bridge();
        let transport = LocalTransport::new(Arc::clone(&bridge) as Arc<dyn HostBridge>);
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = Arc::clone(&count);
        let subscription = transport.on_event(
            "sessions-changed",
            Arc::new(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(bridge.emit("sessions-changed", &json!({})), 1);
        subscription.unsubscribe();
        subscription.unsubscribe();
        assert_eq!(bridge.emit("sessions-changed", &json!({})), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
