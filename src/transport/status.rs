//! Connection status monitor.
//!
//! Wraps a transport's status stream in a `watch` channel so UI code can
//! read the latest value or await the next change without polling. A
//! transport without a status stream is reported as permanently
//! `connected`.

use std::sync::Arc;

use tokio::sync::watch;

use super::listeners::Subscription;
use super::{ConnectionStatus, Transport};

// ============================================================================
// StatusMonitor
// ============================================================================

/// Observable view of a transport's connection status.
///
/// Dropping the monitor unsubscribes it from the transport.
///
/// # Example
///
/// ```ignore
/// let mut monitor = StatusMonitor::new(transport.as_ref());
/// while let Some(status) = monitor.changed().await {
///     render_indicator(status);
/// }
/// ```
pub struct StatusMonitor {
    rx: watch::Receiver<ConnectionStatus>,
    subscription: Option<Subscription>,
}

impl StatusMonitor {
    /// Subscribes to `transport`'s status changes.
    ///
    /// Without a status stream the sender is dropped at once, so the
    /// monitor keeps the initial snapshot and [`changed`](Self::changed)
    /// returns `None`.
    #[must_use]
    pub fn new(transport: &dyn Transport) -> Self {
        let (tx, rx) = watch::channel(transport.status());

        let subscription = transport.on_status_change(Arc::new(move |status| {
            tx.send_if_modified(|current| {
                let modified = *current != status;
                *current = status;
                modified
            });
        }));

        Self { rx, subscription }
    }

    /// Returns the latest status.
    #[inline]
    #[must_use]
    pub fn current(&self) -> ConnectionStatus {
        *self.rx.borrow()
    }

    /// Returns `true` if the latest status is `connected`.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.current().is_connected()
    }

    /// Waits for the next change and returns the new status.
    ///
    /// Returns `None` once the transport can no longer report changes.
    pub async fn changed(&mut self) -> Option<ConnectionStatus> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Returns a clone of the underlying receiver.
    #[inline]
    #[must_use]
    pub fn receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.rx.clone()
    }
}

impl Drop for StatusMonitor {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::time::timeout;

    use crate::error::Result;
    use crate::transport::listeners::{EventCallback, StatusCallback, StatusNotifier};
    use crate::transport::{InProcessBridge, LocalTransport, TransportKind};

    /// Transport whose status is driven by the test.
    struct ScriptedTransport {
        status: StatusNotifier,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Socket
        }

        async fn invoke(&self, _: &str, _: Option<Value>, _: bool) -> Result<Value> {
            Ok(Value::Null)
        }

        fn on_event(&self, _: &str, _: EventCallback) -> Subscription {
            Subscription::noop()
        }

        fn is_connected(&self) -> bool {
            self.status.get().is_connected()
        }

        fn on_status_change(&self, listener: StatusCallback) -> Option<Subscription> {
            Some(self.status.subscribe(listener))
        }

        fn status(&self) -> ConnectionStatus {
            self.status.get()
        }
    }

    #[tokio::test]
    async fn test_tracks_transitions() {
        let transport = ScriptedTransport {
            status: StatusNotifier::new(ConnectionStatus::Connecting),
        };
        let mut monitor = StatusMonitor::new(&transport);
        assert_eq!(monitor.current(), ConnectionStatus::Connecting);

        transport.status.set(ConnectionStatus::Connected);
        let next = timeout(Duration::from_secs(1), monitor.changed())
            .await
            .expect("change in time");
        assert_eq!(next, Some(ConnectionStatus::Connected));
        assert!(monitor.is_connected());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let transport = ScriptedTransport {
            status: StatusNotifier::new(ConnectionStatus::Disconnected),
        };
        let monitor = StatusMonitor::new(&transport);
        let rx = monitor.receiver();
        drop(monitor);

        transport.status.set(ConnectionStatus::Connected);
        assert_eq!(*rx.borrow(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_local_transport_is_always_connected() {
        let transport = LocalTransport::new(Arc::new(InProcessBridge::new()));
        let mut monitor = StatusMonitor::new(&transport);

        assert!(monitor.is_connected());
        assert_eq!(monitor.changed().await, None);
    }
}
