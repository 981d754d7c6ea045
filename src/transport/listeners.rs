//! Listener registries and subscription handles.
//!
//! Two registries back the publish/subscribe half of every transport:
//!
//! - [`EventRegistry`] - event name → listeners, fed by server pushes
//! - [`StatusNotifier`] - connection status with replay-on-subscribe
//!
//! Both hand out a [`Subscription`] whose [`Subscription::unsubscribe`] is
//! idempotent. Removal is by listener identity: registering the same closure
//! twice yields two listeners, and removing one leaves the other in place.
//!
//! Callbacks are invoked outside the registry lock, so a listener may
//! unsubscribe itself (or register others) from inside its callback.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::watch;
use tracing::trace;

use crate::identifiers::ListenerId;

use super::ConnectionStatus;

// ============================================================================
// Types
// ============================================================================

/// Callback invoked with each payload pushed under a subscribed event name.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Callback invoked with each connection status transition.
pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Listener table keyed by event name.
type EventTable = FxHashMap<String, Vec<(ListenerId, EventCallback)>>;

/// Status listener list.
type StatusTable = Vec<(ListenerId, StatusCallback)>;

// ============================================================================
// Subscription
// ============================================================================

/// Handle returned by every subscribe operation.
///
/// Dropping the handle does **not** unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe) explicitly. Calling it more than once
/// is a no-op.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Creates a subscription that runs `cancel` on first unsubscribe.
    #[must_use]
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Creates a subscription with nothing to cancel.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }

    /// Removes the listener. Idempotent.
    pub fn unsubscribe(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// Returns `true` until [`unsubscribe`](Self::unsubscribe) has run.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================================================
// EventRegistry
// ============================================================================

/// Event name → listener set.
///
/// Never cleared on disconnect, so subscriptions survive reconnects.
#[derive(Default)]
pub struct EventRegistry {
    table: Arc<Mutex<EventTable>>,
}

impl EventRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener under `event`. Additive: existing listeners stay.
    pub fn subscribe(&self, event: &str, callback: EventCallback) -> Subscription {
        let id = ListenerId::generate();
        self.table
            .lock()
            .entry(event.to_string())
            .or_default()
            .push((id, callback));

        trace!(event, %id, "Event listener registered");

        let table: Weak<Mutex<EventTable>> = Arc::downgrade(&self.table);
        let event = event.to_string();
        Subscription::new(move || {
            let Some(table) = table.upgrade() else {
                return;
            };
            let mut table = table.lock();
            if let Some(listeners) = table.get_mut(&event) {
                listeners.retain(|(listener_id, _)| *listener_id != id);
                if listeners.is_empty() {
                    table.remove(&event);
                }
            }
            trace!(event = %event, %id, "Event listener removed");
        })
    }

    /// Delivers `payload` to every listener of `event`.
    ///
    /// Returns the number of listeners invoked.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        let callbacks: Vec<EventCallback> = match self.table.lock().get(event) {
            Some(listeners) => listeners.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return 0,
        };

        for callback in &callbacks {
            callback(payload);
        }

        callbacks.len()
    }

    /// Returns the number of listeners registered under `event`.
    #[inline]
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.table.lock().get(event).map_or(0, Vec::len)
    }
}

// ============================================================================
// StatusNotifier
// ============================================================================

/// Observable connection status.
///
/// Listeners registered with [`subscribe`](Self::subscribe) receive the
/// current status immediately, then every transition. A `watch` channel
/// mirrors the same value for async consumers.
pub struct StatusNotifier {
    tx: watch::Sender<ConnectionStatus>,
    listeners: Arc<Mutex<StatusTable>>,
}

impl StatusNotifier {
    /// Creates a notifier holding `initial`.
    #[must_use]
    pub fn new(initial: ConnectionStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns the current status.
    #[inline]
    #[must_use]
    pub fn get(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    /// Applies a transition and notifies listeners if the status changed.
    ///
    /// Returns `true` if the status changed.
    pub fn set(&self, status: ConnectionStatus) -> bool {
        self.update(|_| status).is_some()
    }

    /// Computes the next status while holding the channel lock, then
    /// notifies listeners after releasing it.
    ///
    /// Returns the new status if it changed. `next` must not touch this
    /// notifier.
    pub fn update(
        &self,
        next: impl FnOnce(ConnectionStatus) -> ConnectionStatus,
    ) -> Option<ConnectionStatus> {
        let mut applied = None;
        self.tx.send_if_modified(|current| {
            let status = next(*current);
            if *current == status {
                return false;
            }
            *current = status;
            applied = Some(status);
            true
        });

        if let Some(status) = applied {
            let callbacks: Vec<StatusCallback> = self
                .listeners
                .lock()
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect();
            for callback in callbacks {
                callback(status);
            }
        }

        applied
    }

    /// Registers a listener and replays the current status to it.
    pub fn subscribe(&self, listener: StatusCallback) -> Subscription {
        let id = ListenerId::generate();
        let current = {
            let mut listeners = self.listeners.lock();
            listeners.push((id, Arc::clone(&listener)));
            self.get()
        };

        listener(current);

        let listeners: Weak<Mutex<StatusTable>> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }

    /// Returns a receiver that observes every status change.
    #[inline]
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
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

    fn counter() -> (Arc<AtomicUsize>, EventCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let callback: EventCallback = Arc::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn test_emit_reaches_every_listener_once() {
        let registry = EventRegistry::new();
        let (first, first_cb) = counter();
        let (second, second_cb) = counter();

        let _a = registry.subscribe("sessions-changed", first_cb);
        let _b = registry.subscribe("sessions-changed", second_cb);

        assert_eq!(registry.emit("sessions-changed", &json!({"n": 1})), 2);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_unknown_event() {
        let registry = EventRegistry::new();
        assert_eq!(registry.emit("nobody-listens", &Value::Null), 0);
    }

    #[test]
    fn test_unsubscribe_is_identity_based() {
        let registry = EventRegistry::new();
        let (count, callback) = counter();

        // Same callback registered twice: two independent listeners.
        let first = registry.subscribe("tick", Arc::clone(&callback));
        let _second = registry.subscribe("tick", callback);

        first.unsubscribe();
        assert_eq!(registry.listener_count("tick"), 1);

        registry.emit("tick", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_twice_is_noop() {
        let registry = EventRegistry::new();
        let (_count, callback) = counter();
        let (_other, other_cb) = counter();

        let subscription = registry.subscribe("tick", callback);
        let _other = registry.subscribe("tick", other_cb);

        subscription.unsubscribe();
        assert!(!subscription.is_active());
        subscription.unsubscribe();

        assert_eq!(registry.listener_count("tick"), 1);
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let registry = EventRegistry::new();
        let (_count, callback) = counter();
        let subscription = registry.subscribe("tick", callback);

        drop(registry);
        subscription.unsubscribe();
    }

    #[test]
    fn test_listener_can_unsubscribe_itself() {
        let registry = Arc::new(EventRegistry::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot_clone = Arc::clone(&slot);
        let subscription = registry.subscribe(
            "once",
            Arc::new(move |_| {
                if let Some(sub) = slot_clone.lock().as_ref() {
                    sub.unsubscribe();
                }
            }),
        );
        *slot.lock() = Some(subscription);

        registry.emit("once", &Value::Null);
        assert_eq!(registry.listener_count("once"), 0);
    }

    #[test]
    fn test_status_replay_on_subscribe() {
        let notifier = StatusNotifier::new(ConnectionStatus::Connecting);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        let subscription = notifier.subscribe(Arc::new(move |status| {
            seen_clone.lock().push(status);
        }));

        notifier.set(ConnectionStatus::Connected);
        notifier.set(ConnectionStatus::Connected);
        notifier.set(ConnectionStatus::Disconnected);

        subscription.unsubscribe();
        notifier.set(ConnectionStatus::Connecting);

        assert_eq!(
            *seen.lock(),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
                ConnectionStatus::Disconnected,
            ]
        );
    }

    #[test]
    fn test_status_watch_mirrors_value() {
        let notifier = StatusNotifier::new(ConnectionStatus::Disconnected);
        let rx = notifier.watch();

        assert!(notifier.set(ConnectionStatus::Connected));
        assert!(!notifier.set(ConnectionStatus::Connected));
        assert_eq!(*rx.borrow(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_status_listener_can_reenter_notifier() {
        let notifier = Arc::new(StatusNotifier::new(ConnectionStatus::Connecting));
        let weak = Arc::downgrade(&notifier);

        let _subscription = notifier.subscribe(Arc::new(move |status| {
            if status == ConnectionStatus::Connected
                && let Some(notifier) = weak.upgrade()
            {
                assert_eq!(notifier.get(), ConnectionStatus::Connected);
                notifier.set(ConnectionStatus::Disconnected);
            }
        }));

        assert_eq!(
            notifier.update(|current| {
                assert_eq!(current, ConnectionStatus::Connecting);
                ConnectionStatus::Connected
            }),
            Some(ConnectionStatus::Connected)
        );
        assert_eq!(notifier.get(), ConnectionStatus::Disconnected);
        assert_eq!(notifier.update(|current| current), None);
    }
}
