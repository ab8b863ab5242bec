//! Status cache: last-known session status for non-blocking reads.
//!
//! Written only by the session state machine; read from anywhere through
//! [`StatusCache::snapshot`] or a [`watch`] subscription.

use tokio::sync::watch;

use super::types::{ConnectionState, SessionStatus};

/// Read-through cache of the session status.
#[derive(Clone)]
pub struct StatusCache {
    tx: watch::Sender<SessionStatus>,
}

impl StatusCache {
    pub fn new(reconnect_timeout_secs: u64) -> Self {
        let (tx, _) = watch::channel(SessionStatus::new(reconnect_timeout_secs));
        Self { tx }
    }

    /// Returns a copy of the current status.
    pub fn snapshot(&self) -> SessionStatus {
        self.tx.borrow().clone()
    }

    /// Subscribes to status changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.tx.subscribe()
    }

    /// Reads a value out of the current status without cloning all of it.
    pub fn read<R>(&self, f: impl FnOnce(&SessionStatus) -> R) -> R {
        f(&self.tx.borrow())
    }

    pub fn state(&self) -> ConnectionState {
        self.read(|s| s.state)
    }

    pub fn is_connected(&self) -> bool {
        self.read(SessionStatus::is_connected)
    }

    pub fn is_connected_to_app(&self) -> bool {
        self.read(SessionStatus::is_connected_to_app)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.read(|s| s.reconnecting)
    }

    /// Renders the status as JSON for binding layers.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }

    /// Applies a mutation; subscribers are notified only if something changed.
    pub(crate) fn update(&self, f: impl FnOnce(&mut SessionStatus)) {
        self.tx.send_if_modified(|status| {
            let before = status.clone();
            f(status);
            *status != before
        });
    }
}
