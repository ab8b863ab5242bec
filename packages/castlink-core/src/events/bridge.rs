//! Fan-out of engine events to any number of async subscribers.
//!
//! The binding layer subscribes to a [`BroadcastEventBridge`] and may also
//! attach one forwarding emitter (a host callback, say) once it has one.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{CastEvent, ConnectionEvent, DeviceEvent, MessageEvent};

type Forward = Arc<RwLock<Option<Arc<dyn EventEmitter>>>>;

/// [`EventEmitter`] backed by a `tokio::sync::broadcast` channel.
///
/// Clones share the channel and the forwarding emitter. Slow subscribers
/// observe `RecvError::Lagged` rather than blocking the engine.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<CastEvent>,
    forward: Forward,
}

impl BroadcastEventBridge {
    /// `capacity` must be at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            forward: Arc::new(RwLock::new(None)),
        }
    }

    /// Attaches an emitter that receives every event before subscribers do.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.forward.write() = Some(emitter);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CastEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn publish(&self, event: CastEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("[EventBridge] Event dropped, nobody subscribed");
        }
    }
}

macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            let forward = self.forward.read().clone();
            if let Some(emitter) = forward {
                emitter.$method(event.clone());
            }
            self.publish(CastEvent::$variant(event));
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_device, DeviceEvent, Device);
    impl_emit!(emit_connection, ConnectionEvent, Connection);
    impl_emit!(emit_message, MessageEvent, Message);
}
