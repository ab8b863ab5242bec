//! Sinks for engine notifications.
//!
//! The registry and the session state machine hold an `Arc<dyn EventEmitter>`
//! and never see how (or whether) events leave the process.

use super::{ConnectionEvent, DeviceEvent, MessageEvent};

/// Receives every notification the engine produces.
///
/// Called synchronously from engine tasks, so implementations must not block.
pub trait EventEmitter: Send + Sync {
    fn emit_device(&self, event: DeviceEvent);

    fn emit_connection(&self, event: ConnectionEvent);

    /// Inbound text message; listeners have been handed it already.
    fn emit_message(&self, event: MessageEvent);
}

/// Discards everything. For embedders that rely on listeners only.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_device(&self, _event: DeviceEvent) {}

    fn emit_connection(&self, _event: ConnectionEvent) {}

    fn emit_message(&self, _event: MessageEvent) {}
}

/// Writes events to `tracing`. Message bodies only appear at trace level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_device(&self, event: DeviceEvent) {
        tracing::debug!(?event, "device_event");
    }

    fn emit_connection(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Failed { .. } | ConnectionEvent::Degraded { .. } => {
                tracing::warn!(?event, "connection_event")
            }
            _ => tracing::debug!(?event, "connection_event"),
        }
    }

    fn emit_message(&self, event: MessageEvent) {
        let MessageEvent::Received {
            ref device_id,
            ref namespace,
            ref message,
            ..
        } = event;
        tracing::debug!(%device_id, %namespace, len = message.len(), "message_event");
        tracing::trace!(%message, "message_body");
    }
}
