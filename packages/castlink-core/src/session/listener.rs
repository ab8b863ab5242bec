//! Listener traits registered by the binding layer.

use crate::error::CastError;

use super::types::{ApplicationMetadata, ConnectionState};

/// Session lifecycle callbacks.
///
/// Every method defaults to a no-op, so implementations override only what
/// they care about. Callbacks run on the session's own task and should return
/// quickly.
pub trait ConnectionListener: Send + Sync {
    /// The session connected to its receiver.
    fn connected(&self) {}

    /// An application was launched or joined.
    fn connected_to_application(&self, _metadata: &ApplicationMetadata, _session_id: &str) {}

    fn failed_to_connect(&self, _error: &CastError) {}

    fn failed_to_connect_to_application(&self, _error: &CastError) {}

    /// The session ended. `error` is set when it ended on a failure.
    fn disconnected(&self, _error: Option<&CastError>) {}

    fn disconnected_from_application(&self, _error: Option<&CastError>) {}

    fn failed_to_stop_application(&self, _error: &CastError) {}

    fn volume_changed(&self, _level: f32, _muted: bool) {}

    /// Automatic reconnection started (`attempt` counts from 1).
    fn reconnecting(&self, _attempt: u32) {}

    fn state_changed(&self, _state: ConnectionState) {}

    /// A text message arrived on any namespace of the session.
    fn message_received(&self, _namespace: &str, _text: &str) {}
}

/// Callback for inbound messages on one namespace.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, namespace: &str, text: &str);
}

impl<F> MessageListener for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn on_message(&self, namespace: &str, text: &str) {
        self(namespace, text)
    }
}
