//! Trait abstractions for the receiver SDK.
//!
//! These traits are the seam between the session engine and whatever actually
//! talks to receivers (a platform Cast SDK, a protocol implementation, or a
//! test double). The engine only ever sees these traits.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::types::ApplicationSession;
use crate::discovery::Device;

/// Errors reported by a receiver driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The receiver could not be reached on the network.
    #[error("receiver unreachable: {0}")]
    Unreachable(String),

    /// The receiver answered but refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("request timed out")]
    Timeout,

    /// The connection is closed.
    #[error("connection closed")]
    Closed,

    /// Lower-level transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl DriverError {
    /// Returns `true` if retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Timeout | Self::Closed | Self::Transport(_)
        )
    }
}

/// Convenient Result alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Unsolicited notifications from an open receiver connection.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A text message arrived on a namespace.
    MessageReceived { namespace: String, text: String },
    /// The connection dropped but may come back (network blip, device sleep).
    ConnectionSuspended { reason: String },
    /// The receiver closed the connection for good.
    ConnectionClosed { reason: Option<String> },
    /// The receiver application ended on its own.
    ApplicationStopped { reason: Option<String> },
    /// Receiver volume or mute changed.
    StatusChanged { volume: f32, muted: bool },
}

/// Opens connections to receivers.
#[async_trait]
pub trait ReceiverDriver: Send + Sync {
    /// Connects to a receiver.
    ///
    /// Unsolicited events for the lifetime of the returned link are pushed
    /// into `events`, in the order the receiver produced them.
    async fn connect(
        &self,
        device: &Device,
        events: mpsc::Sender<LinkEvent>,
    ) -> DriverResult<Arc<dyn ReceiverLink>>;
}

/// An open connection to one receiver.
#[async_trait]
pub trait ReceiverLink: Send + Sync {
    /// Launches an application, or joins it if running and `relaunch` is false.
    async fn launch_application(
        &self,
        app_id: &str,
        relaunch: bool,
    ) -> DriverResult<ApplicationSession>;

    /// Joins a running application, optionally a specific session of it.
    async fn join_application(
        &self,
        app_id: &str,
        session_id: Option<&str>,
    ) -> DriverResult<ApplicationSession>;

    /// Detaches from the application without stopping it.
    async fn leave_application(&self) -> DriverResult<()>;

    /// Stops the application session on the receiver.
    async fn stop_application(&self, session_id: &str) -> DriverResult<()>;

    async fn set_volume(&self, level: f32) -> DriverResult<()>;

    async fn set_muted(&self, muted: bool) -> DriverResult<()>;

    /// Sends a text message on a namespace.
    async fn send_text(&self, namespace: &str, text: &str) -> DriverResult<()>;

    /// Asks the receiver to report its status; the answer arrives as a
    /// [`LinkEvent::StatusChanged`].
    async fn request_status(&self) -> DriverResult<()>;

    /// Closes the connection. Idempotent.
    async fn close(&self);
}
