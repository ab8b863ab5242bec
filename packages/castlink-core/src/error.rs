//! Centralized error types for the castlink engine.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps every error to a stable machine-readable code
//! - Serializes errors so binding layers can forward them unchanged

use serde::Serialize;
use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::session::DriverError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for binding layers.
    fn code(&self) -> &'static str;
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "discovery_unavailable",
            Self::MdnsDaemon(_) => "mdns_daemon_failed",
        }
    }
}

impl ErrorCode for DriverError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "receiver_unreachable",
            Self::Rejected(_) => "receiver_rejected",
            Self::Timeout => "receiver_timeout",
            Self::Closed => "connection_closed",
            Self::Transport(_) => "transport_error",
        }
    }
}

/// Engine-wide error type returned by every public operation.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum CastError {
    /// Discovery could not start (e.g. no local network). The caller may retry.
    #[error("Discovery unavailable: {0}")]
    DiscoveryUnavailable(String),

    /// No known receiver has the given id.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A connection attempt (or reconnection) is already in flight.
    #[error("A connection attempt is already in progress")]
    AlreadyConnecting,

    /// The session is already connected to a receiver.
    #[error("Already connected to a receiver")]
    AlreadyConnected,

    /// Establishing the connection failed.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Automatic reconnection did not succeed before the reconnect timeout.
    #[error("Reconnection timed out")]
    ReconnectTimeout,

    #[error("Application launch failed: {0}")]
    ApplicationLaunchFailed(String),

    #[error("Application join failed: {0}")]
    ApplicationJoinFailed(String),

    /// The operation requires a connected session.
    #[error("Not connected")]
    NotConnected,

    /// Argument out of range (volume, timeout).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Sending a message failed at the transport. The session stays connected.
    #[error("Transmit failed: {0}")]
    TransmitFailed(String),

    /// Leave/stop was requested without an active application.
    #[error("No active application")]
    NoActiveApplication,

    /// Stop was requested for an application session that is not the active one.
    #[error("Application session not found: {0}")]
    ApplicationNotFound(String),

    /// Another application operation is still pending.
    #[error("Operation in progress: {0}")]
    OperationInProgress(String),

    /// No message channel is registered for the namespace.
    #[error("Channel not established for namespace: {0}")]
    ChannelNotEstablished(String),

    /// The receiver refused to leave or stop the application.
    #[error("Failed to stop application: {0}")]
    ApplicationStopFailed(String),

    /// The receiver refused a control command (volume, mute, status).
    #[error("Receiver command failed: {0}")]
    CommandFailed(String),

    /// The engine has been destroyed.
    #[error("Engine is shut down")]
    EngineShutDown,
}

impl ErrorCode for CastError {
    fn code(&self) -> &'static str {
        match self {
            Self::DiscoveryUnavailable(_) => "discovery_unavailable",
            Self::DeviceNotFound(_) => "device_not_found",
            Self::AlreadyConnecting => "already_connecting",
            Self::AlreadyConnected => "already_connected",
            Self::ConnectFailed(_) => "connect_failed",
            Self::ReconnectTimeout => "reconnect_timeout",
            Self::ApplicationLaunchFailed(_) => "application_launch_failed",
            Self::ApplicationJoinFailed(_) => "application_join_failed",
            Self::NotConnected => "not_connected",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::TransmitFailed(_) => "transmit_failed",
            Self::NoActiveApplication => "no_active_application",
            Self::ApplicationNotFound(_) => "application_not_found",
            Self::OperationInProgress(_) => "operation_in_progress",
            Self::ChannelNotEstablished(_) => "channel_not_established",
            Self::ApplicationStopFailed(_) => "application_stop_failed",
            Self::CommandFailed(_) => "command_failed",
            Self::EngineShutDown => "engine_shut_down",
        }
    }
}

impl From<DiscoveryError> for CastError {
    fn from(err: DiscoveryError) -> Self {
        Self::DiscoveryUnavailable(err.to_string())
    }
}

/// Generic mapping for driver failures outside connect/launch/join,
/// which pick their own variant.
impl From<DriverError> for CastError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Closed => Self::NotConnected,
            other => Self::CommandFailed(other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

/// Convenient Result alias for engine operations.
pub type CastResult<T> = Result<T, CastError>;

pub use crate::discovery::DiscoveryResult;
pub use crate::session::DriverResult;
