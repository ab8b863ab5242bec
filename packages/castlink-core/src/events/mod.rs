//! Outbound notifications for the binding layer.
//!
//! This module provides:
//! - [`EventEmitter`] trait for engine components to emit events
//! - [`BroadcastEventBridge`] for fan-out to any number of subscribers
//! - Event types for discovery, connection and message domains

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::discovery::Device;
use crate::error::CastError;
use crate::session::ConnectionState;

/// Events delivered to the binding layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum CastEvent {
    /// Device registry changes.
    Device(DeviceEvent),

    /// Session lifecycle changes.
    Connection(ConnectionEvent),

    /// Inbound messages from the receiver application.
    Message(MessageEvent),
}

/// Events from the device registry.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeviceEvent {
    /// A device appeared.
    Online {
        device: Device,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A device went away (withdrawn or pruned).
    Offline {
        #[serde(rename = "deviceId")]
        device_id: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The known device set changed.
    ListChanged {
        /// Full list in discovery order.
        devices: Vec<Device>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events from the session state machine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConnectionEvent {
    /// Connection state changed.
    StateChanged {
        #[serde(rename = "deviceId", skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        state: ConnectionState,
        reconnecting: bool,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A reconnection attempt started.
    Reconnecting {
        #[serde(rename = "deviceId")]
        device_id: String,
        attempt: u32,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Reconnected, but the application session could not be rejoined.
    Degraded {
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "appId")]
        app_id: String,
        reason: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// An application context was created by launch or join.
    ApplicationConnected {
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "appId")]
        app_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The application context was cleared.
    ApplicationDisconnected {
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "appId")]
        app_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Receiver volume or mute changed.
    VolumeChanged {
        #[serde(rename = "deviceId")]
        device_id: String,
        volume: f32,
        muted: bool,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// An operation failed in a way the binding layer should surface.
    Failed {
        #[serde(rename = "deviceId", skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        error: CastError,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events carrying inbound messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageEvent {
    Received {
        #[serde(rename = "deviceId")]
        device_id: String,
        namespace: String,
        message: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

impl From<DeviceEvent> for CastEvent {
    fn from(event: DeviceEvent) -> Self {
        CastEvent::Device(event)
    }
}

impl From<ConnectionEvent> for CastEvent {
    fn from(event: ConnectionEvent) -> Self {
        CastEvent::Connection(event)
    }
}

impl From<MessageEvent> for CastEvent {
    fn from(event: MessageEvent) -> Self {
        CastEvent::Message(event)
    }
}
