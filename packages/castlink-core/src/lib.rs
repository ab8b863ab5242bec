//! Castlink Core - discovery and session control for cast receivers.
//!
//! This crate discovers cast-capable receivers on the local network, keeps a
//! live device list, and drives one logical session at a time against a
//! chosen receiver: connect, launch or join a receiver application, exchange
//! text messages on namespaced channels, control volume, and ride out
//! transient connection loss.
//!
//! # Architecture
//!
//! - [`discovery`]: Device model and the mDNS scanner
//! - [`registry`]: Deduplicated device list with staleness pruning
//! - [`scan`]: Scan lifecycle (start, stop, prune loop)
//! - [`session`]: Session state machine, message channel, reconnection
//! - [`engine`]: [`CastEngine`], the command surface for binding layers
//! - [`events`]: Outbound notifications
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! - [`DeviceScanner`](discovery::DeviceScanner): Source of scan events
//! - [`ReceiverDriver`](session::ReceiverDriver): Whatever actually talks to receivers
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//! - [`ScanListener`] / [`ConnectionListener`]: Callback-style notifications
//!
//! [`MdnsScanner`] is the production scanner. Receiver drivers are supplied
//! by the host platform.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod events;
pub mod protocol_constants;
pub mod registry;
pub mod scan;
pub mod session;
pub mod utils;

#[cfg(test)]
mod test_fixtures;

// Re-export commonly used types at the crate root
pub use config::EngineConfig;
pub use engine::CastEngine;
pub use error::{CastError, CastResult, DiscoveryResult, DriverResult, ErrorCode};
pub use events::{
    BroadcastEventBridge, CastEvent, ConnectionEvent, DeviceEvent, EventEmitter,
    LoggingEventEmitter, MessageEvent, NoopEventEmitter,
};
pub use utils::now_millis;

// Re-export discovery types
pub use discovery::{
    CastIcon, Device, DeviceCapabilities, DeviceScanner, DeviceStatus, DiscoveryError,
    MdnsScanner, ScanEvent,
};
pub use registry::{DeviceRegistry, ScanListener};
pub use scan::ScanController;

// Re-export session types
pub use session::{
    ApplicationContext, ApplicationMetadata, ApplicationProvenance, ApplicationSession,
    ConnectionListener, ConnectionState, DriverError, LinkEvent, MessageListener,
    ReceiverDriver, ReceiverLink, SenderApplicationInfo, SessionStatus, StatusCache,
};
