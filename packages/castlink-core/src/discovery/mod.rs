//! Cast receiver discovery.
//!
//! Discovery is split into a [`DeviceScanner`] seam that produces raw
//! [`ScanEvent`]s and the registry/controller pair that turns them into a
//! deduplicated device list.

pub mod mdns;
pub mod types;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use mdns::MdnsScanner;
pub use types::{
    CastIcon, Device, DeviceCapabilities, DeviceStatus, DiscoveryError, DiscoveryResult,
    ScanEvent,
};

/// Source of scan events for the local network.
///
/// Implementations own whatever background machinery they need (an mDNS
/// daemon, a mock channel) and forward what they observe through the
/// returned receiver. The stream ends when the scanner is stopped.
#[async_trait]
pub trait DeviceScanner: Send + Sync {
    /// Begins scanning and returns the event stream.
    async fn start(&self) -> DiscoveryResult<mpsc::Receiver<ScanEvent>>;

    /// Stops scanning. Safe to call when not scanning.
    async fn stop(&self);
}
