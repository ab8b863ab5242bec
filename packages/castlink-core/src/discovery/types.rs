//! Shared types for cast receiver discovery.
//!
//! This module contains the device model reported by scanners and consumed by
//! the [`DeviceRegistry`](crate::registry::DeviceRegistry), plus the scan event
//! stream that connects the two.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Receiver availability as advertised in discovery records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Status was not advertised.
    #[default]
    Unknown,
    /// No application is running on the receiver.
    Idle,
    /// An application is running on the receiver.
    Busy,
}

impl DeviceStatus {
    /// Maps the numeric status code used by discovery records (`-1`, `0`, `1`).
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Idle,
            1 => Self::Busy,
            _ => Self::Unknown,
        }
    }
}

/// Icon advertised by a receiver or an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastIcon {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// Capability flags decoded from the receiver's `ca` bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    pub video_out: bool,
    pub video_in: bool,
    pub audio_out: bool,
    pub audio_in: bool,
    pub multizone_group: bool,
}

impl DeviceCapabilities {
    const VIDEO_OUT: u32 = 1 << 0;
    const VIDEO_IN: u32 = 1 << 1;
    const AUDIO_OUT: u32 = 1 << 2;
    const AUDIO_IN: u32 = 1 << 3;
    const MULTIZONE_GROUP: u32 = 1 << 5;

    /// Decodes the capability bitmask.
    pub fn from_bits(bits: u32) -> Self {
        Self {
            video_out: bits & Self::VIDEO_OUT != 0,
            video_in: bits & Self::VIDEO_IN != 0,
            audio_out: bits & Self::AUDIO_OUT != 0,
            audio_in: bits & Self::AUDIO_IN != 0,
            multizone_group: bits & Self::MULTIZONE_GROUP != 0,
        }
    }
}

/// A cast-capable receiver as seen by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Unique receiver identifier.
    #[serde(rename = "deviceId")]
    pub id: String,
    /// Human-readable name (e.g. "Living Room TV").
    pub friendly_name: String,
    /// Address of the receiver's control endpoint.
    pub ip_address: IpAddr,
    /// Port of the receiver's control endpoint.
    pub service_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default)]
    pub icons: Vec<CastIcon>,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default)]
    pub capabilities: DeviceCapabilities,
    /// Unix timestamp (ms) of the last scan event that reported this device.
    #[serde(default)]
    pub last_seen: u64,
}

impl Device {
    /// Creates a device with the required fields; optional metadata is empty.
    pub fn new(
        id: impl Into<String>,
        friendly_name: impl Into<String>,
        ip_address: IpAddr,
        service_port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            friendly_name: friendly_name.into(),
            ip_address,
            service_port,
            manufacturer: None,
            model_name: None,
            icons: Vec::new(),
            status: DeviceStatus::Unknown,
            capabilities: DeviceCapabilities::default(),
            last_seen: 0,
        }
    }

    /// Returns `true` if the metadata a listener would display differs.
    ///
    /// `last_seen` is ignored so periodic refreshes do not count as changes.
    pub fn metadata_differs(&self, other: &Device) -> bool {
        self.friendly_name != other.friendly_name
            || self.ip_address != other.ip_address
            || self.service_port != other.service_port
            || self.manufacturer != other.manufacturer
            || self.model_name != other.model_name
            || self.icons != other.icons
            || self.status != other.status
            || self.capabilities != other.capabilities
    }
}

/// Event pushed by a scanner into the scan controller.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A receiver appeared.
    Found(Device),
    /// A known receiver re-announced itself, possibly with new metadata.
    Updated(Device),
    /// A receiver withdrew its announcement.
    Lost {
        /// Id of the receiver that went away.
        device_id: String,
    },
}

/// Errors that can occur during discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Discovery cannot run right now (e.g. no local network).
    #[error("discovery unavailable: {0}")]
    Unavailable(String),

    /// mDNS daemon error.
    #[error("mDNS daemon error: {0}")]
    MdnsDaemon(String),
}

/// Convenient Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
