//! Session-level types shared by the state machine, the status cache and
//! the binding layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::discovery::CastIcon;
use crate::error::CastError;

/// Connection state of the session.
///
/// `Idle` is initial; `Disconnected` is terminal for one session instance
/// (a later `connect` starts a new instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    /// Connection lost transiently; automatic reconnection is pending.
    Suspended,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Suspended => "suspended",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// How the current application context came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationProvenance {
    Launched,
    Joined,
}

/// Sender-side application registered for a receiver application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderApplicationInfo {
    /// Platform name (e.g. "ios", "android", "chrome").
    pub platform: String,
    /// Store or bundle identifier of the sender app.
    pub app_identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_url: Option<String>,
}

/// Metadata describing a running receiver application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationMetadata {
    pub application_id: String,
    pub application_name: String,
    /// Message namespaces the application understands.
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub icons: Vec<CastIcon>,
    #[serde(default)]
    pub sender_applications: Vec<SenderApplicationInfo>,
}

impl ApplicationMetadata {
    /// Returns `true` if the application advertises the namespace.
    pub fn supports_namespace(&self, namespace: &str) -> bool {
        self.namespaces.iter().any(|ns| ns == namespace)
    }
}

/// Result of a successful launch or join, as reported by the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationSession {
    /// Session id assigned by the receiver.
    pub session_id: String,
    pub metadata: ApplicationMetadata,
}

/// A receiver-side application instance attached to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationContext {
    pub app_id: String,
    pub session_id: String,
    pub provenance: ApplicationProvenance,
    pub metadata: ApplicationMetadata,
}

impl ApplicationContext {
    pub(crate) fn new(
        app_id: impl Into<String>,
        session: ApplicationSession,
        provenance: ApplicationProvenance,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            session_id: session.session_id,
            provenance,
            metadata: session.metadata,
        }
    }
}

/// Last-known session status, readable without blocking.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: ConnectionState,
    /// `true` while the reconnection supervisor is active.
    pub reconnecting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// Receiver volume in `[0, 1]`.
    pub volume: f32,
    pub muted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationContext>,
    pub reconnect_timeout_secs: u64,
    /// Error that ended the last session instance, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<CastError>,
}

impl SessionStatus {
    pub(crate) fn new(reconnect_timeout_secs: u64) -> Self {
        Self {
            state: ConnectionState::Idle,
            reconnecting: false,
            device_id: None,
            device_name: None,
            volume: 0.0,
            muted: false,
            application: None,
            reconnect_timeout_secs,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_connected_to_app(&self) -> bool {
        self.is_connected() && self.application.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_camel_case() {
        let mut status = SessionStatus::new(15);
        status.state = ConnectionState::Connected;
        status.volume = 0.5;
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "connected");
        assert_eq!(json["volume"], 0.5);
        assert_eq!(json["reconnectTimeoutSecs"], 15);
        assert!(json.get("application").is_none());
    }

    #[test]
    fn connected_to_app_requires_connection() {
        let mut status = SessionStatus::new(15);
        status.application = Some(ApplicationContext::new(
            "CC1AD845",
            ApplicationSession {
                session_id: "s1".into(),
                metadata: ApplicationMetadata::default(),
            },
            ApplicationProvenance::Launched,
        ));
        assert!(!status.is_connected_to_app());
        status.state = ConnectionState::Connected;
        assert!(status.is_connected_to_app());
    }

    #[test]
    fn metadata_namespace_lookup() {
        let metadata = ApplicationMetadata {
            namespaces: vec!["urn:x-cast:com.example.chat".into()],
            ..ApplicationMetadata::default()
        };
        assert!(metadata.supports_namespace("urn:x-cast:com.example.chat"));
        assert!(!metadata.supports_namespace("urn:x-cast:other"));
    }
}
