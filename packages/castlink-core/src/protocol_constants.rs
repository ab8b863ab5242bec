//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the Google Cast discovery conventions or are
//! defaults shared between the engine and its binding layers.

// ─────────────────────────────────────────────────────────────────────────────
// Discovery (DNS-SD)
// ─────────────────────────────────────────────────────────────────────────────

/// Cast receiver mDNS service type (note: trailing dot is required by mdns-sd).
pub const GOOGLECAST_SERVICE_TYPE: &str = "_googlecast._tcp.local.";

/// Default Cast control port advertised by receivers.
pub const DEFAULT_CAST_PORT: u16 = 8009;

/// TXT record key carrying the receiver's unique id.
pub const TXT_DEVICE_ID: &str = "id";

/// TXT record key carrying the receiver's friendly name.
pub const TXT_FRIENDLY_NAME: &str = "fn";

/// TXT record key carrying the receiver's model name.
pub const TXT_MODEL_NAME: &str = "md";

/// TXT record key carrying the capability bitmask.
pub const TXT_CAPABILITIES: &str = "ca";

/// TXT record key carrying the receiver status (0 = idle, 1 = busy).
pub const TXT_STATUS: &str = "st";

/// TXT record key carrying the receiver icon path.
pub const TXT_ICON_PATH: &str = "ic";

// ─────────────────────────────────────────────────────────────────────────────
// Applications
// ─────────────────────────────────────────────────────────────────────────────

/// Application id of the default media receiver.
pub const DEFAULT_MEDIA_RECEIVER_APP_ID: &str = "CC1AD845";

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Default bound on automatic reconnection after a transient loss (seconds).
pub const DEFAULT_RECONNECT_TIMEOUT_SECS: u64 = 15;

/// Largest accepted reconnect timeout (one day).
pub const MAX_RECONNECT_TIMEOUT_SECS: u64 = 86_400;

/// Delays between reconnection attempts (exponential backoff).
///
/// The last delay repeats until the reconnect timeout expires.
pub const RECONNECT_BACKOFF_MS: [u64; 4] = [200, 500, 1000, 2000];

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Lower volume bound accepted by `setVolume`.
pub const VOLUME_MIN: f32 = 0.0;

/// Upper volume bound accepted by `setVolume`.
pub const VOLUME_MAX: f32 = 1.0;
