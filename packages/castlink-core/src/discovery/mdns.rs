//! mDNS/DNS-SD based cast receiver discovery.
//!
//! Browses for `_googlecast._tcp.local.` services and turns resolved and
//! removed records into [`ScanEvent`]s.
//!
//! # Key Design Points
//!
//! - Uses resolved record data (IP from SRV/A answers) as primary, not string parsing
//! - Reads receiver metadata from the TXT record (`id`, `fn`, `md`, `ca`, `st`, `ic`)
//! - Remembers instance name -> device id so removals can be reported by id
//! - Calls `stop_browse()` on stop to avoid accumulating daemon work

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mdns_sd::{ResolvedService, ScopedIp, ServiceDaemon, ServiceEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{
    CastIcon, Device, DeviceCapabilities, DeviceStatus, DiscoveryError, DiscoveryResult,
    ScanEvent,
};
use super::DeviceScanner;
use crate::protocol_constants::{
    DEFAULT_CAST_PORT, GOOGLECAST_SERVICE_TYPE, TXT_CAPABILITIES, TXT_DEVICE_ID,
    TXT_FRIENDLY_NAME, TXT_ICON_PATH, TXT_MODEL_NAME, TXT_STATUS,
};
use crate::utils::now_millis;

/// Capacity of the channel between the mDNS forwarder and the scan controller.
const SCAN_EVENT_CAPACITY: usize = 64;

/// Port receivers serve their icons on.
const ICON_HTTP_PORT: u16 = 8008;

/// Discovers cast receivers using mDNS/Bonjour.
pub struct MdnsScanner {
    service_type: String,
    daemon: Mutex<Option<Arc<ServiceDaemon>>>,
    run: Mutex<Option<CancellationToken>>,
}

impl MdnsScanner {
    /// Creates a scanner for the standard Cast service type.
    pub fn new() -> Self {
        Self::with_service_type(GOOGLECAST_SERVICE_TYPE)
    }

    /// Creates a scanner browsing a custom service type.
    ///
    /// The service type must end with `.local.` (trailing dot included).
    pub fn with_service_type(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            daemon: Mutex::new(None),
            run: Mutex::new(None),
        }
    }

    fn daemon(&self) -> DiscoveryResult<Arc<ServiceDaemon>> {
        let mut guard = self.daemon.lock();
        if let Some(daemon) = guard.as_ref() {
            return Ok(Arc::clone(daemon));
        }
        let daemon = Arc::new(create_daemon()?);
        *guard = Some(Arc::clone(&daemon));
        Ok(daemon)
    }
}

impl Default for MdnsScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceScanner for MdnsScanner {
    async fn start(&self) -> DiscoveryResult<mpsc::Receiver<ScanEvent>> {
        let daemon = self.daemon()?;
        let receiver = daemon
            .browse(&self.service_type)
            .map_err(|e| DiscoveryError::Unavailable(e.to_string()))?;

        log::debug!("[mDNS] Browsing for {}", self.service_type);

        let (tx, rx) = mpsc::channel(SCAN_EVENT_CAPACITY);
        let cancel = CancellationToken::new();
        if let Some(previous) = self.run.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        tokio::spawn(async move {
            // instance fullname -> device id, for removals
            let mut instances: HashMap<String, String> = HashMap::new();

            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = receiver.recv_async() => match event {
                        Ok(event) => event,
                        Err(e) => {
                            log::debug!("[mDNS] Receiver channel closed: {:?}", e);
                            break;
                        }
                    },
                };

                let scan_event = match event {
                    ServiceEvent::ServiceResolved(info) => {
                        log::trace!("[mDNS] Service resolved: {:?}", info.fullname);
                        let Some(device) = parse_cast_service(&info) else {
                            continue;
                        };
                        let known = instances
                            .insert(info.fullname.clone(), device.id.clone())
                            .is_some();
                        if known {
                            ScanEvent::Updated(device)
                        } else {
                            ScanEvent::Found(device)
                        }
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        let Some(device_id) = instances.remove(&fullname) else {
                            continue;
                        };
                        log::debug!("[mDNS] Receiver removed: {}", fullname);
                        ScanEvent::Lost { device_id }
                    }
                    ServiceEvent::SearchStopped(_) => break,
                    _ => continue,
                };

                if tx.send(scan_event).await.is_err() {
                    break;
                }
            }

            log::debug!("[mDNS] Forwarder stopped");
        });

        Ok(rx)
    }

    async fn stop(&self) {
        if let Some(cancel) = self.run.lock().take() {
            cancel.cancel();
        }
        let daemon = self.daemon.lock().clone();
        if let Some(daemon) = daemon {
            if let Err(e) = daemon.stop_browse(&self.service_type) {
                log::warn!("[mDNS] Failed to stop browse: {:?}", e);
            }
        }
    }
}

/// Parses a resolved mDNS service into a [`Device`].
///
/// Prefers an IPv4 address from the resolved records. The device id comes from
/// the `id` TXT key, falling back to the service instance name.
fn parse_cast_service(info: &ResolvedService) -> Option<Device> {
    let ip = info
        .addresses
        .iter()
        .find_map(|addr| match addr {
            ScopedIp::V4(v4) => Some(std::net::IpAddr::V4(*v4.addr())),
            ScopedIp::V6(_) | _ => None,
        })
        .or_else(|| info.addresses.iter().next().map(|a| a.to_ip_addr()))?;

    let txt = &info.txt_properties;
    let id = txt
        .get_property_val_str(TXT_DEVICE_ID)
        .map(str::to_string)
        .or_else(|| instance_name(&info.fullname))?;

    let friendly_name = txt
        .get_property_val_str(TXT_FRIENDLY_NAME)
        .map(str::to_string)
        .or_else(|| instance_name(&info.fullname))
        .unwrap_or_else(|| id.clone());

    let port = if info.port > 0 {
        info.port
    } else {
        DEFAULT_CAST_PORT
    };

    let mut device = Device::new(id, friendly_name, ip, port);
    device.model_name = txt.get_property_val_str(TXT_MODEL_NAME).map(str::to_string);
    device.capabilities = txt
        .get_property_val_str(TXT_CAPABILITIES)
        .and_then(|v| v.parse::<u32>().ok())
        .map(DeviceCapabilities::from_bits)
        .unwrap_or_default();
    device.status = txt
        .get_property_val_str(TXT_STATUS)
        .and_then(|v| v.parse::<i32>().ok())
        .map(DeviceStatus::from_code)
        .unwrap_or_default();
    if let Some(path) = txt.get_property_val_str(TXT_ICON_PATH) {
        device.icons.push(icon_for(ip, path));
    }
    device.last_seen = now_millis();

    Some(device)
}

/// Builds the icon entry for an advertised icon path. Dimensions are not advertised.
fn icon_for(ip: std::net::IpAddr, path: &str) -> CastIcon {
    let host = match ip {
        std::net::IpAddr::V4(v4) => v4.to_string(),
        std::net::IpAddr::V6(v6) => format!("[{}]", v6),
    };
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    CastIcon {
        url: format!("http://{}:{}{}", host, ICON_HTTP_PORT, path),
        width: 0,
        height: 0,
    }
}

/// Extracts the instance label from a full service name.
///
/// `Chromecast-0123abcd._googlecast._tcp.local.` -> `Chromecast-0123abcd`
fn instance_name(fullname: &str) -> Option<String> {
    let end = fullname.find("._")?;
    let name = &fullname[..end];
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Creates a new mDNS service daemon.
///
/// The daemon spawns a background thread for mDNS operations and is reused
/// across scans.
pub fn create_daemon() -> Result<ServiceDaemon, DiscoveryError> {
    ServiceDaemon::new().map_err(|e| DiscoveryError::MdnsDaemon(e.to_string()))
}
