//! Device registry: the live set of discovered receivers.
//!
//! # Concurrency design
//!
//! - Entries live in a `RwLock<Vec<_>>` so the list keeps discovery order and
//!   readers never block each other. The scan loop is the only writer.
//! - Notifications are sent after the lock is released, so listeners may call
//!   back into the registry.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::discovery::{Device, ScanEvent};
use crate::error::{CastError, CastResult};
use crate::events::{DeviceEvent, EventEmitter};
use crate::utils::now_millis;

/// Listener for device availability, registered by the binding layer.
///
/// All methods default to no-ops.
pub trait ScanListener: Send + Sync {
    fn device_online(&self, _device: &Device) {}

    fn device_offline(&self, _device_id: &str) {}

    /// Called once per batch of changes with the full list in discovery order.
    fn devices_changed(&self, _devices: &[Device]) {}
}

struct Entry {
    device: Device,
    refreshed_at: Instant,
}

/// Notifications collected under the lock and delivered after it.
#[derive(Default)]
struct Changes {
    online: Vec<Device>,
    offline: Vec<String>,
    changed: bool,
}

/// Deduplicated, ordered set of known receivers.
pub struct DeviceRegistry {
    entries: RwLock<Vec<Entry>>,
    listener: RwLock<Option<Arc<dyn ScanListener>>>,
    emitter: Arc<dyn EventEmitter>,
}

impl DeviceRegistry {
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            listener: RwLock::new(None),
            emitter,
        }
    }

    /// Registers (or replaces) the scan listener.
    pub fn set_listener(&self, listener: Option<Arc<dyn ScanListener>>) {
        *self.listener.write() = listener;
    }

    /// Returns all known devices in discovery order.
    pub fn list(&self) -> Vec<Device> {
        self.entries.read().iter().map(|e| e.device.clone()).collect()
    }

    /// Looks up a device by id.
    pub fn get(&self, id: &str) -> CastResult<Device> {
        self.entries
            .read()
            .iter()
            .find(|e| e.device.id == id)
            .map(|e| e.device.clone())
            .ok_or_else(|| CastError::DeviceNotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Applies one scan event. Returns `true` if the visible list changed.
    pub fn apply(&self, event: ScanEvent) -> bool {
        let mut changes = Changes::default();
        {
            let mut entries = self.entries.write();
            match event {
                ScanEvent::Found(device) | ScanEvent::Updated(device) => {
                    let now = Instant::now();
                    match entries.iter_mut().find(|e| e.device.id == device.id) {
                        Some(entry) => {
                            entry.refreshed_at = now;
                            if entry.device.metadata_differs(&device) {
                                log::debug!(
                                    "[DeviceRegistry] Updated {} ({})",
                                    device.id,
                                    device.friendly_name
                                );
                                changes.changed = true;
                            }
                            entry.device = device;
                        }
                        None => {
                            log::info!(
                                "[DeviceRegistry] Found {} ({}) at {}:{}",
                                device.id,
                                device.friendly_name,
                                device.ip_address,
                                device.service_port
                            );
                            changes.online.push(device.clone());
                            changes.changed = true;
                            entries.push(Entry {
                                device,
                                refreshed_at: now,
                            });
                        }
                    }
                }
                ScanEvent::Lost { device_id } => {
                    if let Some(pos) = entries.iter().position(|e| e.device.id == device_id) {
                        entries.remove(pos);
                        log::info!("[DeviceRegistry] Lost {}", device_id);
                        changes.offline.push(device_id);
                        changes.changed = true;
                    }
                }
            }
        }
        self.notify(changes)
    }

    /// Removes devices not refreshed within `threshold`.
    ///
    /// Returns the number of devices removed.
    pub fn prune_stale(&self, threshold: Duration) -> usize {
        self.remove_where(|entry| entry.refreshed_at.elapsed() > threshold)
    }

    /// Forgets every device. A running session keeps its own copy of its device.
    ///
    /// Returns the number of devices removed.
    pub fn clear(&self) -> usize {
        self.remove_where(|_| true)
    }

    fn remove_where(&self, mut predicate: impl FnMut(&Entry) -> bool) -> usize {
        let mut changes = Changes::default();
        {
            let mut entries = self.entries.write();
            entries.retain(|entry| {
                if predicate(entry) {
                    changes.offline.push(entry.device.id.clone());
                    false
                } else {
                    true
                }
            });
        }
        let removed = changes.offline.len();
        if removed > 0 {
            log::debug!("[DeviceRegistry] Removed {} device(s)", removed);
            changes.changed = true;
            self.notify(changes);
        }
        removed
    }

    fn notify(&self, changes: Changes) -> bool {
        if !changes.changed {
            return false;
        }
        let listener = self.listener.read().clone();
        let timestamp = now_millis();

        for device in changes.online {
            if let Some(ref l) = listener {
                l.device_online(&device);
            }
            self.emitter
                .emit_device(DeviceEvent::Online { device, timestamp });
        }
        for device_id in changes.offline {
            if let Some(ref l) = listener {
                l.device_offline(&device_id);
            }
            self.emitter
                .emit_device(DeviceEvent::Offline { device_id, timestamp });
        }

        let devices = self.list();
        if let Some(ref l) = listener {
            l.devices_changed(&devices);
        }
        self.emitter
            .emit_device(DeviceEvent::ListChanged { devices, timestamp });
        true
    }
}
