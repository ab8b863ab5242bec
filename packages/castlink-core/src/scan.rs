//! Scan controller: owns the discovery lifecycle.
//!
//! A single background loop consumes the scanner's event stream, applies
//! events to the [`DeviceRegistry`] and periodically prunes stale entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::discovery::DeviceScanner;
use crate::error::CastResult;
use crate::registry::DeviceRegistry;

struct ScanRun {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Starts and stops discovery. `start_scan` is idempotent.
pub struct ScanController {
    scanner: Arc<dyn DeviceScanner>,
    registry: Arc<DeviceRegistry>,
    stale_after: Duration,
    prune_interval: Duration,
    run: Mutex<Option<ScanRun>>,
}

impl ScanController {
    pub fn new(
        scanner: Arc<dyn DeviceScanner>,
        registry: Arc<DeviceRegistry>,
        stale_after: Duration,
        prune_interval: Duration,
    ) -> Self {
        Self {
            scanner,
            registry,
            stale_after,
            prune_interval,
            run: Mutex::new(None),
        }
    }

    /// Returns `true` while the scan loop is running.
    pub async fn is_scanning(&self) -> bool {
        self.run
            .lock()
            .await
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }

    /// Begins discovery if not already active.
    ///
    /// A second call while scanning is a no-op success. Discovery being
    /// unavailable is reported as [`CastError::DiscoveryUnavailable`](crate::CastError)
    /// and leaves the controller stopped so the caller may retry.
    pub async fn start_scan(&self) -> CastResult<()> {
        let mut run = self.run.lock().await;
        if let Some(existing) = run.as_ref() {
            if !existing.handle.is_finished() {
                log::debug!("[ScanController] Scan already active");
                return Ok(());
            }
        }

        let mut events = self.scanner.start().await.map_err(|e| {
            log::warn!("[ScanController] Discovery unavailable: {}", e);
            e
        })?;
        log::info!("[ScanController] Scan started");

        let cancel = CancellationToken::new();
        let registry = Arc::clone(&self.registry);
        let stale_after = self.stale_after;
        let mut prune = tokio::time::interval(self.prune_interval);
        let loop_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            // first tick completes immediately
            prune.tick().await;
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => {
                            registry.apply(event);
                        }
                        None => {
                            log::warn!("[ScanController] Scanner stream ended");
                            break;
                        }
                    },
                    _ = prune.tick() => {
                        let removed = registry.prune_stale(stale_after);
                        if removed > 0 {
                            log::info!("[ScanController] Pruned {} stale device(s)", removed);
                        }
                    }
                }
            }
            log::debug!("[ScanController] Scan loop exited");
        });

        *run = Some(ScanRun { cancel, handle });
        Ok(())
    }

    /// Halts discovery and forgets every discovered device.
    ///
    /// Safe to call when not scanning.
    pub async fn stop_scan(&self) {
        let run = self.run.lock().await.take();
        if let Some(run) = run {
            run.cancel.cancel();
            if let Err(e) = run.handle.await {
                log::warn!("[ScanController] Scan loop panicked: {}", e);
            }
            self.scanner.stop().await;
            log::info!("[ScanController] Scan stopped");
        }
        self.registry.clear();
    }
}
