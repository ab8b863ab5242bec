//! Reconnection supervisor.
//!
//! Spawned when a connected session is suspended. Retries the connection
//! with exponential backoff until it succeeds, a non-transient error occurs,
//! the reconnect timeout expires, or the session is torn down.
//!
//! On success the application session (if any) is rejoined before the new
//! link is handed back, so the state machine only ever sees a fully
//! re-established session or a degraded one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::driver::ReceiverDriver;
use super::machine::{link_channel, Internal};
use crate::discovery::Device;
use crate::error::CastError;

/// Stand-in deadline for timeouts too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// What to re-establish after a transient loss.
pub(crate) struct ReconnectPlan {
    pub epoch: u64,
    pub device: Device,
    /// `(app_id, session_id)` of the application to rejoin.
    pub rejoin: Option<(String, String)>,
    pub timeout: Duration,
    /// Delays before each attempt; the last one repeats.
    pub backoff: Vec<u64>,
}

pub(crate) struct ReconnectSupervisor {
    pub driver: Arc<dyn ReceiverDriver>,
    pub internal: mpsc::UnboundedSender<Internal>,
    pub link_ids: Arc<AtomicU64>,
    /// Token of the owning session; new links forward events until it fires.
    pub session_cancel: CancellationToken,
}

enum Outcome {
    Cancelled,
    TimedOut,
}

impl ReconnectSupervisor {
    /// Starts supervising. The returned token (a child of the session token)
    /// stops the supervisor.
    pub(crate) fn spawn(self, plan: ReconnectPlan) -> CancellationToken {
        let cancel = self.session_cancel.child_token();
        let token = cancel.clone();
        tokio::spawn(async move {
            let epoch = plan.epoch;
            if let Outcome::TimedOut = self.run(plan, &cancel).await {
                log::warn!("[Reconnect] Gave up after reconnect timeout");
                let _ = self.internal.send(Internal::ReconnectFailed {
                    epoch,
                    error: CastError::ReconnectTimeout,
                });
            }
        });
        token
    }

    async fn run(&self, plan: ReconnectPlan, cancel: &CancellationToken) -> Outcome {
        let now = Instant::now();
        let deadline = now.checked_add(plan.timeout).unwrap_or_else(|| now + FAR_FUTURE);
        let last_delay = plan.backoff.last().copied().unwrap_or(1000);
        let delays = plan
            .backoff
            .iter()
            .copied()
            .chain(std::iter::repeat(last_delay));

        log::info!(
            "[Reconnect] Supervising {} for up to {}s",
            plan.device.id,
            plan.timeout.as_secs()
        );

        for (index, delay_ms) in delays.enumerate() {
            let attempt = index as u32 + 1;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled,
                _ = sleep_until(deadline) => return Outcome::TimedOut,
                _ = sleep(Duration::from_millis(delay_ms)) => {}
            }

            log::debug!(
                "[Reconnect] Attempt {} to {} after {}ms",
                attempt,
                plan.device.id,
                delay_ms
            );
            let _ = self.internal.send(Internal::ReconnectAttempt {
                epoch: plan.epoch,
                attempt,
            });

            let link_id = self.link_ids.fetch_add(1, Ordering::Relaxed);
            let events = link_channel(
                link_id,
                self.internal.clone(),
                self.session_cancel.clone(),
            );
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled,
                _ = sleep_until(deadline) => return Outcome::TimedOut,
                r = self.driver.connect(&plan.device, events) => r,
            };

            match result {
                Ok(link) => {
                    let rejoin = match plan.rejoin.as_ref() {
                        Some((app_id, session_id)) => {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => {
                                    link.close().await;
                                    return Outcome::Cancelled;
                                }
                                _ = sleep_until(deadline) => {
                                    link.close().await;
                                    return Outcome::TimedOut;
                                }
                                r = link.join_application(app_id, Some(session_id)) => Some(r),
                            }
                        }
                        None => None,
                    };
                    let _ = self.internal.send(Internal::Reconnected {
                        epoch: plan.epoch,
                        link_id,
                        link,
                        rejoin,
                    });
                    return Outcome::Cancelled;
                }
                Err(e) if e.is_transient() => {
                    log::warn!("[Reconnect] Attempt {} failed: {}", attempt, e);
                }
                Err(e) => {
                    log::warn!("[Reconnect] Attempt {} rejected: {}", attempt, e);
                    let _ = self.internal.send(Internal::ReconnectFailed {
                        epoch: plan.epoch,
                        error: CastError::ConnectFailed(e.to_string()),
                    });
                    return Outcome::Cancelled;
                }
            }
        }

        Outcome::TimedOut
    }
}
