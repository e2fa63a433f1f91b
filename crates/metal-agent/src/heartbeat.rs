//! Wipe heartbeat.
//!
//! While disks are being wiped the agent tells the controller it is alive
//! every `reboot_timeout / 3`, so the server is not power cycled mid-wipe.
//! Heartbeat failures are logged and never stop the loop.

use agent_api::{AgentApi, HeartbeatRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Interval used when the controller sends no usable reboot timeout.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(60);

/// A third of the reboot timeout, in seconds.
#[must_use]
pub fn interval_for(reboot_timeout_secs: f64) -> Duration {
    if reboot_timeout_secs.is_finite() && reboot_timeout_secs > 0.0 {
        Duration::from_secs_f64(reboot_timeout_secs / 3.0)
    } else {
        FALLBACK_INTERVAL
    }
}

/// Running heartbeat loop.
#[derive(Debug)]
pub struct Heartbeat {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Starts beating immediately, then every `interval`. Each beat is
    /// bounded by `interval` as well.
    pub fn spawn(api: Arc<dyn AgentApi>, uuid: String, interval: Duration, parent: &CancellationToken) -> Self {
        let stop = parent.child_token();
        let token = stop.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                let beat = api.heartbeat(HeartbeatRequest { uuid: uuid.clone() });
                tokio::select! {
                    () = token.cancelled() => return,
                    r = tokio::time::timeout(interval, beat) => match r {
                        Ok(Ok(())) => debug!(%uuid, "heartbeat sent"),
                        Ok(Err(e)) => warn!(%uuid, error = %e, "failed to send wipe heartbeat"),
                        Err(_) => warn!(%uuid, "wipe heartbeat timed out"),
                    },
                }
            }
        });

        Self { stop, handle }
    }

    /// Stops the loop and waits for it to finish.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "heartbeat task failed");
        }
    }
}
