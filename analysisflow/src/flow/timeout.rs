//! Periodic sweep of invocations whose callback never arrived.

use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::orchestrator::Flow;
use crate::utils::now_utc;

/// Calls [`Flow::sweep_timeouts`] on a fixed interval.
#[derive(Debug)]
pub struct TimeoutSweeper {
    flow: Weak<Flow>,
    interval: Duration,
}

impl TimeoutSweeper {
    pub(crate) fn new(flow: Weak<Flow>, interval: Duration) -> Self {
        Self { flow, interval }
    }

    /// Returns the sweep interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sweeps until the flow is dropped.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(flow) = self.flow.upgrade() else {
                break;
            };
            match flow.sweep_timeouts(now_utc()).await {
                Ok(expired) if !expired.is_empty() => {
                    warn!(count = expired.len(), tasks = ?expired, "Timed out invocations");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Timeout sweep failed"),
            }
        }
        info!("Timeout sweeper stopped");
    }

    /// Runs the sweeper on the current tokio runtime.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
