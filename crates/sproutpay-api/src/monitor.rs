//! Background reconciliation of open settlement channels.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::machine::StatusMachine;
use crate::metrics;

const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub updated: usize,
    pub errors: usize,
    /// Network was not authenticated, nothing was polled.
    pub skipped: bool,
}

pub struct ChannelMonitor {
    machine: Arc<StatusMachine>,
    interval: Duration,
    request_delay: Duration,
}

impl ChannelMonitor {
    pub fn new(machine: Arc<StatusMachine>, interval: Duration) -> Self {
        Self {
            machine,
            interval,
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }

    /// Pause between channels within one sweep.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// Poll every open channel once. Per-channel failures are counted and
    /// the sweep carries on.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        if !self.machine.network().is_authenticated() {
            tracing::debug!("settlement network not authenticated, skipping channel sweep");
            report.skipped = true;
            return report;
        }
        metrics::MONITOR_SWEEPS.inc();

        let channels = match self.machine.open_channels() {
            Ok(channels) => channels,
            Err(e) => {
                tracing::error!(error = %e, "failed to list open channels");
                metrics::MONITOR_ERRORS.inc();
                report.errors += 1;
                return report;
            }
        };

        for (i, channel) in channels.iter().enumerate() {
            if i > 0 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
            report.checked += 1;

            match self.machine.sync_channel(channel).await {
                Ok(true) => report.updated += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(channel_id = %channel.channel_id, error = %e, "channel sync failed");
                    metrics::MONITOR_ERRORS.inc();
                    report.errors += 1;
                }
            }
        }

        if report.checked > 0 {
            tracing::info!(
                checked = report.checked,
                updated = report.updated,
                errors = report.errors,
                "channel sweep finished"
            );
        }
        report
    }

    /// Sweep on every tick until `shutdown` flips to true or its sender drops.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.interval.as_secs(), "channel monitor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("channel monitor stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
