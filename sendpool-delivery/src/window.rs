//! Periodic accounting window rollover.

use std::time::Duration;

use chrono::Utc;
use sendpool_common::{Signal, internal, tracing};
use tokio::sync::broadcast;

use crate::accounting::{AccountingConfig, UsageAccounting};

/// Resets elapsed accounting windows on an interval until shutdown.
pub struct WindowResetJob {
    accounting: UsageAccounting,
    window: Duration,
    interval: Duration,
}

impl WindowResetJob {
    #[must_use]
    pub fn new(accounting: UsageAccounting, config: &AccountingConfig) -> Self {
        Self {
            accounting,
            window: config.window(),
            interval: config.reset_interval(),
        }
    }

    /// Runs one check immediately, then one per interval.
    ///
    /// Store errors are logged and the loop keeps going; only a shutdown
    /// signal (or a closed channel) ends it.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!(
            level = INFO,
            "Window reset job starting (window {:?}, interval {:?})",
            self.window,
            self.interval
        );

        let mut timer = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.tick().await;
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Window reset job received shutdown signal");
                        }
                        Err(e) => {
                            tracing::error!("Window reset job shutdown channel error: {e}");
                        }
                    }
                    return;
                }
            }
        }
    }

    /// One reset pass; returns how many windows were reset.
    pub async fn tick(&self) -> usize {
        match self
            .accounting
            .reset_elapsed_windows(Utc::now(), self.window)
            .await
        {
            Ok(reset) => {
                tracing::debug!(reset, "Checked accounting windows");
                reset
            }
            Err(e) => {
                tracing::error!("Error resetting accounting windows: {e}");
                0
            }
        }
    }
}
