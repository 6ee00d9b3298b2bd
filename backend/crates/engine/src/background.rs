use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use marketsync_common::error::MarketsyncResult;

use crate::credentials::CredentialProvider;
use crate::scheduler::{AccountScheduler, CycleReport};

/// Periodic driver: refresh credentials, then run one cycle, every `interval`.
pub struct BackgroundLoop {
    scheduler: AccountScheduler,
    credentials: Arc<dyn CredentialProvider>,
    interval: StdDuration,
}

impl BackgroundLoop {
    pub fn new(scheduler: AccountScheduler, interval: StdDuration) -> Self {
        let credentials = scheduler.executor().credentials().clone();
        Self {
            scheduler,
            credentials,
            interval,
        }
    }

    pub fn scheduler(&self) -> &AccountScheduler {
        &self.scheduler
    }

    pub async fn run_once(&self) -> MarketsyncResult<CycleReport> {
        let accounts = self.scheduler.accounts().list_active().await?;

        // A failed refresh is not fatal: stale credentials surface as auth_error runs.
        if let Err(e) = self.credentials.refresh_all(&accounts).await {
            tracing::warn!(error = %e, "credential refresh failed; continuing with cached credentials");
        }

        Ok(self.scheduler.run_cycle(accounts).await)
    }

    /// Runs until `shutdown` flips to `true`. A cycle in flight when the
    /// signal arrives is allowed to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "background sync loop started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "sync cycle aborted");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("background sync loop stopped");
    }
}
