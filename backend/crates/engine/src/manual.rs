use std::sync::Arc;

use uuid::Uuid;

use marketsync_common::error::{MarketsyncError, MarketsyncResult};
use marketsync_db::accounts::repositories::AccountRepository;

use crate::runner::{RunExecutor, RunReport};

/// Off-cadence run of a single pair. Shares the executor, and therefore the
/// pair lock, with the background loop.
#[derive(Clone)]
pub struct ManualTrigger {
    executor: RunExecutor,
    accounts: Arc<dyn AccountRepository>,
}

impl ManualTrigger {
    pub fn new(executor: RunExecutor, accounts: Arc<dyn AccountRepository>) -> Self {
        Self { executor, accounts }
    }

    /// Manual-only families are allowed here; the account's family selection
    /// still applies.
    pub async fn trigger(&self, account_id: Uuid, data_family: &str) -> MarketsyncResult<RunReport> {
        let account = self
            .accounts
            .get(account_id)
            .await?
            .ok_or_else(|| MarketsyncError::NotFound(format!("account {account_id}")))?;
        if !account.active {
            return Err(MarketsyncError::Validation(format!(
                "account {} is inactive",
                account.external_ref
            )));
        }
        if self.executor.registry().get(data_family).is_none() {
            return Err(MarketsyncError::NotFound(format!(
                "no worker registered for '{data_family}'"
            )));
        }
        if !account.wants_family(data_family) {
            return Err(MarketsyncError::Validation(format!(
                "account {} does not sync '{data_family}'",
                account.external_ref
            )));
        }

        tracing::info!(account = %account.external_ref, data_family, "manual trigger");

        // Detached so a dropped caller (e.g. a disconnected HTTP client)
        // cannot abandon the run between start and finish.
        let executor = self.executor.clone();
        let family = data_family.to_string();
        tokio::spawn(async move { executor.run_pair(&account, &family).await })
            .await
            .map_err(|e| MarketsyncError::Internal(format!("manual run task failed: {e}")))?
    }
}
