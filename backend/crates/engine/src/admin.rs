use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use uuid::Uuid;

use marketsync_common::error::{MarketsyncError, MarketsyncResult};
use marketsync_db::accounts::models::Account;
use marketsync_db::accounts::repositories::AccountRepository;
use marketsync_db::sync::models::{
    GlobalSwitch, RunFilter, StateFilter, StateKey, SyncState, WorkerRun,
};
use marketsync_db::sync::repositories::SyncRepository;

use crate::manual::ManualTrigger;
use crate::registry::WorkerRegistry;
use crate::runner::{RunExecutor, RunReport};
use crate::schedule::{project_schedule, ProjectedRun};
use crate::window::FirstRunPolicy;

pub const MAX_PROJECTED_CYCLES: usize = 48;

/// Operator-facing surface over the engine: read state and history, flip
/// switches, trigger runs.
#[derive(Clone)]
pub struct SyncAdmin {
    sync: Arc<dyn SyncRepository>,
    accounts: Arc<dyn AccountRepository>,
    registry: Arc<WorkerRegistry>,
    trigger: ManualTrigger,
    cycle_interval: StdDuration,
    first_run: FirstRunPolicy,
}

impl SyncAdmin {
    pub fn new(
        executor: RunExecutor,
        accounts: Arc<dyn AccountRepository>,
        cycle_interval: StdDuration,
    ) -> Self {
        Self {
            sync: executor.coordinator().repository().clone(),
            registry: executor.registry().clone(),
            first_run: executor.first_run_policy(),
            trigger: ManualTrigger::new(executor, accounts.clone()),
            accounts,
            cycle_interval,
        }
    }

    pub fn families(&self) -> Vec<String> {
        self.registry.families().map(str::to_string).collect()
    }

    pub async fn list_states(&self, filter: StateFilter) -> MarketsyncResult<Vec<SyncState>> {
        self.sync.list_states(filter).await
    }

    pub async fn get_state(&self, account_id: Uuid, data_family: &str) -> MarketsyncResult<SyncState> {
        self.sync
            .get_state(account_id, data_family)
            .await?
            .ok_or_else(|| {
                MarketsyncError::NotFound(format!(
                    "sync state for account {account_id} / {data_family}"
                ))
            })
    }

    pub async fn list_runs(&self, filter: RunFilter) -> MarketsyncResult<Vec<WorkerRun>> {
        self.sync.list_runs(filter).await
    }

    pub async fn get_run(&self, run_id: Uuid) -> MarketsyncResult<WorkerRun> {
        self.sync
            .get_run(run_id)
            .await?
            .ok_or_else(|| MarketsyncError::NotFound(format!("run {run_id}")))
    }

    /// Creates the SyncState row if the pair has never run, so a family can
    /// be disabled before its first cycle.
    pub async fn set_family_enabled(
        &self,
        account_id: Uuid,
        data_family: &str,
        enabled: bool,
    ) -> MarketsyncResult<SyncState> {
        let account = self.account(account_id).await?;
        let worker = self.registry.get(data_family).ok_or_else(|| {
            MarketsyncError::NotFound(format!("no worker registered for '{data_family}'"))
        })?;

        self.sync
            .ensure_state(&StateKey {
                account_id,
                external_account_ref: account.external_ref.clone(),
                data_family: data_family.to_string(),
                cursor_kind: worker.policy().kind.cursor_kind().to_string(),
            })
            .await?;
        let state = self
            .sync
            .set_family_enabled(account_id, data_family, enabled)
            .await?;
        tracing::info!(account = %account.external_ref, data_family, enabled, "family toggled");
        Ok(state)
    }

    pub async fn global_switch(&self) -> MarketsyncResult<GlobalSwitch> {
        self.sync.global_switch().await
    }

    pub async fn set_global_switch(&self, enabled: bool) -> MarketsyncResult<GlobalSwitch> {
        let switch = self.sync.set_global_switch(enabled).await?;
        tracing::info!(enabled, "global worker switch updated");
        Ok(switch)
    }

    pub async fn trigger(&self, account_id: Uuid, data_family: &str) -> MarketsyncResult<RunReport> {
        self.trigger.trigger(account_id, data_family).await
    }

    /// Empty while the global switch is off.
    pub async fn projected_schedule(&self, cycles: usize) -> MarketsyncResult<Vec<ProjectedRun>> {
        if cycles == 0 || cycles > MAX_PROJECTED_CYCLES {
            return Err(MarketsyncError::Validation(format!(
                "cycles must be between 1 and {MAX_PROJECTED_CYCLES}"
            )));
        }
        if !self.sync.global_switch().await?.enabled {
            return Ok(Vec::new());
        }

        let accounts = self.accounts.list_active().await?;
        let states = self.sync.list_states(StateFilter::default()).await?;
        let interval = Duration::from_std(self.cycle_interval)
            .map_err(|e| MarketsyncError::Config(format!("cycle interval out of range: {e}")))?;

        Ok(project_schedule(
            &accounts,
            &states,
            &self.registry,
            Utc::now(),
            interval,
            cycles,
            self.first_run,
        ))
    }

    async fn account(&self, account_id: Uuid) -> MarketsyncResult<Account> {
        self.accounts
            .get(account_id)
            .await?
            .ok_or_else(|| MarketsyncError::NotFound(format!("account {account_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketsync_db::accounts::memory::MemoryAccountRepository;
    use marketsync_db::sync::memory::MemorySyncRepository;
    use marketsync_db::sync::models::RunStatus;

    use crate::coordinator::{RunCoordinator, SkipReason};
    use crate::test_support::{ScriptedWorker, StaticCredentials};
    use crate::worker::Worker;

    struct Fixture {
        accounts: MemoryAccountRepository,
        admin: SyncAdmin,
    }

    fn fixture() -> Fixture {
        let sync = MemorySyncRepository::new();
        let accounts = MemoryAccountRepository::new();
        let mut registry = WorkerRegistry::new();
        registry
            .register(Arc::new(ScriptedWorker::windowed("orders")) as Arc<dyn Worker>)
            .unwrap();
        registry
            .register(Arc::new(ScriptedWorker::snapshot("listings").manual_only()) as Arc<dyn Worker>)
            .unwrap();
        let executor = RunExecutor::new(
            RunCoordinator::new(Arc::new(sync), Duration::minutes(10)),
            Arc::new(registry),
            Arc::new(StaticCredentials::default()),
            StdDuration::from_secs(60),
            FirstRunPolicy::Lookback,
        );
        let admin = SyncAdmin::new(
            executor,
            Arc::new(accounts.clone()),
            StdDuration::from_secs(300),
        );
        Fixture { accounts, admin }
    }

    #[tokio::test]
    async fn family_can_be_disabled_before_first_run() {
        let fx = fixture();
        let account = fx.accounts.upsert(Account::new("A", "Seller A")).await.unwrap();

        let state = fx
            .admin
            .set_family_enabled(account.id, "orders", false)
            .await
            .unwrap();
        assert!(!state.enabled);
        assert!(state.cursor_value.is_none());

        let report = fx.admin.trigger(account.id, "orders").await.unwrap();
        assert_eq!(
            report,
            RunReport::Skipped {
                reason: SkipReason::FamilyDisabled
            }
        );
    }

    #[tokio::test]
    async fn trigger_is_recorded_in_run_history() {
        let fx = fixture();
        let account = fx.accounts.upsert(Account::new("A", "Seller A")).await.unwrap();

        let report = fx.admin.trigger(account.id, "orders").await.unwrap();
        let run_id = report.run_id().unwrap();

        let run = fx.admin.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        let runs = fx
            .admin
            .list_runs(RunFilter {
                account_id: Some(account.id),
                ..RunFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        let state = fx.admin.get_state(account.id, "orders").await.unwrap();
        assert!(state.cursor_value.is_some());
    }

    #[tokio::test]
    async fn switch_off_empties_projection_and_skips_triggers() {
        let fx = fixture();
        let account = fx.accounts.upsert(Account::new("A", "Seller A")).await.unwrap();
        assert_eq!(fx.admin.projected_schedule(2).await.unwrap().len(), 2);

        let switch = fx.admin.set_global_switch(false).await.unwrap();
        assert!(!switch.enabled);
        assert!(fx.admin.projected_schedule(2).await.unwrap().is_empty());
        let report = fx.admin.trigger(account.id, "orders").await.unwrap();
        assert_eq!(
            report,
            RunReport::Skipped {
                reason: SkipReason::WorkersDisabled
            }
        );
    }

    #[tokio::test]
    async fn lookups_of_missing_rows_are_not_found() {
        let fx = fixture();
        let err = fx.admin.get_run(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, MarketsyncError::NotFound(_)));
        let err = fx
            .admin
            .set_family_enabled(Uuid::new_v4(), "orders", false)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketsyncError::NotFound(_)));
        let err = fx.admin.projected_schedule(0).await.unwrap_err();
        assert!(matches!(err, MarketsyncError::Validation(_)));
    }
}
