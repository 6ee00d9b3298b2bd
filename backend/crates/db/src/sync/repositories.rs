use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::sync::models::{
    GlobalSwitch, RunFilter, RunSummary, StateFilter, StateKey, SyncState, TryStart, WorkerRun,
};
use marketsync_common::error::MarketsyncResult;

/// Persistence for sync cursors, the run ledger and the global switch.
///
/// Every method that transitions a run is atomic: implementations must never
/// leave a completed run without its cursor advance, or vice versa.
#[async_trait]
pub trait SyncRepository: Send + Sync {
    /// Always reads the stored value; callers must not cache it.
    async fn global_switch(&self) -> MarketsyncResult<GlobalSwitch>;

    async fn set_global_switch(&self, enabled: bool) -> MarketsyncResult<GlobalSwitch>;

    /// Get the SyncState for the pair, creating it enabled with no cursor if missing.
    async fn ensure_state(&self, key: &StateKey) -> MarketsyncResult<SyncState>;

    async fn get_state(
        &self,
        account_id: Uuid,
        data_family: &str,
    ) -> MarketsyncResult<Option<SyncState>>;

    async fn list_states(&self, filter: StateFilter) -> MarketsyncResult<Vec<SyncState>>;

    /// Returns `NotFound` if the pair has never been scheduled.
    async fn set_family_enabled(
        &self,
        account_id: Uuid,
        data_family: &str,
        enabled: bool,
    ) -> MarketsyncResult<SyncState>;

    /// Under the SyncState row lock: re-check the enable flag, reject if a
    /// running run has a heartbeat at or after `stale_before`, cancel stale
    /// running runs, and insert a new running run.
    async fn try_start_run(
        &self,
        account_id: Uuid,
        data_family: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> MarketsyncResult<TryStart>;

    /// Returns `Conflict` if the run is no longer running.
    async fn heartbeat_run(&self, run_id: Uuid, now: DateTime<Utc>) -> MarketsyncResult<()>;

    /// Mark the run completed and advance the pair's cursor to
    /// `max(existing, cursor_to)`, clearing `last_error`, in one transaction.
    async fn complete_run(
        &self,
        run_id: Uuid,
        summary: &RunSummary,
        cursor_to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> MarketsyncResult<SyncState>;

    /// Mark the run errored and record `summary.error_message` as the pair's
    /// `last_error`. The cursor is left untouched.
    async fn fail_run(
        &self,
        run_id: Uuid,
        summary: &RunSummary,
        now: DateTime<Utc>,
    ) -> MarketsyncResult<SyncState>;

    async fn get_run(&self, run_id: Uuid) -> MarketsyncResult<Option<WorkerRun>>;

    /// Newest first.
    async fn list_runs(&self, filter: RunFilter) -> MarketsyncResult<Vec<WorkerRun>>;
}
