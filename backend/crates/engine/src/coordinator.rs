use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use marketsync_common::error::{MarketsyncError, MarketsyncResult};
use marketsync_db::accounts::models::Account;
use marketsync_db::sync::models::{RunSummary, StateKey, SyncState, TryStart};
use marketsync_db::sync::repositories::SyncRepository;

use crate::worker::WorkerError;

/// Why a start request did not produce a run. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    WorkersDisabled,
    FamilyDisabled,
    AlreadyRunning,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkersDisabled => "workers_disabled",
            Self::FamilyDisabled => "family_disabled",
            Self::AlreadyRunning => "already_running",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof of holding the (account, family) lock for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunHandle {
    pub run_id: Uuid,
    pub account_id: Uuid,
    pub data_family: String,
    pub started_at: DateTime<Utc>,
    /// SyncState as read under the lock when the run started.
    pub state: SyncState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started(RunHandle),
    Skipped(SkipReason),
}

/// Owns the per-pair execution lock and the run ledger transitions.
#[derive(Clone)]
pub struct RunCoordinator {
    repo: Arc<dyn SyncRepository>,
    stale_after: Duration,
}

impl RunCoordinator {
    pub fn new(repo: Arc<dyn SyncRepository>, stale_after: Duration) -> Self {
        Self { repo, stale_after }
    }

    pub fn from_std(
        repo: Arc<dyn SyncRepository>,
        stale_after: std::time::Duration,
    ) -> MarketsyncResult<Self> {
        let stale_after = Duration::from_std(stale_after)
            .map_err(|e| MarketsyncError::Config(format!("stale_after out of range: {e}")))?;
        Ok(Self::new(repo, stale_after))
    }

    pub fn repository(&self) -> &Arc<dyn SyncRepository> {
        &self.repo
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    #[tracing::instrument(level = "debug", skip(self, account), fields(account_id = %account.id))]
    pub async fn start(
        &self,
        account: &Account,
        data_family: &str,
        cursor_kind: &str,
    ) -> MarketsyncResult<StartOutcome> {
        // Read fresh on every decision; never cached.
        if !self.repo.global_switch().await?.enabled {
            return Ok(StartOutcome::Skipped(SkipReason::WorkersDisabled));
        }

        let state = self
            .repo
            .ensure_state(&StateKey {
                account_id: account.id,
                external_account_ref: account.external_ref.clone(),
                data_family: data_family.to_string(),
                cursor_kind: cursor_kind.to_string(),
            })
            .await?;
        if !state.enabled {
            return Ok(StartOutcome::Skipped(SkipReason::FamilyDisabled));
        }

        let now = Utc::now();
        let outcome = self
            .repo
            .try_start_run(account.id, data_family, now, now - self.stale_after)
            .await?;

        Ok(match outcome {
            TryStart::Started {
                run,
                state,
                reclaimed,
            } => {
                for stale_id in &reclaimed {
                    tracing::warn!(
                        data_family,
                        stale_run_id = %stale_id,
                        "reclaimed stale run lock"
                    );
                }
                StartOutcome::Started(RunHandle {
                    run_id: run.id,
                    account_id: run.account_id,
                    data_family: run.data_family,
                    started_at: run.started_at,
                    state,
                })
            }
            TryStart::FamilyDisabled => StartOutcome::Skipped(SkipReason::FamilyDisabled),
            TryStart::AlreadyRunning { run_id } => {
                tracing::debug!(data_family, %run_id, "pair is locked by a live run");
                StartOutcome::Skipped(SkipReason::AlreadyRunning)
            }
        })
    }

    pub async fn heartbeat(&self, handle: &RunHandle) -> MarketsyncResult<()> {
        self.repo.heartbeat_run(handle.run_id, Utc::now()).await
    }

    /// Complete the run and advance the cursor to `summary.window_to`.
    pub async fn finish(
        &self,
        handle: &RunHandle,
        summary: RunSummary,
    ) -> MarketsyncResult<SyncState> {
        let cursor_to = summary.window_to.ok_or_else(|| {
            MarketsyncError::Validation("run summary has no window_to".to_string())
        })?;
        self.repo
            .complete_run(handle.run_id, &summary, cursor_to, Utc::now())
            .await
    }

    /// Record the failure; the cursor is left untouched.
    pub async fn fail(
        &self,
        handle: &RunHandle,
        mut summary: RunSummary,
        error: &WorkerError,
    ) -> MarketsyncResult<SyncState> {
        summary.error_message = Some(error.recorded_message());
        self.repo.fail_run(handle.run_id, &summary, Utc::now()).await
    }
}
