use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::sync::models::{
    advance_cursor, GlobalSwitch, RunFilter, RunStatus, RunSummary, StateFilter, StateKey,
    SyncState, TryStart, WorkerRun, STALE_RUN_MESSAGE,
};
use crate::sync::repositories::SyncRepository;
use marketsync_common::error::{MarketsyncError, MarketsyncResult};

#[derive(Debug)]
struct Inner {
    switch: GlobalSwitch,
    states: HashMap<(Uuid, String), SyncState>,
    runs: Vec<WorkerRun>,
}

/// In-process `SyncRepository`. A single mutex plays the role of the
/// SyncState row lock, so the check-and-insert in `try_start_run` is atomic.
#[derive(Debug, Clone)]
pub struct MemorySyncRepository {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemorySyncRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySyncRepository {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                switch: GlobalSwitch {
                    enabled: true,
                    updated_at: Utc::now(),
                },
                states: HashMap::new(),
                runs: Vec::new(),
            })),
        }
    }

    /// Number of ledger rows, regardless of status.
    pub async fn run_count(&self) -> usize {
        self.inner.lock().await.runs.len()
    }
}

fn not_running(run_id: Uuid) -> MarketsyncError {
    MarketsyncError::Conflict(format!("run {run_id} is not running"))
}

fn missing_state(account_id: Uuid, data_family: &str) -> MarketsyncError {
    MarketsyncError::NotFound(format!(
        "sync state for account {account_id} / {data_family}"
    ))
}

impl Inner {
    /// Terminate a running run and return its pair key.
    fn finish(
        &mut self,
        run_id: Uuid,
        status: RunStatus,
        summary: &RunSummary,
        now: DateTime<Utc>,
    ) -> MarketsyncResult<(Uuid, String)> {
        let run = self
            .runs
            .iter_mut()
            .find(|r| r.id == run_id && r.status == RunStatus::Running)
            .ok_or_else(|| not_running(run_id))?;
        run.status = status;
        run.finished_at = Some(now);
        run.heartbeat_at = now;
        run.summary = summary.clone();
        Ok((run.account_id, run.data_family.clone()))
    }
}

#[async_trait]
impl SyncRepository for MemorySyncRepository {
    async fn global_switch(&self) -> MarketsyncResult<GlobalSwitch> {
        Ok(self.inner.lock().await.switch)
    }

    async fn set_global_switch(&self, enabled: bool) -> MarketsyncResult<GlobalSwitch> {
        let mut inner = self.inner.lock().await;
        inner.switch = GlobalSwitch {
            enabled,
            updated_at: Utc::now(),
        };
        Ok(inner.switch)
    }

    async fn ensure_state(&self, key: &StateKey) -> MarketsyncResult<SyncState> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let state = inner
            .states
            .entry((key.account_id, key.data_family.clone()))
            .or_insert_with(|| SyncState {
                id: Uuid::new_v4(),
                account_id: key.account_id,
                external_account_ref: key.external_account_ref.clone(),
                data_family: key.data_family.clone(),
                enabled: true,
                cursor_kind: key.cursor_kind.clone(),
                cursor_value: None,
                last_run_at: None,
                last_error: None,
                created_at: now,
                updated_at: now,
            });
        state.external_account_ref = key.external_account_ref.clone();
        Ok(state.clone())
    }

    async fn get_state(
        &self,
        account_id: Uuid,
        data_family: &str,
    ) -> MarketsyncResult<Option<SyncState>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .states
            .get(&(account_id, data_family.to_string()))
            .cloned())
    }

    async fn list_states(&self, filter: StateFilter) -> MarketsyncResult<Vec<SyncState>> {
        let inner = self.inner.lock().await;
        let mut states: Vec<SyncState> = inner
            .states
            .values()
            .filter(|s| filter.account_id.map_or(true, |id| s.account_id == id))
            .filter(|s| {
                filter
                    .data_family
                    .as_deref()
                    .map_or(true, |f| s.data_family == f)
            })
            .cloned()
            .collect();
        states.sort_by(|a, b| {
            (a.account_id, &a.data_family).cmp(&(b.account_id, &b.data_family))
        });
        Ok(states)
    }

    async fn set_family_enabled(
        &self,
        account_id: Uuid,
        data_family: &str,
        enabled: bool,
    ) -> MarketsyncResult<SyncState> {
        let mut inner = self.inner.lock().await;
        let state = inner
            .states
            .get_mut(&(account_id, data_family.to_string()))
            .ok_or_else(|| missing_state(account_id, data_family))?;
        state.enabled = enabled;
        state.updated_at = Utc::now();
        Ok(state.clone())
    }

    async fn try_start_run(
        &self,
        account_id: Uuid,
        data_family: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> MarketsyncResult<TryStart> {
        let mut inner = self.inner.lock().await;
        let state = inner
            .states
            .get(&(account_id, data_family.to_string()))
            .cloned()
            .ok_or_else(|| missing_state(account_id, data_family))?;

        if !state.enabled {
            return Ok(TryStart::FamilyDisabled);
        }

        let pair_running = |r: &WorkerRun| {
            r.account_id == account_id
                && r.data_family == data_family
                && r.status == RunStatus::Running
        };

        if let Some(live) = inner
            .runs
            .iter()
            .filter(|r| pair_running(r))
            .find(|r| r.holds_lock(stale_before))
        {
            return Ok(TryStart::AlreadyRunning { run_id: live.id });
        }

        let mut reclaimed = Vec::new();
        for run in inner.runs.iter_mut().filter(|r| pair_running(r)) {
            run.status = RunStatus::Cancelled;
            run.finished_at = Some(now);
            run.summary.error_message = Some(STALE_RUN_MESSAGE.to_string());
            reclaimed.push(run.id);
        }

        let run = WorkerRun::new_running(account_id, data_family, now);
        inner.runs.push(run.clone());

        Ok(TryStart::Started {
            run,
            state,
            reclaimed,
        })
    }

    async fn heartbeat_run(&self, run_id: Uuid, now: DateTime<Utc>) -> MarketsyncResult<()> {
        let mut inner = self.inner.lock().await;
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id && r.status == RunStatus::Running)
            .ok_or_else(|| not_running(run_id))?;
        run.heartbeat_at = now;
        Ok(())
    }

    async fn complete_run(
        &self,
        run_id: Uuid,
        summary: &RunSummary,
        cursor_to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> MarketsyncResult<SyncState> {
        let mut inner = self.inner.lock().await;
        let (account_id, data_family) =
            inner.finish(run_id, RunStatus::Completed, summary, now)?;

        let state = inner
            .states
            .get_mut(&(account_id, data_family.clone()))
            .ok_or_else(|| missing_state(account_id, &data_family))?;
        state.cursor_value = Some(advance_cursor(state.cursor_value.as_deref(), cursor_to));
        state.last_run_at = Some(now);
        state.last_error = None;
        state.updated_at = now;
        Ok(state.clone())
    }

    async fn fail_run(
        &self,
        run_id: Uuid,
        summary: &RunSummary,
        now: DateTime<Utc>,
    ) -> MarketsyncResult<SyncState> {
        let mut inner = self.inner.lock().await;
        let (account_id, data_family) = inner.finish(run_id, RunStatus::Error, summary, now)?;

        let state = inner
            .states
            .get_mut(&(account_id, data_family.clone()))
            .ok_or_else(|| missing_state(account_id, &data_family))?;
        state.last_error = summary.error_message.clone();
        state.last_run_at = Some(now);
        state.updated_at = now;
        Ok(state.clone())
    }

    async fn get_run(&self, run_id: Uuid) -> MarketsyncResult<Option<WorkerRun>> {
        let inner = self.inner.lock().await;
        Ok(inner.runs.iter().find(|r| r.id == run_id).cloned())
    }

    async fn list_runs(&self, filter: RunFilter) -> MarketsyncResult<Vec<WorkerRun>> {
        let inner = self.inner.lock().await;
        let mut runs: Vec<WorkerRun> = inner
            .runs
            .iter()
            .filter(|r| filter.account_id.map_or(true, |id| r.account_id == id))
            .filter(|r| {
                filter
                    .data_family
                    .as_deref()
                    .map_or(true, |f| r.data_family == f)
            })
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        Ok(runs
            .into_iter()
            .skip(filter.effective_offset() as usize)
            .take(filter.effective_limit() as usize)
            .collect())
    }
}
