use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use futures::FutureExt;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use marketsync_common::error::{MarketsyncError, MarketsyncResult};
use marketsync_db::accounts::models::Account;
use marketsync_db::sync::models::RunSummary;

use crate::coordinator::{RunCoordinator, RunHandle, SkipReason, StartOutcome};
use crate::credentials::CredentialProvider;
use crate::registry::WorkerRegistry;
use crate::window::{window_for, FirstRunPolicy, Window};
use crate::worker::{ErrorCode, Worker, WorkerError, WorkerOutput};

/// Outcome of one execution attempt for an (account, family) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunReport {
    Completed {
        run_id: Uuid,
        summary: RunSummary,
    },
    Failed {
        run_id: Uuid,
        code: ErrorCode,
        summary: RunSummary,
    },
    Skipped {
        reason: SkipReason,
    },
}

impl RunReport {
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            Self::Completed { run_id, .. } | Self::Failed { run_id, .. } => Some(*run_id),
            Self::Skipped { .. } => None,
        }
    }
}

/// Drives start → execute → finish/fail for a single pair.
#[derive(Clone)]
pub struct RunExecutor {
    coordinator: RunCoordinator,
    registry: Arc<WorkerRegistry>,
    credentials: Arc<dyn CredentialProvider>,
    heartbeat_interval: StdDuration,
    first_run: FirstRunPolicy,
}

impl RunExecutor {
    pub fn new(
        coordinator: RunCoordinator,
        registry: Arc<WorkerRegistry>,
        credentials: Arc<dyn CredentialProvider>,
        heartbeat_interval: StdDuration,
        first_run: FirstRunPolicy,
    ) -> Self {
        Self {
            coordinator,
            registry,
            credentials,
            heartbeat_interval,
            first_run,
        }
    }

    pub fn coordinator(&self) -> &RunCoordinator {
        &self.coordinator
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    pub fn first_run_policy(&self) -> FirstRunPolicy {
        self.first_run
    }

    /// Worker failures end up in the returned report; only storage errors
    /// of the ledger itself are returned as `Err`.
    #[tracing::instrument(skip(self, account), fields(account = %account.external_ref))]
    pub async fn run_pair(
        &self,
        account: &Account,
        data_family: &str,
    ) -> MarketsyncResult<RunReport> {
        let worker = self.registry.get(data_family).ok_or_else(|| {
            MarketsyncError::NotFound(format!("no worker registered for '{data_family}'"))
        })?;
        let policy = worker.policy();

        let handle = match self
            .coordinator
            .start(account, data_family, policy.kind.cursor_kind())
            .await?
        {
            StartOutcome::Started(handle) => handle,
            StartOutcome::Skipped(reason) => {
                tracing::info!(%reason, "run skipped");
                return Ok(RunReport::Skipped { reason });
            }
        };

        let window = window_for(
            &policy.kind,
            handle.state.cursor_value.as_deref(),
            handle.started_at,
            self.first_run,
        );
        let mut summary = RunSummary::for_window(window.from, window.to);
        tracing::debug!(run_id = %handle.run_id, from = %window.from, to = %window.to, "run started");

        match self.execute(worker.as_ref(), account, &handle, window).await {
            Ok(output) => {
                summary.fetched_count = to_count(output.fetched);
                summary.stored_count = to_count(output.stored);
                summary.skipped_count = to_count(output.skipped);
                self.coordinator.finish(&handle, summary.clone()).await?;
                tracing::info!(
                    run_id = %handle.run_id,
                    fetched = output.fetched,
                    stored = output.stored,
                    skipped = output.skipped,
                    "run completed"
                );
                Ok(RunReport::Completed {
                    run_id: handle.run_id,
                    summary,
                })
            }
            Err(err) => {
                summary.error_message = Some(err.recorded_message());
                self.coordinator.fail(&handle, summary.clone(), &err).await?;
                if matches!(err, WorkerError::Auth(_)) {
                    tracing::error!(run_id = %handle.run_id, error = %err, "run failed; account needs re-authorization");
                } else {
                    tracing::warn!(run_id = %handle.run_id, error = %err, "run failed");
                }
                Ok(RunReport::Failed {
                    run_id: handle.run_id,
                    code: err.code(),
                    summary,
                })
            }
        }
    }

    /// Credential lookup plus the worker call, with heartbeats while the
    /// worker is in flight. Panics become `WorkerError::Unexpected`.
    async fn execute(
        &self,
        worker: &dyn Worker,
        account: &Account,
        handle: &RunHandle,
        window: Window,
    ) -> Result<WorkerOutput, WorkerError> {
        let credential = self.credentials.credential(account).await?;

        let work = AssertUnwindSafe(worker.execute(account, &credential, window)).catch_unwind();
        tokio::pin!(work);

        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; start() already stamped heartbeat_at.
        ticker.tick().await;

        let outcome = loop {
            tokio::select! {
                outcome = &mut work => break outcome,
                _ = ticker.tick() => {
                    if let Err(e) = self.coordinator.heartbeat(handle).await {
                        tracing::warn!(run_id = %handle.run_id, error = %e, "heartbeat failed");
                    }
                }
            }
        };

        match outcome {
            Ok(result) => result,
            Err(payload) => Err(WorkerError::Unexpected(format!(
                "worker panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }
}

fn to_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
