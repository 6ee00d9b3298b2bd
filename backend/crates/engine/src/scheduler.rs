use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use marketsync_common::error::{MarketsyncError, MarketsyncResult};
use marketsync_db::accounts::models::Account;
use marketsync_db::accounts::repositories::AccountRepository;

use crate::runner::{panic_message, RunExecutor, RunReport};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyRun {
    pub data_family: String,
    pub report: RunReport,
}

/// Everything that happened for one account during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountReport {
    pub account_id: Uuid,
    pub external_ref: String,
    pub runs: Vec<FamilyRun>,
    /// Ledger errors and escaped panics; worker failures live in `runs`.
    pub errors: Vec<String>,
}

impl AccountReport {
    fn new(account: &Account) -> Self {
        Self {
            account_id: account.id,
            external_ref: account.external_ref.clone(),
            runs: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn completed(&self) -> usize {
        self.count(|r| matches!(r, RunReport::Completed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, RunReport::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|r| matches!(r, RunReport::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&RunReport) -> bool) -> usize {
        self.runs.iter().filter(|r| pred(&r.report)).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub accounts: Vec<AccountReport>,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl CycleReport {
    fn push(&mut self, account: AccountReport) {
        self.completed += account.completed();
        self.failed += account.failed();
        self.skipped += account.skipped();
        self.errors += account.errors.len();
        self.accounts.push(account);
    }

    pub fn account(&self, account_id: Uuid) -> Option<&AccountReport> {
        self.accounts.iter().find(|a| a.account_id == account_id)
    }
}

/// Fans a cycle out over accounts with bounded parallelism.
#[derive(Clone)]
pub struct AccountScheduler {
    executor: RunExecutor,
    accounts: Arc<dyn AccountRepository>,
    permits: Arc<Semaphore>,
    family_stagger: StdDuration,
}

impl AccountScheduler {
    pub fn new(
        executor: RunExecutor,
        accounts: Arc<dyn AccountRepository>,
        max_concurrent_accounts: usize,
        family_stagger: StdDuration,
    ) -> Self {
        Self {
            executor,
            accounts,
            permits: Arc::new(Semaphore::new(max_concurrent_accounts.max(1))),
            family_stagger,
        }
    }

    pub fn executor(&self) -> &RunExecutor {
        &self.executor
    }

    pub fn accounts(&self) -> &Arc<dyn AccountRepository> {
        &self.accounts
    }

    /// Scheduled families this account opted into, in registry order.
    pub fn families_for(&self, account: &Account) -> Vec<String> {
        self.executor
            .registry()
            .scheduled()
            .iter()
            .map(|w| w.data_family().to_string())
            .filter(|f| account.wants_family(f))
            .collect()
    }

    pub async fn run_cycle_for_account(&self, account_id: Uuid) -> MarketsyncResult<AccountReport> {
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
        Ok(self.sync_account(&account).await)
    }

    /// Runs the account's families one after another, pausing
    /// `family_stagger` between them. Never fails.
    pub async fn sync_account(&self, account: &Account) -> AccountReport {
        let mut report = AccountReport::new(account);

        for (i, family) in self.families_for(account).into_iter().enumerate() {
            if i > 0 && !self.family_stagger.is_zero() {
                tokio::time::sleep(self.family_stagger).await;
            }
            match self.executor.run_pair(account, &family).await {
                Ok(run) => report.runs.push(FamilyRun {
                    data_family: family,
                    report: run,
                }),
                Err(e) => {
                    tracing::error!(account = %account.external_ref, data_family = %family, error = %e, "run bookkeeping failed");
                    report.errors.push(format!("{family}: {e}"));
                }
            }
        }
        report
    }

    pub async fn run_cycle_for_all_accounts(&self) -> MarketsyncResult<CycleReport> {
        let accounts = self.accounts.list_active().await?;
        Ok(self.run_cycle(accounts).await)
    }

    /// One task per account; at most `max_concurrent_accounts` hold a permit.
    pub async fn run_cycle(&self, accounts: Vec<Account>) -> CycleReport {
        let started = std::time::Instant::now();
        let total = accounts.len();
        let mut tasks = JoinSet::new();

        for account in accounts {
            let this = self.clone();
            tasks.spawn(async move {
                let _permit = match this.permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let mut report = AccountReport::new(&account);
                        report.errors.push("scheduler is shut down".to_string());
                        return report;
                    }
                };
                match AssertUnwindSafe(this.sync_account(&account))
                    .catch_unwind()
                    .await
                {
                    Ok(report) => report,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!(account = %account.external_ref, panic = %message, "account sync panicked");
                        let mut report = AccountReport::new(&account);
                        report.errors.push(format!("panic: {message}"));
                        report
                    }
                }
            });
        }

        let mut cycle = CycleReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => cycle.push(report),
                Err(e) => {
                    tracing::error!(error = %e, "account task did not finish");
                    cycle.errors += 1;
                }
            }
        }
        cycle.accounts.sort_by(|a, b| a.external_ref.cmp(&b.external_ref));

        tracing::info!(
            accounts = total,
            completed = cycle.completed,
            failed = cycle.failed,
            skipped = cycle.skipped,
            errors = cycle.errors,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync cycle finished"
        );
        cycle
    }
}
