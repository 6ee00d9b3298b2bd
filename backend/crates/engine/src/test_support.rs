use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use marketsync_common::error::MarketsyncResult;
use marketsync_db::accounts::models::{Account, AccountCredential};

use crate::credentials::{CredentialProvider, RefreshReport};
use crate::window::Window;
use crate::worker::{Worker, WorkerError, WorkerKind, WorkerOutput, WorkerPolicy};

pub(crate) enum Step {
    Ok(WorkerOutput),
    Err(WorkerError),
    Panic,
    Sleep(StdDuration, WorkerOutput),
}

/// Worker whose outcomes are scripted per call. Unscripted calls succeed
/// with `fetched = stored = 1`.
pub(crate) struct ScriptedWorker {
    family: String,
    policy: WorkerPolicy,
    steps: Mutex<VecDeque<Step>>,
    failing_accounts: Mutex<HashMap<String, WorkerError>>,
    panicking_accounts: Mutex<HashSet<String>>,
    pub(crate) calls: Arc<Mutex<Vec<(String, Window)>>>,
}

impl ScriptedWorker {
    pub(crate) fn windowed(family: &str) -> Self {
        Self::with_kind(
            family,
            WorkerKind::windowed(Duration::minutes(30), Duration::days(90)),
        )
    }

    pub(crate) fn snapshot(family: &str) -> Self {
        Self::with_kind(family, WorkerKind::Snapshot)
    }

    fn with_kind(family: &str, kind: WorkerKind) -> Self {
        Self {
            family: family.to_string(),
            policy: WorkerPolicy {
                kind,
                scheduled: true,
            },
            steps: Mutex::new(VecDeque::new()),
            failing_accounts: Mutex::new(HashMap::new()),
            panicking_accounts: Mutex::new(HashSet::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn manual_only(mut self) -> Self {
        self.policy.scheduled = false;
        self
    }

    pub(crate) fn then(self, step: Step) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    pub(crate) fn then_err(self, err: WorkerError) -> Self {
        self.then(Step::Err(err))
    }

    /// Every call for `external_ref` fails with `err`.
    pub(crate) fn failing_for(self, external_ref: &str, err: WorkerError) -> Self {
        self.failing_accounts
            .lock()
            .unwrap()
            .insert(external_ref.to_string(), err);
        self
    }

    /// Every call for `external_ref` panics.
    pub(crate) fn panicking_for(self, external_ref: &str) -> Self {
        self.panicking_accounts
            .lock()
            .unwrap()
            .insert(external_ref.to_string());
        self
    }

    pub(crate) fn windows(&self) -> Vec<Window> {
        self.calls.lock().unwrap().iter().map(|(_, w)| *w).collect()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn data_family(&self) -> &str {
        &self.family
    }

    fn policy(&self) -> WorkerPolicy {
        self.policy.clone()
    }

    async fn execute(
        &self,
        account: &Account,
        _credential: &AccountCredential,
        window: Window,
    ) -> Result<WorkerOutput, WorkerError> {
        self.calls
            .lock()
            .unwrap()
            .push((account.external_ref.clone(), window));

        let panics = self
            .panicking_accounts
            .lock()
            .unwrap()
            .contains(&account.external_ref);
        if panics {
            panic!("scripted panic for account {}", account.external_ref);
        }

        if let Some(err) = self
            .failing_accounts
            .lock()
            .unwrap()
            .get(&account.external_ref)
            .cloned()
        {
            return Err(err);
        }

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            None => Ok(WorkerOutput {
                fetched: 1,
                stored: 1,
                skipped: 0,
            }),
            Some(Step::Ok(out)) => Ok(out),
            Some(Step::Err(err)) => Err(err),
            Some(Step::Panic) => panic!("scripted worker panic"),
            Some(Step::Sleep(d, out)) => {
                tokio::time::sleep(d).await;
                Ok(out)
            }
        }
    }
}

/// Hands every account the same never-expiring token unless told otherwise.
#[derive(Default)]
pub(crate) struct StaticCredentials {
    denied: Mutex<HashMap<String, WorkerError>>,
    pub(crate) refreshes: Mutex<usize>,
}

impl StaticCredentials {
    pub(crate) fn deny(&self, external_ref: &str, err: WorkerError) {
        self.denied
            .lock()
            .unwrap()
            .insert(external_ref.to_string(), err);
    }

    pub(crate) fn allow(&self, external_ref: &str) {
        self.denied.lock().unwrap().remove(external_ref);
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn refresh_all(&self, accounts: &[Account]) -> MarketsyncResult<RefreshReport> {
        *self.refreshes.lock().unwrap() += 1;
        Ok(RefreshReport {
            valid: accounts.len(),
            ..RefreshReport::default()
        })
    }

    async fn credential(&self, account: &Account) -> Result<AccountCredential, WorkerError> {
        if let Some(err) = self.denied.lock().unwrap().get(&account.external_ref) {
            return Err(err.clone());
        }
        Ok(AccountCredential {
            account_id: account.id,
            access_token: "test-token".to_string(),
            expires_at: None,
            updated_at: Utc::now(),
        })
    }
}
