use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use marketsync_common::error::MarketsyncResult;
use marketsync_db::accounts::models::{Account, AccountCredential};
use marketsync_db::accounts::repositories::CredentialRepository;

use crate::worker::WorkerError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub valid: usize,
    pub expired: usize,
    pub missing: usize,
}

/// Supplies upstream access credentials per account.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Runs before every background cycle so workers see fresh credentials.
    async fn refresh_all(&self, accounts: &[Account]) -> MarketsyncResult<RefreshReport>;

    /// A currently valid credential, or `WorkerError::Auth`.
    async fn credential(&self, account: &Account) -> Result<AccountCredential, WorkerError>;
}

/// Serves tokens maintained in `account_credentials` by the external
/// authorization flow, caching them between refreshes.
pub struct StoredCredentialProvider {
    repo: Arc<dyn CredentialRepository>,
    cache: RwLock<HashMap<Uuid, AccountCredential>>,
}

impl StoredCredentialProvider {
    pub fn new(repo: Arc<dyn CredentialRepository>) -> Self {
        Self {
            repo,
            cache: RwLock::new(HashMap::new()),
        }
    }

    async fn load_one(&self, account_id: Uuid) -> Result<Option<AccountCredential>, WorkerError> {
        let found = self
            .repo
            .list_for_accounts(&[account_id])
            .await
            .map_err(|e| WorkerError::Transient(format!("credential lookup failed: {e}")))?;
        Ok(found.into_iter().next())
    }
}

#[async_trait]
impl CredentialProvider for StoredCredentialProvider {
    async fn refresh_all(&self, accounts: &[Account]) -> MarketsyncResult<RefreshReport> {
        let ids: Vec<Uuid> = accounts.iter().map(|a| a.id).collect();
        let loaded = self.repo.list_for_accounts(&ids).await?;
        let now = Utc::now();

        let mut report = RefreshReport::default();
        let mut fresh = HashMap::with_capacity(loaded.len());
        for cred in loaded {
            if cred.is_valid_at(now) {
                report.valid += 1;
            } else {
                tracing::warn!(account_id = %cred.account_id, "account credential expired");
                report.expired += 1;
            }
            fresh.insert(cred.account_id, cred);
        }
        for account in accounts {
            if !fresh.contains_key(&account.id) {
                tracing::warn!(account_id = %account.id, "account has no stored credential");
                report.missing += 1;
            }
        }

        *self.cache.write().await = fresh;
        tracing::info!(
            valid = report.valid,
            expired = report.expired,
            missing = report.missing,
            "credentials refreshed"
        );
        Ok(report)
    }

    async fn credential(&self, account: &Account) -> Result<AccountCredential, WorkerError> {
        let now = Utc::now();
        let cached = self.cache.read().await.get(&account.id).cloned();
        if let Some(cred) = cached.filter(|c| c.is_valid_at(now)) {
            return Ok(cred);
        }

        // Cache miss or expired entry: the token may have been re-issued since the last refresh.
        match self.load_one(account.id).await? {
            Some(cred) if cred.is_valid_at(now) => {
                self.cache.write().await.insert(account.id, cred.clone());
                Ok(cred)
            }
            Some(_) => Err(WorkerError::Auth(format!(
                "credential for account {} has expired",
                account.external_ref
            ))),
            None => Err(WorkerError::Auth(format!(
                "no credential stored for account {}",
                account.external_ref
            ))),
        }
    }
}
