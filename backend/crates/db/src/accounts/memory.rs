use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::accounts::models::{Account, AccountCredential};
use crate::accounts::repositories::{AccountRepository, CredentialRepository};
use marketsync_common::error::MarketsyncResult;

#[derive(Debug, Clone, Default)]
pub struct MemoryAccountRepository {
    accounts: Arc<RwLock<Vec<Account>>>,
}

impl MemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for MemoryAccountRepository {
    async fn list_active(&self) -> MarketsyncResult<Vec<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.iter().filter(|a| a.active).cloned().collect())
    }

    async fn get(&self, id: Uuid) -> MarketsyncResult<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn upsert(&self, account: Account) -> MarketsyncResult<Account> {
        let mut accounts = self.accounts.write().await;
        match accounts
            .iter_mut()
            .find(|a| a.external_ref == account.external_ref)
        {
            Some(existing) => {
                existing.display_name = account.display_name;
                existing.active = account.active;
                existing.data_families = account.data_families;
                existing.updated_at = account.updated_at;
                Ok(existing.clone())
            }
            None => {
                accounts.push(account.clone());
                Ok(account)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialRepository {
    credentials: Arc<RwLock<HashMap<Uuid, AccountCredential>>>,
}

impl MemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn list_for_accounts(&self, ids: &[Uuid]) -> MarketsyncResult<Vec<AccountCredential>> {
        let credentials = self.credentials.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| credentials.get(id).cloned())
            .collect())
    }

    async fn upsert(&self, credential: AccountCredential) -> MarketsyncResult<AccountCredential> {
        let mut credentials = self.credentials.write().await;
        credentials.insert(credential.account_id, credential.clone());
        Ok(credential)
    }
}
