use async_trait::async_trait;
use uuid::Uuid;

use crate::accounts::models::{Account, AccountCredential};
use marketsync_common::error::MarketsyncResult;

/// Source of the accounts the engine synchronizes.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn list_active(&self) -> MarketsyncResult<Vec<Account>>;
    async fn get(&self, id: Uuid) -> MarketsyncResult<Option<Account>>;
    async fn upsert(&self, account: Account) -> MarketsyncResult<Account>;
}

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Credentials for the given accounts; accounts without a row are omitted.
    async fn list_for_accounts(&self, ids: &[Uuid]) -> MarketsyncResult<Vec<AccountCredential>>;
    async fn upsert(&self, credential: AccountCredential) -> MarketsyncResult<AccountCredential>;
}
