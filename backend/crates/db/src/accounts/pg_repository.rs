use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::accounts::models::{Account, AccountCredential};
use crate::accounts::repositories::{AccountRepository, CredentialRepository};
use marketsync_common::error::{MarketsyncError, MarketsyncResult};

#[derive(Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Account {
        Account {
            id: row.get("id"),
            external_ref: row.get("external_ref"),
            display_name: row.get("display_name"),
            active: row.get("active"),
            data_families: row.get("data_families"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn list_active(&self) -> MarketsyncResult<Vec<Account>> {
        let rows = sqlx::query(
            "select id, external_ref, display_name, active, data_families, created_at, updated_at
             from accounts
             where active
             order by created_at, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        Ok(rows.iter().map(Self::map_row).collect())
    }

    async fn get(&self, id: Uuid) -> MarketsyncResult<Option<Account>> {
        let row = sqlx::query(
            "select id, external_ref, display_name, active, data_families, created_at, updated_at
             from accounts
             where id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        Ok(row.as_ref().map(Self::map_row))
    }

    async fn upsert(&self, account: Account) -> MarketsyncResult<Account> {
        let row = sqlx::query(
            "insert into accounts (id, external_ref, display_name, active, data_families, created_at, updated_at)
             values ($1, $2, $3, $4, $5, $6, $7)
             on conflict (external_ref) do update set
               display_name = excluded.display_name,
               active = excluded.active,
               data_families = excluded.data_families,
               updated_at = excluded.updated_at
             returning id, external_ref, display_name, active, data_families, created_at, updated_at",
        )
        .bind(account.id)
        .bind(&account.external_ref)
        .bind(&account.display_name)
        .bind(account.active)
        .bind(&account.data_families)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        Ok(Self::map_row(&row))
    }
}

#[derive(Clone)]
pub struct PgCredentialRepository {
    pool: PgPool,
}

impl PgCredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> AccountCredential {
        AccountCredential {
            account_id: row.get("account_id"),
            access_token: row.get("access_token"),
            expires_at: row.get("expires_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl CredentialRepository for PgCredentialRepository {
    async fn list_for_accounts(&self, ids: &[Uuid]) -> MarketsyncResult<Vec<AccountCredential>> {
        let rows = sqlx::query(
            "select account_id, access_token, expires_at, updated_at
             from account_credentials
             where account_id = any($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        Ok(rows.iter().map(Self::map_row).collect())
    }

    async fn upsert(&self, credential: AccountCredential) -> MarketsyncResult<AccountCredential> {
        let row = sqlx::query(
            "insert into account_credentials (account_id, access_token, expires_at, updated_at)
             values ($1, $2, $3, $4)
             on conflict (account_id) do update set
               access_token = excluded.access_token,
               expires_at = excluded.expires_at,
               updated_at = excluded.updated_at
             returning account_id, access_token, expires_at, updated_at",
        )
        .bind(credential.account_id)
        .bind(&credential.access_token)
        .bind(credential.expires_at)
        .bind(credential.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        Ok(Self::map_row(&row))
    }
}
