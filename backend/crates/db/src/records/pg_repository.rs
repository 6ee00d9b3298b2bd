use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::records::models::{dedupe_latest, MarketplaceRecord};
use crate::records::repositories::RecordRepository;
use marketsync_common::error::{MarketsyncError, MarketsyncResult};

/// Postgres limits a statement to 65535 bind parameters; six per row.
const UPSERT_CHUNK: usize = 1000;

#[derive(Clone)]
pub struct PgRecordRepository {
    pool: PgPool,
}

impl PgRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordRepository for PgRecordRepository {
    async fn upsert_many(&self, records: &[MarketplaceRecord]) -> MarketsyncResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        let unique = dedupe_latest(records);
        let mut written = 0u64;
        for chunk in unique.chunks(UPSERT_CHUNK) {
            let mut qb = QueryBuilder::<Postgres>::new(
                "insert into marketplace_records \
                 (account_id, data_family, natural_id, payload, source_updated_at, synced_at) ",
            );
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(r.account_id)
                    .push_bind(&r.data_family)
                    .push_bind(&r.natural_id)
                    .push_bind(&r.payload)
                    .push_bind(r.source_updated_at)
                    .push_bind(r.synced_at);
            });
            qb.push(
                " on conflict (account_id, data_family, natural_id) do update set \
                 payload = excluded.payload, \
                 source_updated_at = excluded.source_updated_at, \
                 synced_at = excluded.synced_at",
            );

            let result = qb
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| MarketsyncError::Database(e.to_string()))?;
            written += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        Ok(written)
    }

    async fn count(&self, account_id: Uuid, data_family: &str) -> MarketsyncResult<u64> {
        let row = sqlx::query(
            "select count(*) as n from marketplace_records
             where account_id = $1 and data_family = $2",
        )
        .bind(account_id)
        .bind(data_family)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        let n: i64 = row.get("n");
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::models::Account;
    use crate::accounts::pg_repository::PgAccountRepository;
    use crate::accounts::repositories::AccountRepository;
    use crate::{create_pool, run_migrations};
    use chrono::Utc;

    #[tokio::test]
    async fn repeated_upsert_keeps_one_row() {
        let url = match std::env::var("TEST_DATABASE_URL") {
            Ok(u) => u,
            Err(_) => return,
        };
        let pool = create_pool(&url, 2).await.expect("db should connect");
        run_migrations(&pool).await.expect("migrations should apply");

        let account = PgAccountRepository::new(pool.clone())
            .upsert(Account::new(&format!("seller-{}", Uuid::new_v4()), "Seller"))
            .await
            .expect("account");
        let repo = PgRecordRepository::new(pool);
        let record = MarketplaceRecord {
            account_id: account.id,
            data_family: "orders".to_string(),
            natural_id: "ORD-1".to_string(),
            payload: serde_json::json!({ "order_id": "ORD-1", "total": 10 }),
            source_updated_at: None,
            synced_at: Utc::now(),
        };

        repo.upsert_many(std::slice::from_ref(&record))
            .await
            .expect("first");
        repo.upsert_many(std::slice::from_ref(&record))
            .await
            .expect("second");

        assert_eq!(repo.count(account.id, "orders").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn repeated_natural_id_within_one_batch_is_written_once() {
        let url = match std::env::var("TEST_DATABASE_URL") {
            Ok(u) => u,
            Err(_) => return,
        };
        let pool = create_pool(&url, 2).await.expect("db should connect");
        run_migrations(&pool).await.expect("migrations should apply");

        let account = PgAccountRepository::new(pool.clone())
            .upsert(Account::new(&format!("seller-{}", Uuid::new_v4()), "Seller"))
            .await
            .expect("account");
        let repo = PgRecordRepository::new(pool.clone());
        let first = MarketplaceRecord {
            account_id: account.id,
            data_family: "orders".to_string(),
            natural_id: "ORD-7".to_string(),
            payload: serde_json::json!({ "order_id": "ORD-7", "total": 10 }),
            source_updated_at: None,
            synced_at: Utc::now(),
        };
        let mut later = first.clone();
        later.payload = serde_json::json!({ "order_id": "ORD-7", "total": 15 });

        let written = repo
            .upsert_many(&[first, later])
            .await
            .expect("batch with repeated id");

        assert_eq!(written, 1);
        assert_eq!(repo.count(account.id, "orders").await.expect("count"), 1);
        let total: serde_json::Value = sqlx::query(
            "select payload from marketplace_records
             where account_id = $1 and data_family = 'orders' and natural_id = 'ORD-7'",
        )
        .bind(account.id)
        .fetch_one(&pool)
        .await
        .expect("row")
        .get("payload");
        assert_eq!(total["total"], 15);
    }
}
