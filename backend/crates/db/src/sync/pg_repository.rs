use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;

use crate::sync::models::{
    advance_cursor, GlobalSwitch, RunFilter, RunStatus, RunSummary, StateFilter, StateKey,
    SyncState, TryStart, WorkerRun, STALE_RUN_MESSAGE,
};
use crate::sync::repositories::SyncRepository;
use marketsync_common::error::{MarketsyncError, MarketsyncResult};

const STATE_COLUMNS: &str = "id, account_id, external_account_ref, data_family, enabled, \
     cursor_kind, cursor_value, last_run_at, last_error, created_at, updated_at";

const RUN_COLUMNS: &str =
    "id, account_id, data_family, status, started_at, finished_at, heartbeat_at, summary";

#[derive(Clone)]
pub struct PgSyncRepository {
    pool: PgPool,
}

impl PgSyncRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_state_row(row: &PgRow) -> SyncState {
        SyncState {
            id: row.get("id"),
            account_id: row.get("account_id"),
            external_account_ref: row.get("external_account_ref"),
            data_family: row.get("data_family"),
            enabled: row.get("enabled"),
            cursor_kind: row.get("cursor_kind"),
            cursor_value: row.get("cursor_value"),
            last_run_at: row.get("last_run_at"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn map_run_row(row: &PgRow) -> MarketsyncResult<WorkerRun> {
        let status: String = row.get("status");
        let summary: Json<RunSummary> = row.get("summary");
        Ok(WorkerRun {
            id: row.get("id"),
            account_id: row.get("account_id"),
            data_family: row.get("data_family"),
            status: status.parse().map_err(MarketsyncError::Database)?,
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            heartbeat_at: row.get("heartbeat_at"),
            summary: summary.0,
        })
    }

    async fn begin(&self) -> MarketsyncResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))
    }

    /// Flip a running run to a terminal status. Returns the owning pair, or
    /// `Conflict` if the run is missing or already terminal.
    async fn finish_run_row(
        tx: &mut Transaction<'static, Postgres>,
        run_id: Uuid,
        status: RunStatus,
        summary: &RunSummary,
        now: DateTime<Utc>,
    ) -> MarketsyncResult<(Uuid, String)> {
        let row = sqlx::query(
            "update worker_runs
             set status = $1, finished_at = $2, heartbeat_at = $2, summary = $3
             where id = $4 and status = 'running'
             returning account_id, data_family",
        )
        .bind(status.as_str())
        .bind(now)
        .bind(Json(summary))
        .bind(run_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok((r.get("account_id"), r.get("data_family"))),
            None => Err(MarketsyncError::Conflict(format!(
                "run {run_id} is not running"
            ))),
        }
    }
}

#[async_trait]
impl SyncRepository for PgSyncRepository {
    async fn global_switch(&self) -> MarketsyncResult<GlobalSwitch> {
        let row = sqlx::query("select enabled, updated_at from global_switch where id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        // A missing singleton row means the migration seed was skipped; treat as enabled.
        Ok(match row {
            Some(r) => GlobalSwitch {
                enabled: r.get("enabled"),
                updated_at: r.get("updated_at"),
            },
            None => GlobalSwitch {
                enabled: true,
                updated_at: Utc::now(),
            },
        })
    }

    async fn set_global_switch(&self, enabled: bool) -> MarketsyncResult<GlobalSwitch> {
        let row = sqlx::query(
            "insert into global_switch (id, enabled, updated_at)
             values (1, $1, $2)
             on conflict (id) do update set enabled = excluded.enabled, updated_at = excluded.updated_at
             returning enabled, updated_at",
        )
        .bind(enabled)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        Ok(GlobalSwitch {
            enabled: row.get("enabled"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn ensure_state(&self, key: &StateKey) -> MarketsyncResult<SyncState> {
        // `do update` on a no-op column so `returning` yields the existing row too.
        let sql = format!(
            "insert into sync_states (id, account_id, external_account_ref, data_family, cursor_kind)
             values ($1, $2, $3, $4, $5)
             on conflict (account_id, data_family)
             do update set external_account_ref = excluded.external_account_ref
             returning {STATE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(key.account_id)
            .bind(&key.external_account_ref)
            .bind(&key.data_family)
            .bind(&key.cursor_kind)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        Ok(Self::map_state_row(&row))
    }

    async fn get_state(
        &self,
        account_id: Uuid,
        data_family: &str,
    ) -> MarketsyncResult<Option<SyncState>> {
        let sql = format!(
            "select {STATE_COLUMNS} from sync_states where account_id = $1 and data_family = $2"
        );
        let row = sqlx::query(&sql)
            .bind(account_id)
            .bind(data_family)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        Ok(row.as_ref().map(Self::map_state_row))
    }

    async fn list_states(&self, filter: StateFilter) -> MarketsyncResult<Vec<SyncState>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "select {STATE_COLUMNS} from sync_states where true"
        ));
        if let Some(account_id) = filter.account_id {
            qb.push(" and account_id = ").push_bind(account_id);
        }
        if let Some(family) = filter.data_family {
            qb.push(" and data_family = ").push_bind(family);
        }
        qb.push(" order by account_id, data_family");

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        Ok(rows.iter().map(Self::map_state_row).collect())
    }

    async fn set_family_enabled(
        &self,
        account_id: Uuid,
        data_family: &str,
        enabled: bool,
    ) -> MarketsyncResult<SyncState> {
        let sql = format!(
            "update sync_states set enabled = $1, updated_at = $2
             where account_id = $3 and data_family = $4
             returning {STATE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(enabled)
            .bind(Utc::now())
            .bind(account_id)
            .bind(data_family)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        row.as_ref().map(Self::map_state_row).ok_or_else(|| {
            MarketsyncError::NotFound(format!(
                "sync state for account {account_id} / {data_family}"
            ))
        })
    }

    async fn try_start_run(
        &self,
        account_id: Uuid,
        data_family: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> MarketsyncResult<TryStart> {
        let mut tx = self.begin().await?;

        // Row lock on the pair serializes concurrent starts.
        let lock_sql = format!(
            "select {STATE_COLUMNS} from sync_states
             where account_id = $1 and data_family = $2
             for update"
        );
        let state_row = sqlx::query(&lock_sql)
            .bind(account_id)
            .bind(data_family)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?
            .ok_or_else(|| {
                MarketsyncError::NotFound(format!(
                    "sync state for account {account_id} / {data_family}"
                ))
            })?;
        let state = Self::map_state_row(&state_row);

        if !state.enabled {
            return Ok(TryStart::FamilyDisabled);
        }

        let running = sqlx::query(
            "select id, heartbeat_at from worker_runs
             where account_id = $1 and data_family = $2 and status = 'running'
             order by heartbeat_at desc",
        )
        .bind(account_id)
        .bind(data_family)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        let mut stale: Vec<Uuid> = Vec::new();
        for row in &running {
            let id: Uuid = row.get("id");
            let heartbeat_at: DateTime<Utc> = row.get("heartbeat_at");
            if heartbeat_at >= stale_before {
                return Ok(TryStart::AlreadyRunning { run_id: id });
            }
            stale.push(id);
        }

        if !stale.is_empty() {
            sqlx::query(
                "update worker_runs
                 set status = 'cancelled', finished_at = $1,
                     summary = jsonb_set(summary, '{error_message}', to_jsonb($2::text))
                 where id = any($3)",
            )
            .bind(now)
            .bind(STALE_RUN_MESSAGE)
            .bind(&stale)
            .execute(&mut *tx)
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;
        }

        let run = WorkerRun::new_running(account_id, data_family, now);
        let insert_sql = format!(
            "insert into worker_runs (id, account_id, data_family, status, started_at, heartbeat_at, summary)
             values ($1, $2, $3, 'running', $4, $4, $5)
             returning {RUN_COLUMNS}"
        );
        let run_row = sqlx::query(&insert_sql)
            .bind(run.id)
            .bind(account_id)
            .bind(data_family)
            .bind(now)
            .bind(Json(&run.summary))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;
        let run = Self::map_run_row(&run_row)?;

        tx.commit()
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        Ok(TryStart::Started {
            run,
            state,
            reclaimed: stale,
        })
    }

    async fn heartbeat_run(&self, run_id: Uuid, now: DateTime<Utc>) -> MarketsyncResult<()> {
        let result = sqlx::query(
            "update worker_runs set heartbeat_at = $1 where id = $2 and status = 'running'",
        )
        .bind(now)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(MarketsyncError::Conflict(format!(
                "run {run_id} is not running"
            )));
        }
        Ok(())
    }

    async fn complete_run(
        &self,
        run_id: Uuid,
        summary: &RunSummary,
        cursor_to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> MarketsyncResult<SyncState> {
        let mut tx = self.begin().await?;

        let (account_id, data_family) =
            Self::finish_run_row(&mut tx, run_id, RunStatus::Completed, summary, now).await?;

        let current: Option<String> = sqlx::query(
            "select cursor_value from sync_states
             where account_id = $1 and data_family = $2
             for update",
        )
        .bind(account_id)
        .bind(&data_family)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| MarketsyncError::Database(e.to_string()))?
        .get("cursor_value");

        let next_cursor = advance_cursor(current.as_deref(), cursor_to);

        let sql = format!(
            "update sync_states
             set cursor_value = $1, last_run_at = $2, last_error = null, updated_at = $2
             where account_id = $3 and data_family = $4
             returning {STATE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&next_cursor)
            .bind(now)
            .bind(account_id)
            .bind(&data_family)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        Ok(Self::map_state_row(&row))
    }

    async fn fail_run(
        &self,
        run_id: Uuid,
        summary: &RunSummary,
        now: DateTime<Utc>,
    ) -> MarketsyncResult<SyncState> {
        let mut tx = self.begin().await?;

        let (account_id, data_family) =
            Self::finish_run_row(&mut tx, run_id, RunStatus::Error, summary, now).await?;

        let sql = format!(
            "update sync_states
             set last_error = $1, last_run_at = $2, updated_at = $2
             where account_id = $3 and data_family = $4
             returning {STATE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(summary.error_message.as_deref())
            .bind(now)
            .bind(account_id)
            .bind(&data_family)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        Ok(Self::map_state_row(&row))
    }

    async fn get_run(&self, run_id: Uuid) -> MarketsyncResult<Option<WorkerRun>> {
        let sql = format!("select {RUN_COLUMNS} from worker_runs where id = $1");
        let row = sqlx::query(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        row.as_ref().map(Self::map_run_row).transpose()
    }

    async fn list_runs(&self, filter: RunFilter) -> MarketsyncResult<Vec<WorkerRun>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "select {RUN_COLUMNS} from worker_runs where true"
        ));
        if let Some(account_id) = filter.account_id {
            qb.push(" and account_id = ").push_bind(account_id);
        }
        if let Some(family) = filter.data_family.clone() {
            qb.push(" and data_family = ").push_bind(family);
        }
        if let Some(status) = filter.status {
            qb.push(" and status = ").push_bind(status.as_str());
        }
        qb.push(" order by started_at desc, id");
        qb.push(" limit ").push_bind(filter.effective_limit());
        qb.push(" offset ").push_bind(filter.effective_offset());

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MarketsyncError::Database(e.to_string()))?;

        rows.iter().map(Self::map_run_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::models::{parse_cursor, CURSOR_KIND_MODIFIED_SINCE};
    use crate::{create_pool, run_migrations};
    use chrono::Duration;

    async fn test_repo() -> Option<(PgSyncRepository, PgPool)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url, 2).await.expect("db should connect");
        run_migrations(&pool).await.expect("migrations should apply");
        Some((PgSyncRepository::new(pool.clone()), pool))
    }

    async fn insert_account(pool: &PgPool) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "insert into accounts (id, external_ref, display_name) values ($1, $2, 'test-seller')",
        )
        .bind(id)
        .bind(format!("seller-{id}"))
        .execute(pool)
        .await
        .expect("insert account");
        id
    }

    fn key(account_id: Uuid) -> StateKey {
        StateKey {
            account_id,
            external_account_ref: format!("seller-{account_id}"),
            data_family: "orders".to_string(),
            cursor_kind: CURSOR_KIND_MODIFIED_SINCE.to_string(),
        }
    }

    #[tokio::test]
    async fn ensure_state_is_idempotent() {
        let (repo, pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let account = insert_account(&pool).await;
        let first = repo.ensure_state(&key(account)).await.expect("create");
        let second = repo.ensure_state(&key(account)).await.expect("existing");
        assert_eq!(first.id, second.id);
        assert!(first.enabled);
        assert!(first.cursor_value.is_none());
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_first_is_fresh() {
        let (repo, pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let account = insert_account(&pool).await;
        repo.ensure_state(&key(account)).await.expect("create");
        let now = Utc::now();
        let stale_before = now - Duration::minutes(10);

        let first = repo
            .try_start_run(account, "orders", now, stale_before)
            .await
            .expect("first start");
        assert!(matches!(first, TryStart::Started { .. }));

        let second = repo
            .try_start_run(account, "orders", now, stale_before)
            .await
            .expect("second start");
        assert!(matches!(second, TryStart::AlreadyRunning { .. }));
    }

    #[tokio::test]
    async fn stale_run_is_cancelled_and_replaced() {
        let (repo, pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let account = insert_account(&pool).await;
        repo.ensure_state(&key(account)).await.expect("create");
        let long_ago = Utc::now() - Duration::hours(1);

        let old = match repo
            .try_start_run(account, "orders", long_ago, long_ago - Duration::minutes(10))
            .await
            .expect("old start")
        {
            TryStart::Started { run, .. } => run,
            other => panic!("expected start, got {other:?}"),
        };

        let now = Utc::now();
        let outcome = repo
            .try_start_run(account, "orders", now, now - Duration::minutes(10))
            .await
            .expect("reclaiming start");
        match outcome {
            TryStart::Started { reclaimed, .. } => assert_eq!(reclaimed, vec![old.id]),
            other => panic!("expected start, got {other:?}"),
        }

        let old = repo.get_run(old.id).await.expect("get").expect("exists");
        assert_eq!(old.status, RunStatus::Cancelled);
        assert_eq!(old.summary.error_message.as_deref(), Some(STALE_RUN_MESSAGE));
    }

    #[tokio::test]
    async fn complete_advances_cursor_and_fail_keeps_it() {
        let (repo, pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let account = insert_account(&pool).await;
        repo.ensure_state(&key(account)).await.expect("create");
        let now = Utc::now();
        let stale_before = now - Duration::minutes(10);

        let run = match repo
            .try_start_run(account, "orders", now, stale_before)
            .await
            .expect("start")
        {
            TryStart::Started { run, .. } => run,
            other => panic!("expected start, got {other:?}"),
        };
        let summary = RunSummary::for_window(now - Duration::days(1), now);
        let state = repo
            .complete_run(run.id, &summary, now, now)
            .await
            .expect("complete");
        let cursor = state.cursor_timestamp().expect("cursor set");
        assert_eq!(cursor.timestamp_micros(), now.timestamp_micros());

        let later = now + Duration::minutes(5);
        let run = match repo
            .try_start_run(account, "orders", later, later - Duration::minutes(10))
            .await
            .expect("start")
        {
            TryStart::Started { run, .. } => run,
            other => panic!("expected start, got {other:?}"),
        };
        let failed = RunSummary {
            error_message: Some("[transient_upstream] 503".to_string()),
            ..RunSummary::for_window(now, later)
        };
        let state = repo.fail_run(run.id, &failed, later).await.expect("fail");
        assert_eq!(
            state.cursor_value.as_deref().and_then(parse_cursor),
            Some(cursor)
        );
        assert_eq!(state.last_error.as_deref(), Some("[transient_upstream] 503"));

        let again = repo.fail_run(run.id, &failed, later).await;
        assert!(matches!(again, Err(MarketsyncError::Conflict(_))));
    }
}
