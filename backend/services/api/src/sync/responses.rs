use chrono::{DateTime, Utc};
use marketsync_db::sync::models::{RunStatus, RunSummary, SyncState, WorkerRun};
use marketsync_engine::worker::{recorded_code, ErrorCode};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub count: usize,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>) -> Self {
        let count = data.len();
        Self { data, count }
    }
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub id: Uuid,
    pub account_id: Uuid,
    pub external_account_ref: String,
    pub data_family: String,
    pub enabled: bool,
    pub cursor_kind: String,
    pub cursor_value: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// `auth_error` tells the operator to re-authorize the account.
    pub last_error_code: Option<ErrorCode>,
    pub updated_at: DateTime<Utc>,
}

impl From<SyncState> for StateResponse {
    fn from(s: SyncState) -> Self {
        Self {
            last_error_code: s.last_error.as_deref().and_then(recorded_code),
            id: s.id,
            account_id: s.account_id,
            external_account_ref: s.external_account_ref,
            data_family: s.data_family,
            enabled: s.enabled,
            cursor_kind: s.cursor_kind,
            cursor_value: s.cursor_value,
            last_run_at: s.last_run_at,
            last_error: s.last_error,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub id: Uuid,
    pub account_id: Uuid,
    pub data_family: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub heartbeat_at: DateTime<Utc>,
    pub summary: RunSummary,
    pub error_code: Option<ErrorCode>,
}

impl From<WorkerRun> for RunResponse {
    fn from(r: WorkerRun) -> Self {
        Self {
            error_code: r.summary.error_message.as_deref().and_then(recorded_code),
            id: r.id,
            account_id: r.account_id,
            data_family: r.data_family,
            status: r.status,
            started_at: r.started_at,
            finished_at: r.finished_at,
            heartbeat_at: r.heartbeat_at,
            summary: r.summary,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FamiliesResponse {
    pub families: Vec<String>,
}
