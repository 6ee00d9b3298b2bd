use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cursor label for windowed families: the cursor is the `window_to` of the
/// last successful run.
pub const CURSOR_KIND_MODIFIED_SINCE: &str = "modified_since";
/// Cursor label for snapshot families: the cursor only records when the
/// last full refresh finished.
pub const CURSOR_KIND_SNAPSHOT_AT: &str = "snapshot_at";

/// Per-(account, data family) progress cursor and enable flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub id: Uuid,
    pub account_id: Uuid,
    pub external_account_ref: String,
    pub data_family: String,
    pub enabled: bool,
    pub cursor_kind: String,
    pub cursor_value: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    /// Parsed cursor, or `None` when the cursor is absent or not a timestamp.
    pub fn cursor_timestamp(&self) -> Option<DateTime<Utc>> {
        self.cursor_value.as_deref().and_then(parse_cursor)
    }
}

/// Identifies the SyncState row a run belongs to, with the fields needed to
/// lazily create it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateKey {
    pub account_id: Uuid,
    pub external_account_ref: String,
    pub data_family: String,
    pub cursor_kind: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Error,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Structured outcome stored on every WorkerRun.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSummary {
    pub window_from: Option<DateTime<Utc>>,
    pub window_to: Option<DateTime<Utc>>,
    pub fetched_count: i64,
    pub stored_count: i64,
    pub skipped_count: i64,
    pub error_message: Option<String>,
}

impl RunSummary {
    pub fn for_window(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            window_from: Some(from),
            window_to: Some(to),
            ..Self::default()
        }
    }
}

/// One execution attempt for an (account, data family) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRun {
    pub id: Uuid,
    pub account_id: Uuid,
    pub data_family: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub heartbeat_at: DateTime<Utc>,
    pub summary: RunSummary,
}

impl WorkerRun {
    pub fn new_running(account_id: Uuid, data_family: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            data_family: data_family.to_string(),
            status: RunStatus::Running,
            started_at: now,
            finished_at: None,
            heartbeat_at: now,
            summary: RunSummary::default(),
        }
    }

    /// A running row only blocks new runs while its heartbeat is at or after `stale_before`.
    pub fn holds_lock(&self, stale_before: DateTime<Utc>) -> bool {
        self.status == RunStatus::Running && self.heartbeat_at >= stale_before
    }
}

/// Process-wide kill switch for starting new runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalSwitch {
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

/// Result of the locked check-and-insert performed when a run starts.
#[derive(Debug, Clone, PartialEq)]
pub enum TryStart {
    Started {
        run: WorkerRun,
        state: SyncState,
        /// Stale runs that were cancelled to let this one proceed.
        reclaimed: Vec<Uuid>,
    },
    FamilyDisabled,
    AlreadyRunning {
        run_id: Uuid,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateFilter {
    pub account_id: Option<Uuid>,
    pub data_family: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunFilter {
    pub account_id: Option<Uuid>,
    pub data_family: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl RunFilter {
    pub const DEFAULT_LIMIT: i64 = 100;
    pub const MAX_LIMIT: i64 = 1000;

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Error message recorded on runs reclaimed by the staleness policy.
pub const STALE_RUN_MESSAGE: &str = "heartbeat expired; run reclaimed";

pub fn format_cursor(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_cursor(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The cursor to persist after a successful run: never moves backwards.
///
/// An unparseable existing cursor is replaced by the candidate.
pub fn advance_cursor(current: Option<&str>, candidate: DateTime<Utc>) -> String {
    match current.and_then(parse_cursor) {
        Some(existing) if existing > candidate => format_cursor(existing),
        _ => format_cursor(candidate),
    }
}
