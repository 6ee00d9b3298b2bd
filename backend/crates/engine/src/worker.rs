use async_trait::async_trait;
use chrono::Duration;
use serde::Serialize;

use marketsync_db::accounts::models::{Account, AccountCredential};
use marketsync_db::sync::models::{CURSOR_KIND_MODIFIED_SINCE, CURSOR_KIND_SNAPSHOT_AT};

use crate::window::Window;

/// How a family relates to time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerKind {
    /// Incremental: fetches `[cursor - overlap, now)`.
    Windowed {
        overlap: Duration,
        initial_lookback: Duration,
    },
    /// Full refresh every run; the cursor only records the last snapshot time.
    Snapshot,
}

impl WorkerKind {
    pub fn windowed(overlap: Duration, initial_lookback: Duration) -> Self {
        Self::Windowed {
            overlap,
            initial_lookback,
        }
    }

    pub fn cursor_kind(&self) -> &'static str {
        match self {
            Self::Windowed { .. } => CURSOR_KIND_MODIFIED_SINCE,
            Self::Snapshot => CURSOR_KIND_SNAPSHOT_AT,
        }
    }
}

/// Static policy a worker declares to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPolicy {
    pub kind: WorkerKind,
    /// `false` means the family only runs through the manual trigger.
    pub scheduled: bool,
}

/// Counts reported by a successful execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerOutput {
    pub fetched: u64,
    pub stored: u64,
    /// Malformed records the worker chose to drop.
    pub skipped: u64,
}

/// Stable code attached to a failure so the admin layer can react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    TransientUpstream,
    AuthError,
    Unexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientUpstream => "transient_upstream",
            Self::AuthError => "auth_error",
            Self::Unexpected => "unexpected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    /// Network timeout, 5xx or rate limiting; retried on the next cycle.
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// Expired or invalid credential; the operator must re-authorize.
    #[error("authorization error: {0}")]
    Auth(String),

    #[error("unexpected worker error: {0}")]
    Unexpected(String),
}

impl WorkerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Transient(_) => ErrorCode::TransientUpstream,
            Self::Auth(_) => ErrorCode::AuthError,
            Self::Unexpected(_) => ErrorCode::Unexpected,
        }
    }

    /// Text stored in `last_error` and `summary.error_message`.
    pub fn recorded_message(&self) -> String {
        let detail = match self {
            Self::Transient(m) | Self::Auth(m) | Self::Unexpected(m) => m,
        };
        format!("[{}] {}", self.code().as_str(), detail)
    }
}

/// Extract the error code from a recorded message, if it carries one.
pub fn recorded_code(message: &str) -> Option<ErrorCode> {
    let code = message.strip_prefix('[')?.split(']').next()?;
    match code {
        "transient_upstream" => Some(ErrorCode::TransientUpstream),
        "auth_error" => Some(ErrorCode::AuthError),
        "unexpected" => Some(ErrorCode::Unexpected),
        _ => None,
    }
}

/// A data-family integration: fetch a window upstream and idempotently
/// upsert it locally, keyed by the family's natural identifier.
///
/// Repeated calls over overlapping windows must not duplicate records.
#[async_trait]
pub trait Worker: Send + Sync {
    fn data_family(&self) -> &str;

    fn policy(&self) -> WorkerPolicy;

    async fn execute(
        &self,
        account: &Account,
        credential: &AccountCredential,
        window: Window,
    ) -> Result<WorkerOutput, WorkerError>;
}
