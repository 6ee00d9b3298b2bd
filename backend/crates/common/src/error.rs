use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketsyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    /// The targeted row is no longer in the state the caller expected
    /// (e.g. finishing a run that was reclaimed as stale).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type MarketsyncResult<T> = Result<T, MarketsyncError>;
