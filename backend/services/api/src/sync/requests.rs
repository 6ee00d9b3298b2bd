use marketsync_common::error::MarketsyncError;
use marketsync_db::sync::models::{RunFilter, RunStatus, StateFilter};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatesQuery {
    pub account_id: Option<Uuid>,
    pub data_family: Option<String>,
}

impl From<StatesQuery> for StateFilter {
    fn from(q: StatesQuery) -> Self {
        StateFilter {
            account_id: q.account_id,
            data_family: q.data_family,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RunsQuery {
    pub account_id: Option<Uuid>,
    pub data_family: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TryFrom<RunsQuery> for RunFilter {
    type Error = MarketsyncError;

    fn try_from(q: RunsQuery) -> Result<Self, Self::Error> {
        let status = q
            .status
            .as_deref()
            .map(str::parse::<RunStatus>)
            .transpose()
            .map_err(MarketsyncError::Validation)?;
        Ok(RunFilter {
            account_id: q.account_id,
            data_family: q.data_family,
            status,
            limit: q.limit,
            offset: q.offset,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ScheduleQuery {
    pub cycles: Option<usize>,
}
