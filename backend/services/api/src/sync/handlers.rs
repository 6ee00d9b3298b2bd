use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use marketsync_db::sync::models::{GlobalSwitch, RunFilter};
use marketsync_engine::runner::RunReport;
use marketsync_engine::schedule::ProjectedRun;
use uuid::Uuid;

use crate::error::ApiError;
use crate::sync::requests::{RunsQuery, ScheduleQuery, StatesQuery, ToggleRequest};
use crate::sync::responses::{FamiliesResponse, ListResponse, RunResponse, StateResponse};
use crate::AppState;

const DEFAULT_SCHEDULE_CYCLES: usize = 3;

pub async fn list_states(
    State(state): State<AppState>,
    Query(query): Query<StatesQuery>,
) -> Result<Json<ListResponse<StateResponse>>, ApiError> {
    let states = state.admin.list_states(query.into()).await?;
    Ok(Json(ListResponse::new(
        states.into_iter().map(StateResponse::from).collect(),
    )))
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<ListResponse<RunResponse>>, ApiError> {
    let filter = RunFilter::try_from(query)?;
    let runs = state.admin.list_runs(filter).await?;
    Ok(Json(ListResponse::new(
        runs.into_iter().map(RunResponse::from).collect(),
    )))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunResponse>, ApiError> {
    let run = state.admin.get_run(run_id).await?;
    Ok(Json(run.into()))
}

pub async fn set_family_enabled(
    State(state): State<AppState>,
    Path((account_id, family)): Path<(Uuid, String)>,
    Json(body): Json<ToggleRequest>,
) -> Result<Json<StateResponse>, ApiError> {
    let updated = state
        .admin
        .set_family_enabled(account_id, &family, body.enabled)
        .await?;
    Ok(Json(updated.into()))
}

pub async fn get_switch(State(state): State<AppState>) -> Result<Json<GlobalSwitch>, ApiError> {
    Ok(Json(state.admin.global_switch().await?))
}

pub async fn set_switch(
    State(state): State<AppState>,
    Json(body): Json<ToggleRequest>,
) -> Result<Json<GlobalSwitch>, ApiError> {
    Ok(Json(state.admin.set_global_switch(body.enabled).await?))
}

/// Runs the pair inline. A skipped run answers 409 with the skip reason.
pub async fn trigger(
    State(state): State<AppState>,
    Path((account_id, family)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    let report = state.admin.trigger(account_id, &family).await?;
    let status = match report {
        RunReport::Skipped { .. } => StatusCode::CONFLICT,
        RunReport::Completed { .. } | RunReport::Failed { .. } => StatusCode::OK,
    };
    Ok((status, Json(report)).into_response())
}

pub async fn schedule(
    State(state): State<AppState>,
    Query(query): Query<ScheduleQuery>,
) -> Result<Json<ListResponse<ProjectedRun>>, ApiError> {
    let cycles = query.cycles.unwrap_or(DEFAULT_SCHEDULE_CYCLES);
    let runs = state.admin.projected_schedule(cycles).await?;
    Ok(Json(ListResponse::new(runs)))
}

pub async fn list_families(State(state): State<AppState>) -> Json<FamiliesResponse> {
    Json(FamiliesResponse {
        families: state.admin.families(),
    })
}
