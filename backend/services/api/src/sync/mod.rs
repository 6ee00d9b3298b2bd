pub mod handlers;
pub mod requests;
pub mod responses;

use axum::routing::{get, post, put};
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sync/states", get(handlers::list_states))
        .route("/sync/runs", get(handlers::list_runs))
        .route("/sync/runs/{run_id}", get(handlers::get_run))
        .route(
            "/sync/accounts/{account_id}/families/{family}/enabled",
            put(handlers::set_family_enabled),
        )
        .route(
            "/sync/accounts/{account_id}/families/{family}/trigger",
            post(handlers::trigger),
        )
        .route(
            "/sync/switch",
            get(handlers::get_switch).put(handlers::set_switch),
        )
        .route("/sync/schedule", get(handlers::schedule))
        .route("/sync/families", get(handlers::list_families))
}
