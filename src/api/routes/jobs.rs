//! Outcomes of uploaded recordings.

use crate::api::ApiState;
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};

pub fn router(state: ApiState) -> Router {
    Router::new().route("/jobs", get(list_jobs)).with_state(state)
}

async fn list_jobs(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "polling": state.uploads.active_polls(),
        "recent": state.uploads.recent_outcomes(),
    }))
}
