//! Session control endpoints.
//!
//! Provides HTTP endpoints for:
//! - Reading the session (GET /session)
//! - Toggling recording (POST /toggle)
//! - Taking a screenshot of the meeting tab (POST /screenshot)
//! - Updating settings (PUT /config)

use crate::api::error::{ApiError, ApiResult};
use crate::api::ApiState;
use crate::config::ConfigPatch;
use crate::messaging::{Message, Origin, Reply};
use crate::tabs::TabId;
use axum::{
    extract::State,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

/// Optional body of `POST /toggle`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRequest {
    /// Tab to start on; defaults to the most recent meeting tab.
    #[serde(default)]
    pub tab_id: Option<TabId>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/session", get(session_state))
        .route("/toggle", post(toggle_recording))
        .route("/screenshot", post(take_screenshot))
        .route("/config", put(update_config))
        .with_state(state)
}

async fn session_state(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    match state.ask(Message::GetState, Origin::extension()).await? {
        Reply::State(snapshot) => Ok(Json(json!(snapshot))),
        other => Err(unexpected(other)),
    }
}

async fn toggle_recording(
    State(state): State<ApiState>,
    body: Option<Json<ToggleRequest>>,
) -> ApiResult<Json<Value>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    info!("Toggle received via API (tab: {:?})", request.tab_id);

    let origin = match request.tab_id {
        Some(tab) => Origin::tab(tab),
        None => Origin::extension(),
    };
    match state.ask(Message::ToggleRecording, origin).await? {
        Reply::Recording(recording) => Ok(Json(json!({
            "success": true,
            "recording": recording,
        }))),
        other => Err(unexpected(other)),
    }
}

async fn take_screenshot(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    match state.ask(Message::TakeScreenshot, Origin::extension()).await? {
        Reply::ScreenshotCount(count) => Ok(Json(json!({
            "success": true,
            "screenshotCount": count,
        }))),
        other => Err(unexpected(other)),
    }
}

async fn update_config(
    State(state): State<ApiState>,
    Json(patch): Json<ConfigPatch>,
) -> ApiResult<Json<Value>> {
    if patch.is_empty() {
        return Err(ApiError::bad_request("No settings to update"));
    }
    match state
        .ask(Message::UpdateConfig(patch), Origin::extension())
        .await?
    {
        Reply::ConfigUpdated => Ok(Json(json!({ "success": true }))),
        other => Err(unexpected(other)),
    }
}

fn unexpected(reply: Reply) -> ApiError {
    ApiError::internal(format!("Unexpected reply from background: {:?}", reply))
}
