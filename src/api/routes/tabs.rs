//! Tab reports from the browser shim.

use crate::api::error::{ApiError, ApiResult};
use crate::api::ApiState;
use crate::tabs::{CaptureTarget, TabId, TabInfo};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct TabReport {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub capture_target: Option<String>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/tabs", get(list_tabs))
        .route("/tabs/:id", put(update_tab).delete(close_tab))
        .with_state(state)
}

async fn list_tabs(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "tabs": state.tabs.list().await }))
}

async fn update_tab(
    State(state): State<ApiState>,
    Path(id): Path<TabId>,
    Json(report): Json<TabReport>,
) -> ApiResult<StatusCode> {
    let url = report.url.trim();
    if url.is_empty() {
        return Err(ApiError::bad_request("Tab URL is required"));
    }

    state
        .tabs
        .update(TabInfo {
            id,
            url: url.to_string(),
            title: report.title.filter(|t| !t.trim().is_empty()),
            capture_target: report
                .capture_target
                .filter(|t| !t.trim().is_empty())
                .map(CaptureTarget),
        })
        .await;
    Ok(StatusCode::NO_CONTENT)
}

async fn close_tab(State(state): State<ApiState>, Path(id): Path<TabId>) -> StatusCode {
    state.observers.detach(id);
    if state.tabs.close(id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[cfg(test)]
mod tests {
    use crate::api::routes::test_support::serve;
    use crate::tabs::{CaptureTarget, TabDirectory};
    use crate::testing::SessionRig;
    use serde_json::json;

    #[tokio::test]
    async fn test_tab_reports_feed_registry() {
        let rig = SessionRig::with_defaults();
        let (base, tabs, _shutdown) = serve(&rig).await;
        let client = reqwest::Client::new();

        let response = client
            .put(format!("{}/tabs/4", base))
            .json(&json!({
                "url": "https://meet.google.com/xyz",
                "title": "Weekly sync",
                "capture_target": "alsa_output.monitor"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);

        let info = tabs.get(4).await.unwrap();
        assert_eq!(info.title.as_deref(), Some("Weekly sync"));
        assert_eq!(
            tabs.capture_target(4).await.unwrap(),
            CaptureTarget("alsa_output.monitor".to_string())
        );

        let response = client
            .put(format!("{}/tabs/4", base))
            .json(&json!({ "url": "  " }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        let response = client
            .delete(format!("{}/tabs/4", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);
        assert!(tabs.get(4).await.is_none());

        let response = client
            .delete(format!("{}/tabs/4", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }
}
