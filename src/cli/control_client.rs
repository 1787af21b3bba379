//! HTTP client for the daemon's local control API.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::session::SessionSnapshot;

/// Client for the local API of a running daemon.
pub struct ControlClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ToggleResponse {
    pub recording: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotResponse {
    pub screenshot_count: usize,
}

impl ControlClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn local(port: u16) -> Self {
        Self::new(&format!("http://127.0.0.1:{}", port))
    }

    pub async fn session(&self) -> Result<SessionSnapshot> {
        let response = self
            .client
            .get(format!("{}/session", self.base_url))
            .send()
            .await
            .context("Failed to reach meetscribe. Is the daemon running?")?;
        Self::parse(response).await
    }

    pub async fn toggle(&self) -> Result<ToggleResponse> {
        let response = self
            .client
            .post(format!("{}/toggle", self.base_url))
            .send()
            .await
            .context("Failed to reach meetscribe. Is the daemon running?")?;
        Self::parse(response).await
    }

    pub async fn screenshot(&self) -> Result<ScreenshotResponse> {
        let response = self
            .client
            .post(format!("{}/screenshot", self.base_url))
            .send()
            .await
            .context("Failed to reach meetscribe. Is the daemon running?")?;
        Self::parse(response).await
    }

    /// Decode a success body, or turn the API's `{error, message}` body
    /// into an error.
    async fn parse<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no details");
            return Err(anyhow!("meetscribe refused ({}): {}", status, message));
        }
        response
            .json()
            .await
            .context("Failed to parse meetscribe response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::StatusCode,
        response::IntoResponse,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_session_and_toggle() {
        let app = Router::new()
            .route(
                "/session",
                get(|| async {
                    Json(json!({
                        "recording": true,
                        "state": "recording",
                        "platform": "Zoom",
                        "startTime": "2026-10-16T09:00:00Z",
                        "title": "Planning",
                        "url": "https://zoom.us/j/1",
                        "tabId": 2,
                        "screenshotCount": 1,
                        "participants": ["Me"]
                    }))
                }),
            )
            .route(
                "/toggle",
                post(|| async { Json(json!({ "success": true, "recording": false })) }),
            );
        let client = ControlClient::new(&serve(app).await);

        let snapshot = client.session().await.unwrap();
        assert!(snapshot.recording);
        assert_eq!(snapshot.platform.as_deref(), Some("Zoom"));
        assert!(!client.toggle().await.unwrap().recording);
    }

    #[tokio::test]
    async fn test_refusal_carries_message() {
        let app = Router::new().route(
            "/screenshot",
            post(|| async {
                (
                    StatusCode::CONFLICT,
                    Json(json!({ "error": true, "message": "no recording in progress" })),
                )
                    .into_response()
            }),
        );
        let client = ControlClient::new(&serve(app).await);

        let err = client.screenshot().await.unwrap_err();
        assert!(err.to_string().contains("no recording in progress"));
    }
}
