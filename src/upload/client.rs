//! HTTP client for the meeting backend.
//!
//! Submits a finished recording as multipart form data and polls job
//! status.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, info};

use super::{JobStatusResponse, MeetingBackend, UploadError, UploadMetadata, UploadReceipt};
use crate::capture::{EncodedTrack, RecordingArtifact};
use crate::config::BackendConfig;

pub struct HttpMeetingBackend {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpMeetingBackend {
    pub fn new(base_url: &str, api_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.filter(|token| !token.trim().is_empty()),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(&config.base_url, config.api_token.clone())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn audio_part(track: &EncodedTrack) -> Result<Part, UploadError> {
        Part::bytes(track.bytes.clone())
            .file_name(track.file_name())
            .mime_str(EncodedTrack::MIME_TYPE)
            .map_err(|e| UploadError::Network(e.to_string()))
    }

    async fn read_body(response: reqwest::Response) -> Result<String, UploadError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(UploadError::Unauthorized);
        }
        if !status.is_success() {
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl MeetingBackend for HttpMeetingBackend {
    async fn upload(
        &self,
        artifact: &RecordingArtifact,
        metadata: &UploadMetadata,
    ) -> Result<UploadReceipt, UploadError> {
        if artifact.is_empty() {
            return Err(UploadError::NothingToUpload);
        }

        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;

        let mut form = Form::new();
        if !artifact.mic.is_empty() {
            form = form.part("mic_file", Self::audio_part(&artifact.mic)?);
        }
        if !artifact.tab.is_empty() {
            form = form.part("tab_file", Self::audio_part(&artifact.tab)?);
        }
        form = form.text("metadata", metadata_json);

        let url = format!("{}/api/upload", self.base_url);
        info!(
            "Uploading recording \"{}\" ({} bytes) to {}",
            metadata.title,
            artifact.total_bytes(),
            url
        );

        let response = self
            .authorize(self.client.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;

        let body = Self::read_body(response).await?;
        serde_json::from_str(&body).map_err(|e| UploadError::InvalidResponse(e.to_string()))
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, UploadError> {
        let url = format!("{}/api/status/{}", self.base_url, job_id);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;

        let body = Self::read_body(response).await?;
        // A body that is not JSON degrades to a pending status
        let value: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        let status = JobStatusResponse::from_value(&value);
        debug!("Job {} status: {}", job_id, status.status.as_str());
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Track;
    use crate::upload::JobStatus;
    use axum::{
        body::Bytes,
        extract::Path,
        http::{HeaderMap, StatusCode as AxumStatus},
        response::{IntoResponse, Json},
        routing::{get, post},
        Router,
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

    fn track(track: Track, bytes: &[u8]) -> EncodedTrack {
        EncodedTrack {
            track,
            sample_rate: 16000,
            chunk_count: 1,
            bytes: bytes.to_vec(),
        }
    }

    fn metadata() -> UploadMetadata {
        UploadMetadata {
            title: "Standup".to_string(),
            date: "2026-10-16T09:00:00+00:00".to_string(),
            duration: 900,
            platform: Some("Google Meet".to_string()),
            url: Some("https://meet.google.com/abc".to_string()),
            participants: vec!["Me".to_string(), "Ada".to_string()],
        }
    }

    async fn upload_handler(headers: HeaderMap, body: Bytes) -> impl IntoResponse {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth != "Bearer secret" {
            return (AxumStatus::UNAUTHORIZED, Json(json!({ "detail": "no" })));
        }

        let body = String::from_utf8_lossy(&body);
        let ok = body.contains("name=\"mic_file\"")
            && body.contains("filename=\"mic.wav\"")
            && body.contains("name=\"metadata\"")
            && body.contains("\"participants\":[\"Me\",\"Ada\"]")
            && !body.contains("name=\"tab_file\"");
        if !ok {
            return (AxumStatus::BAD_REQUEST, Json(json!({ "detail": "bad form" })));
        }
        (
            AxumStatus::OK,
            Json(json!({ "job_id": "job-42", "meeting_id": "m-7" })),
        )
    }

    async fn status_handler(Path(job_id): Path<String>) -> Json<serde_json::Value> {
        match job_id.as_str() {
            "done" => Json(json!({ "status": "completed" })),
            "broken" => Json(json!({ "status": "failed", "error": "no speech" })),
            _ => Json(json!({ "status": "processing" })),
        }
    }

    fn backend_router() -> Router {
        Router::new()
            .route("/api/upload", post(upload_handler))
            .route("/api/status/:job_id", get(status_handler))
    }

    #[tokio::test]
    async fn test_upload_sends_non_empty_tracks_and_metadata() {
        let base = serve(backend_router()).await;
        let client = HttpMeetingBackend::new(&format!("{}/", base), Some("secret".to_string()));

        let artifact = RecordingArtifact {
            mic: track(Track::Mic, b"RIFFmic"),
            tab: EncodedTrack::missing(Track::Tab, 48000),
        };
        let receipt = client.upload(&artifact, &metadata()).await.unwrap();
        assert_eq!(receipt.job_id, "job-42");
        assert_eq!(receipt.meeting_id, "m-7");
    }

    #[tokio::test]
    async fn test_upload_without_token_is_unauthorized() {
        let base = serve(backend_router()).await;
        let client = HttpMeetingBackend::new(&base, None);

        let artifact = RecordingArtifact {
            mic: track(Track::Mic, b"RIFFmic"),
            tab: track(Track::Tab, b"RIFFtab"),
        };
        let err = client.upload(&artifact, &metadata()).await.unwrap_err();
        assert_eq!(err, UploadError::Unauthorized);
    }

    #[tokio::test]
    async fn test_upload_of_empty_artifact_is_refused_locally() {
        let client = HttpMeetingBackend::new("http://127.0.0.1:9", None);
        let artifact = RecordingArtifact {
            mic: EncodedTrack::missing(Track::Mic, 16000),
            tab: EncodedTrack::missing(Track::Tab, 16000),
        };
        let err = client.upload(&artifact, &metadata()).await.unwrap_err();
        assert_eq!(err, UploadError::NothingToUpload);
    }

    #[tokio::test]
    async fn test_job_status() {
        let base = serve(backend_router()).await;
        let client = HttpMeetingBackend::new(&base, None);

        assert_eq!(
            client.job_status("done").await.unwrap().status,
            JobStatus::Completed
        );
        let failed = client.job_status("broken").await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("no speech"));
        assert_eq!(
            client.job_status("other").await.unwrap().status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_rejected_status_is_surfaced() {
        let app = Router::new().route(
            "/api/status/:job_id",
            get(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "maintenance") }),
        );
        let base = serve(app).await;
        let client = HttpMeetingBackend::new(&base, None);

        match client.job_status("x").await {
            Err(UploadError::Rejected { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let client = HttpMeetingBackend::new("http://127.0.0.1:9", None);
        assert!(matches!(
            client.job_status("x").await,
            Err(UploadError::Network(_))
        ));
    }
}
