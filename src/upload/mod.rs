//! Upload of finished recordings and polling of the resulting job.

pub mod client;
pub mod supervisor;

pub use client::HttpMeetingBackend;
pub use supervisor::UploadSupervisor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::capture::RecordingArtifact;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UploadError {
    #[error("request failed: {0}")]
    Network(String),
    #[error("backend rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("backend refused the credentials")]
    Unauthorized,
    #[error("unexpected backend response: {0}")]
    InvalidResponse(String),
    #[error("recording has no audio to upload")]
    NothingToUpload,
}

/// Status constants used by the meeting backend.
pub mod status {
    pub const PENDING: &str = "pending";
    pub const PROCESSING: &str = "processing";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Lenient parse; anything unrecognised is treated as still pending.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            status::PROCESSING => JobStatus::Processing,
            status::COMPLETED => JobStatus::Completed,
            status::FAILED => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => status::PENDING,
            JobStatus::Processing => status::PROCESSING,
            JobStatus::Completed => status::COMPLETED,
            JobStatus::Failed => status::FAILED,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Answer of `GET /api/status/{job_id}`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    pub error: Option<String>,
}

impl JobStatusResponse {
    pub fn from_value(value: &Value) -> Self {
        Self {
            status: value
                .get("status")
                .and_then(Value::as_str)
                .map(JobStatus::parse)
                .unwrap_or(JobStatus::Pending),
            error: value
                .get("error")
                .and_then(Value::as_str)
                .filter(|e| !e.is_empty())
                .map(String::from),
        }
    }
}

/// Answer of `POST /api/upload`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadReceipt {
    pub job_id: String,
    #[serde(default)]
    pub meeting_id: String,
}

/// Session metadata sent alongside the audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub title: String,
    /// ISO-8601 start time.
    pub date: String,
    /// Seconds.
    pub duration: u64,
    pub platform: Option<String>,
    pub url: Option<String>,
    pub participants: Vec<String>,
}

impl UploadMetadata {
    pub fn from_session(session: &Session) -> Self {
        let started = session.start_time.unwrap_or_else(Utc::now);
        let platform = session.platform.as_ref().map(|p| p.name.clone());
        let title = session
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| default_title(platform.as_deref(), started));

        Self {
            title,
            date: started.to_rfc3339(),
            duration: session.duration_seconds(),
            platform,
            url: session.url.clone(),
            participants: session.participants.clone(),
        }
    }
}

fn default_title(platform: Option<&str>, started: DateTime<Utc>) -> String {
    format!(
        "{} meeting {}",
        platform.unwrap_or("Untitled"),
        started.format("%Y-%m-%d %H:%M")
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum JobResult {
    Completed,
    Failed { error: Option<String> },
    /// Polling stopped because the backend refused the credentials.
    Unauthenticated,
}

/// Final report for one polled job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub job_id: String,
    #[serde(flatten)]
    pub result: JobResult,
    pub finished_at: DateTime<Utc>,
}

/// The remote meeting backend.
#[async_trait]
pub trait MeetingBackend: Send + Sync {
    async fn upload(
        &self,
        artifact: &RecordingArtifact,
        metadata: &UploadMetadata,
    ) -> Result<UploadReceipt, UploadError>;

    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, UploadError>;
}
