//! Meeting session lifecycle.
//!
//! `SessionMachine` holds the single session and its guarded transitions;
//! `SessionOrchestrator` drives it, delegating audio to the capture
//! coordinator and finished recordings to the upload supervisor.

pub mod indicator;
pub mod machine;
pub mod orchestrator;

pub use indicator::{Indicator, LogIndicator};
pub use machine::{Screenshot, Session, SessionDraft, SessionMachine};
pub use orchestrator::{SessionOrchestrator, SessionServices, StopOutcome};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::capture::CaptureError;
use crate::messaging::SenderRejection;
use crate::tabs::TabId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Recording,
    Stopping,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Recording => "recording",
            SessionState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What ended a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Manual,
    TabClosed,
    NavigatedAway,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Manual => "manual",
            StopReason::TabClosed => "tab_closed",
            StopReason::NavigatedAway => "navigated_away",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the session, as answered to `GET_STATE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub recording: bool,
    pub state: SessionState,
    pub platform: Option<String>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub tab_id: Option<TabId>,
    pub screenshot_count: usize,
    pub participants: Vec<String>,
}

impl SessionSnapshot {
    pub fn idle() -> Self {
        Self {
            recording: false,
            state: SessionState::Idle,
            platform: None,
            start_time: None,
            title: None,
            url: None,
            tab_id: None,
            screenshot_count: 0,
            participants: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("session is busy ({0})")]
    Busy(SessionState),
    #[error("no recording in progress")]
    NotRecording,
    #[error("tab {sender} does not own the session (tab {session})")]
    WrongTab { sender: TabId, session: TabId },
    #[error("update was not sent from a tab")]
    NotFromTab,
    #[error("tab {0} is not known")]
    UnknownTab(TabId),
    #[error("no meeting tab to record")]
    NoMeetingTab,
    #[error("screenshot failed: {0}")]
    Screenshot(String),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

impl From<SenderRejection> for SessionError {
    fn from(rejection: SenderRejection) -> Self {
        match rejection {
            SenderRejection::NoSession => SessionError::NotRecording,
            SenderRejection::NotFromTab => SessionError::NotFromTab,
            SenderRejection::ForeignTab { sender, session } => {
                SessionError::WrongTab { sender, session }
            }
        }
    }
}
