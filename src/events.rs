//! Broadcast bus for lifecycle and job events.

use tokio::sync::broadcast;

use crate::session::{SessionSnapshot, StopReason};
use crate::tabs::TabId;
use crate::upload::JobOutcome;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Starting { tab: TabId },
    Started(SessionSnapshot),
    StartFailed { tab: TabId, error: String },
    Stopping { tab: TabId, reason: StopReason },
    Stopped { tab: TabId, reason: StopReason, duration_seconds: u64 },
    /// The capture could not be finished; nothing is uploaded.
    CaptureFailed { error: String },
    ScreenshotTaken { count: usize },
    ParticipantsChanged { count: usize },
    UploadSubmitted { job_id: String, meeting_id: String },
    UploadFailed { error: String },
    JobFinished(JobOutcome),
}

/// Event bus for publishing and subscribing to session events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: SessionEvent) {
        if let Err(e) = self.sender.send(event) {
            tracing::trace!("No subscribers for event: {:?}", e.0);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
