//! Session orchestrator.
//!
//! The only writer of the session. Every request goes through one guarded
//! transition on the `SessionMachine`; a request that does not fit the
//! current state is refused, never queued. The machine lock is only held
//! for the transition itself, never across an await.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::machine::{Screenshot, SessionDraft, SessionMachine};
use super::{Indicator, SessionError, SessionSnapshot, SessionState, StopReason};
use crate::capture::{CaptureCoordinator, CaptureError};
use crate::config::{RecordingConfig, SettingsHandle};
use crate::events::{EventBus, SessionEvent};
use crate::messaging::{
    Envelope, Message, MessageBus, Origin, ParticipantsUpdate, Reply, StartRecording, Target,
};
use crate::observer::ParticipantNormalizer;
use crate::platform::PlatformMatcher;
use crate::tabs::{TabDirectory, TabEvent, TabId, TabInfo};
use crate::upload::{UploadMetadata, UploadSupervisor};

/// How long a page observer gets to answer `GET_PARTICIPANTS` while starting.
const PARTICIPANTS_TIMEOUT: Duration = Duration::from_secs(1);

/// What happened to the recording once the session stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// Both tracks were handed to the upload supervisor.
    Uploading,
    /// The capture could not be finished; nothing is uploaded.
    CaptureFailed(CaptureError),
}

/// Collaborators of the orchestrator.
pub struct SessionServices {
    pub capture: Arc<CaptureCoordinator>,
    pub tabs: Arc<dyn TabDirectory>,
    pub matcher: Arc<PlatformMatcher>,
    pub settings: SettingsHandle,
    pub bus: MessageBus,
    pub uploads: UploadSupervisor,
    pub indicator: Arc<dyn Indicator>,
    pub events: EventBus,
    pub normalizer: ParticipantNormalizer,
}

#[derive(Clone)]
pub struct SessionOrchestrator {
    machine: Arc<Mutex<SessionMachine>>,
    capture: Arc<CaptureCoordinator>,
    tabs: Arc<dyn TabDirectory>,
    matcher: Arc<PlatformMatcher>,
    settings: SettingsHandle,
    bus: MessageBus,
    uploads: UploadSupervisor,
    indicator: Arc<dyn Indicator>,
    events: EventBus,
    normalizer: Arc<ParticipantNormalizer>,
}

impl SessionOrchestrator {
    pub fn new(services: SessionServices) -> Self {
        Self {
            machine: Arc::new(Mutex::new(SessionMachine::new())),
            capture: services.capture,
            tabs: services.tabs,
            matcher: services.matcher,
            settings: services.settings,
            bus: services.bus,
            uploads: services.uploads,
            indicator: services.indicator,
            events: services.events,
            normalizer: Arc::new(services.normalizer),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.machine().snapshot()
    }

    pub fn state(&self) -> SessionState {
        self.machine().state()
    }

    pub fn uploads(&self) -> &UploadSupervisor {
        &self.uploads
    }

    /// Start on the requested tab, or on the most recent meeting tab when
    /// none is given; stop when recording; refuse while busy.
    pub async fn toggle(&self, tab: Option<TabId>) -> Result<bool, SessionError> {
        let state = self.state();
        match state {
            SessionState::Idle => {
                let tab = match tab {
                    Some(tab) => tab,
                    None => self.pick_meeting_tab().await?,
                };
                self.start(tab).await.map(|_| true)
            }
            SessionState::Recording => self.stop(StopReason::Manual, None).await.map(|_| false),
            busy => {
                warn!("Toggle requested while session is {}", busy);
                Err(SessionError::Busy(busy))
            }
        }
    }

    /// IDLE → STARTING → RECORDING, or back to IDLE with everything released.
    pub async fn start(&self, tab: TabId) -> Result<SessionSnapshot, SessionError> {
        let info = self
            .tabs
            .get(tab)
            .await
            .ok_or(SessionError::UnknownTab(tab))?;
        let recording = self.settings.recording().await;

        let begun = self.machine().begin_start(tab, recording.max_screenshots);
        if let Err(e) = begun {
            info!("Start for tab {} refused: {}", tab, e);
            return Err(e);
        }

        info!("Starting session for tab {} ({})", tab, info.url);
        self.indicator.pending();
        self.events.publish(SessionEvent::Starting { tab });

        let draft = match self.acquire(&info, &recording).await {
            Ok(draft) => draft,
            Err(e) => {
                self.roll_back(tab, &e).await;
                return Err(e);
            }
        };

        let committed = self.machine().commit(draft);
        let snapshot = match committed {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.roll_back(tab, &e).await;
                return Err(e);
            }
        };

        info!(
            "Recording {} on tab {}",
            snapshot.platform.as_deref().unwrap_or("meeting"),
            tab
        );
        self.indicator.recording(&snapshot);
        self.indicator.notify(
            "Recording started",
            snapshot
                .title
                .as_deref()
                .or(snapshot.platform.as_deref())
                .unwrap_or("Meeting"),
        );
        self.events.publish(SessionEvent::Started(snapshot.clone()));

        self.recheck_after_start(tab).await;
        Ok(snapshot)
    }

    /// RECORDING → STOPPING → IDLE. With `tab` set, only the session's tab
    /// may stop it. The upload is handed off and never awaited.
    pub async fn stop(
        &self,
        reason: StopReason,
        tab: Option<TabId>,
    ) -> Result<StopOutcome, SessionError> {
        let begun = self.machine().begin_stop(tab);
        let session_tab = match begun {
            Ok(session_tab) => session_tab,
            Err(e) => {
                debug!("Stop ({}) ignored: {}", reason, e);
                return Err(e);
            }
        };

        info!("Stopping session for tab {} ({})", session_tab, reason);
        self.indicator.pending();
        self.events.publish(SessionEvent::Stopping {
            tab: session_tab,
            reason,
        });

        let captured = self.capture.finish().await;

        let finished = self.machine().finish_stop();
        self.indicator.idle();
        let Some(session) = finished else {
            warn!("Session vanished while stopping");
            return Err(SessionError::NotRecording);
        };
        self.events.publish(SessionEvent::Stopped {
            tab: session_tab,
            reason,
            duration_seconds: session.duration_seconds(),
        });

        match captured {
            Ok(artifact) => {
                let metadata = UploadMetadata::from_session(&session);
                info!(
                    "Session stopped after {}s, uploading \"{}\" ({} bytes)",
                    metadata.duration,
                    metadata.title,
                    artifact.total_bytes()
                );
                self.indicator.notify(
                    "Recording stopped",
                    &format!("Uploading \"{}\"", metadata.title),
                );
                self.uploads.hand_off(artifact, metadata);
                Ok(StopOutcome::Uploading)
            }
            Err(e) => {
                error!("Capture could not be finished: {}", e);
                self.indicator
                    .notify("Recording stopped", &format!("Audio was lost: {}", e));
                self.events.publish(SessionEvent::CaptureFailed {
                    error: e.to_string(),
                });
                Ok(StopOutcome::CaptureFailed(e))
            }
        }
    }

    /// Capture the session tab into the screenshot ring buffer.
    pub async fn take_screenshot(&self) -> Result<usize, SessionError> {
        let tab = {
            let machine = self.machine();
            if machine.state() != SessionState::Recording {
                return Err(SessionError::NotRecording);
            }
            machine.session_tab().ok_or(SessionError::NotRecording)?
        };

        let image = self
            .tabs
            .capture_visible(tab)
            .await
            .map_err(|e| SessionError::Screenshot(format!("{e:#}")))?;

        let count = self.machine().add_screenshot(Screenshot {
            taken_at: Utc::now(),
            data: BASE64.encode(image),
        })?;

        debug!("Screenshot {} taken of tab {}", count, tab);
        self.indicator.screenshot_count(count);
        self.events.publish(SessionEvent::ScreenshotTaken { count });
        Ok(count)
    }

    /// Apply a page observer's participant report. Only the session's own
    /// tab is listened to.
    pub async fn update_participants(
        &self,
        origin: Origin,
        update: ParticipantsUpdate,
    ) -> Result<usize, SessionError> {
        let label = self.settings.recording().await.default_speaker_label;
        let participants = self.normalizer.normalize(&update.participants, &label);

        let replaced =
            self.machine()
                .replace_participants(&origin, participants, update.meeting_title);
        match replaced {
            Ok(count) => {
                debug!("Participants updated: {}", count);
                self.events
                    .publish(SessionEvent::ParticipantsChanged { count });
                Ok(count)
            }
            Err(e) => {
                debug!("Participant update rejected: {}", e);
                Err(e)
            }
        }
    }

    /// Stop when the session's tab closes or leaves the meeting.
    pub async fn on_tab_event(&self, event: &TabEvent) {
        let stop = match event {
            TabEvent::Closed(tab) if self.is_recording_tab(*tab) => {
                Some((StopReason::TabClosed, *tab))
            }
            TabEvent::Updated(info) if self.is_recording_tab(info.id) && self.left_meeting(info) => {
                Some((StopReason::NavigatedAway, info.id))
            }
            _ => None,
        };

        if let Some((reason, tab)) = stop {
            if let Err(e) = self.stop(reason, Some(tab)).await {
                debug!("Stop on tab event not applied: {}", e);
            }
        }
    }

    async fn acquire(
        &self,
        info: &TabInfo,
        recording: &RecordingConfig,
    ) -> Result<SessionDraft, SessionError> {
        let capture_target = self
            .tabs
            .capture_target(info.id)
            .await
            .map_err(|e| CaptureError::TabAudioDenied(format!("{e:#}")))?;

        self.capture
            .begin(StartRecording {
                capture_target,
                tab_id: info.id,
                title: info.title.clone(),
            })
            .await?;

        let page = self.fetch_participants(info.id).await;
        Ok(SessionDraft {
            platform: self.matcher.match_url(&info.url),
            title: page.meeting_title.or_else(|| info.title.clone()),
            url: Some(info.url.clone()),
            participants: self
                .normalizer
                .normalize(&page.participants, &recording.default_speaker_label),
        })
    }

    async fn fetch_participants(&self, tab: TabId) -> ParticipantsUpdate {
        let reply = self
            .bus
            .request(
                Envelope::new(Target::Page(tab), Message::GetParticipants),
                Origin::extension(),
                PARTICIPANTS_TIMEOUT,
            )
            .await;
        match reply {
            Ok(Reply::Participants(update)) => update,
            Ok(other) => {
                debug!("Unexpected GET_PARTICIPANTS reply: {:?}", other);
                ParticipantsUpdate::default()
            }
            Err(e) => {
                debug!("No participants from tab {}: {}", tab, e);
                ParticipantsUpdate::default()
            }
        }
    }

    async fn roll_back(&self, tab: TabId, e: &SessionError) {
        error!("Failed to start session for tab {}: {}", tab, e);
        self.capture.teardown().await;
        self.machine().rollback();
        self.indicator.idle();
        self.indicator.notify("Recording failed", &e.to_string());
        self.events.publish(SessionEvent::StartFailed {
            tab,
            error: e.to_string(),
        });
    }

    /// The tab may have closed or navigated while the session was starting.
    async fn recheck_after_start(&self, tab: TabId) {
        let reason = match self.tabs.get(tab).await {
            None => Some(StopReason::TabClosed),
            Some(info) if self.left_meeting(&info) => Some(StopReason::NavigatedAway),
            Some(_) => None,
        };
        if let Some(reason) = reason {
            warn!("Tab {} changed while starting ({}), stopping", tab, reason);
            if let Err(e) = self.stop(reason, Some(tab)).await {
                debug!("Stop after start not applied: {}", e);
            }
        }
    }

    async fn pick_meeting_tab(&self) -> Result<TabId, SessionError> {
        self.tabs
            .recent()
            .await
            .into_iter()
            .find(|tab| self.matcher.is_meeting_url(&tab.url))
            .map(|tab| tab.id)
            .ok_or(SessionError::NoMeetingTab)
    }

    fn is_recording_tab(&self, tab: TabId) -> bool {
        let machine = self.machine();
        machine.state() == SessionState::Recording && machine.session_tab() == Some(tab)
    }

    /// Whether `info` no longer shows the session's meeting. A session on a
    /// known platform ends when the URL leaves that platform; any other
    /// session ends when the URL changes.
    fn left_meeting(&self, info: &TabInfo) -> bool {
        let (platform_key, url) = {
            let machine = self.machine();
            match machine.session() {
                Some(session) => (
                    session.platform.as_ref().map(|p| p.key.clone()),
                    session.url.clone(),
                ),
                None => return false,
            }
        };
        match platform_key {
            Some(key) => self
                .matcher
                .match_url(&info.url)
                .map(|platform| platform.key != key)
                .unwrap_or(true),
            None => url.as_deref() != Some(info.url.as_str()),
        }
    }

    fn machine(&self) -> MutexGuard<'_, SessionMachine> {
        self.machine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
