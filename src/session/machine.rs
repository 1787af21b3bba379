//! The session state machine.
//!
//! Pure and synchronous: every method either performs one guarded
//! transition or refuses it without touching anything.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::debug;

use super::{SessionError, SessionSnapshot, SessionState};
use crate::messaging::{validate_page_sender, Origin};
use crate::platform::Platform;
use crate::tabs::TabId;

/// One captured frame of the meeting tab.
#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    pub taken_at: DateTime<Utc>,
    /// Base64 of the encoded image.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub tab: TabId,
    pub platform: Option<Platform>,
    pub start_time: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub participants: Vec<String>,
    pub screenshots: VecDeque<Screenshot>,
    max_screenshots: usize,
}

impl Session {
    fn placeholder(tab: TabId, max_screenshots: usize) -> Self {
        Self {
            tab,
            platform: None,
            start_time: None,
            title: None,
            url: None,
            participants: Vec::new(),
            screenshots: VecDeque::new(),
            max_screenshots,
        }
    }

    pub fn duration_seconds(&self) -> u64 {
        self.start_time
            .map(|started| (Utc::now() - started).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}

/// Fields gathered while STARTING, written in one step on commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionDraft {
    pub platform: Option<Platform>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub participants: Vec<String>,
}

#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    session: Option<Session>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Tab owning the session, whatever the phase.
    pub fn session_tab(&self) -> Option<TabId> {
        self.session.as_ref().map(|session| session.tab)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        match &self.session {
            // Placeholder fields stay hidden until the commit
            Some(session) if self.state != SessionState::Starting => SessionSnapshot {
                recording: self.state == SessionState::Recording,
                state: self.state,
                platform: session.platform.as_ref().map(|p| p.name.clone()),
                start_time: session.start_time,
                title: session.title.clone(),
                url: session.url.clone(),
                tab_id: Some(session.tab),
                screenshot_count: session.screenshots.len(),
                participants: session.participants.clone(),
            },
            Some(session) => SessionSnapshot {
                state: self.state,
                tab_id: Some(session.tab),
                ..SessionSnapshot::idle()
            },
            None => SessionSnapshot::idle(),
        }
    }

    /// IDLE → STARTING.
    pub fn begin_start(&mut self, tab: TabId, max_screenshots: usize) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::Busy(self.state));
        }
        self.state = SessionState::Starting;
        self.session = Some(Session::placeholder(tab, max_screenshots));
        debug!("Session for tab {}: idle -> starting", tab);
        Ok(())
    }

    /// STARTING → RECORDING, writing every gathered field at once.
    pub fn commit(&mut self, draft: SessionDraft) -> Result<SessionSnapshot, SessionError> {
        if self.state != SessionState::Starting {
            return Err(SessionError::Busy(self.state));
        }
        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::NotRecording);
        };

        session.platform = draft.platform;
        session.title = draft.title;
        session.url = draft.url;
        session.participants = draft.participants;
        session.start_time = Some(Utc::now());
        self.state = SessionState::Recording;
        debug!("Session for tab {}: starting -> recording", session.tab);
        Ok(self.snapshot())
    }

    /// STARTING → IDLE. Returns false when there was nothing to roll back.
    pub fn rollback(&mut self) -> bool {
        if self.state != SessionState::Starting {
            return false;
        }
        self.state = SessionState::Idle;
        if let Some(session) = self.session.take() {
            debug!("Session for tab {}: starting -> idle (rollback)", session.tab);
        }
        true
    }

    /// RECORDING → STOPPING. With `tab` set, only the session's own tab may
    /// stop it.
    pub fn begin_stop(&mut self, tab: Option<TabId>) -> Result<TabId, SessionError> {
        match self.state {
            SessionState::Recording => {}
            SessionState::Idle => return Err(SessionError::NotRecording),
            busy => return Err(SessionError::Busy(busy)),
        }
        let session_tab = self.session_tab().ok_or(SessionError::NotRecording)?;
        if let Some(sender) = tab {
            if sender != session_tab {
                return Err(SessionError::WrongTab {
                    sender,
                    session: session_tab,
                });
            }
        }
        self.state = SessionState::Stopping;
        debug!("Session for tab {}: recording -> stopping", session_tab);
        Ok(session_tab)
    }

    /// STOPPING → IDLE, handing back the finished session.
    pub fn finish_stop(&mut self) -> Option<Session> {
        if self.state != SessionState::Stopping {
            return None;
        }
        self.state = SessionState::Idle;
        let session = self.session.take();
        if let Some(session) = &session {
            debug!("Session for tab {}: stopping -> idle", session.tab);
        }
        session
    }

    /// Append to the screenshot ring buffer, evicting the oldest past the cap.
    pub fn add_screenshot(&mut self, screenshot: Screenshot) -> Result<usize, SessionError> {
        if self.state != SessionState::Recording {
            return Err(SessionError::NotRecording);
        }
        let session = self.session.as_mut().ok_or(SessionError::NotRecording)?;
        session.screenshots.push_back(screenshot);
        while session.screenshots.len() > session.max_screenshots {
            session.screenshots.pop_front();
        }
        Ok(session.screenshots.len())
    }

    /// Latest-wins replacement of the participant list, accepted only from
    /// the session's own tab while recording.
    pub fn replace_participants(
        &mut self,
        origin: &Origin,
        participants: Vec<String>,
        meeting_title: Option<String>,
    ) -> Result<usize, SessionError> {
        let recording_tab = match self.state {
            SessionState::Recording => self.session_tab(),
            _ => None,
        };
        validate_page_sender(origin, recording_tab)?;

        let session = self.session.as_mut().ok_or(SessionError::NotRecording)?;
        session.participants = participants;
        if meeting_title.is_some() {
            session.title = meeting_title;
        }
        Ok(session.participants.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shot(n: u8) -> Screenshot {
        Screenshot {
            taken_at: Utc::now(),
            data: format!("img{}", n),
        }
    }

    fn recording_machine(tab: TabId, cap: usize) -> SessionMachine {
        let mut machine = SessionMachine::new();
        machine.begin_start(tab, cap).unwrap();
        machine
            .commit(SessionDraft {
                platform: Some(Platform::new("meet.google.com", "Google Meet", 10)),
                title: Some("Standup".to_string()),
                url: Some("https://meet.google.com/abc".to_string()),
                participants: vec!["Ada".to_string()],
            })
            .unwrap();
        machine
    }

    #[test]
    fn test_full_lifecycle() {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.state(), SessionState::Idle);

        machine.begin_start(4, 20).unwrap();
        assert_eq!(machine.state(), SessionState::Starting);

        let snapshot = machine
            .commit(SessionDraft {
                platform: Some(Platform::new("zoom.us", "Zoom", 9)),
                ..SessionDraft::default()
            })
            .unwrap();
        assert!(snapshot.recording);
        assert_eq!(snapshot.platform.as_deref(), Some("Zoom"));
        assert!(snapshot.start_time.is_some());

        assert_eq!(machine.begin_stop(None).unwrap(), 4);
        assert_eq!(machine.state(), SessionState::Stopping);

        let session = machine.finish_stop().unwrap();
        assert_eq!(session.tab, 4);
        assert_eq!(machine.state(), SessionState::Idle);
        assert!(machine.session().is_none());
    }

    #[test]
    fn test_start_rejected_unless_idle() {
        let mut machine = SessionMachine::new();
        machine.begin_start(1, 20).unwrap();
        assert_eq!(
            machine.begin_start(2, 20),
            Err(SessionError::Busy(SessionState::Starting))
        );
        assert_eq!(machine.session_tab(), Some(1));

        let mut machine = recording_machine(1, 20);
        assert_eq!(
            machine.begin_start(2, 20),
            Err(SessionError::Busy(SessionState::Recording))
        );
        assert_eq!(machine.state(), SessionState::Recording);
        assert_eq!(machine.session_tab(), Some(1));
    }

    #[test]
    fn test_starting_snapshot_hides_placeholder() {
        let mut machine = SessionMachine::new();
        machine.begin_start(6, 20).unwrap();

        let snapshot = machine.snapshot();
        assert_eq!(snapshot.state, SessionState::Starting);
        assert!(!snapshot.recording);
        assert!(snapshot.start_time.is_none());
        assert!(snapshot.platform.is_none());
    }

    #[test]
    fn test_rollback_only_from_starting() {
        let mut machine = SessionMachine::new();
        assert!(!machine.rollback());

        machine.begin_start(1, 20).unwrap();
        assert!(machine.rollback());
        assert_eq!(machine.state(), SessionState::Idle);
        assert!(machine.session().is_none());

        let mut machine = recording_machine(1, 20);
        assert!(!machine.rollback());
        assert_eq!(machine.state(), SessionState::Recording);
    }

    #[test]
    fn test_stop_guards() {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.begin_stop(None), Err(SessionError::NotRecording));

        machine.begin_start(1, 20).unwrap();
        assert_eq!(
            machine.begin_stop(None),
            Err(SessionError::Busy(SessionState::Starting))
        );

        let mut machine = recording_machine(1, 20);
        assert_eq!(
            machine.begin_stop(Some(2)),
            Err(SessionError::WrongTab {
                sender: 2,
                session: 1
            })
        );
        assert_eq!(machine.state(), SessionState::Recording);

        machine.begin_stop(Some(1)).unwrap();
        assert_eq!(
            machine.begin_stop(Some(1)),
            Err(SessionError::Busy(SessionState::Stopping))
        );
        assert!(machine.commit(SessionDraft::default()).is_err());
    }

    #[test]
    fn test_screenshot_ring_buffer_evicts_oldest() {
        let mut machine = recording_machine(1, 3);
        for n in 0..4 {
            machine.add_screenshot(shot(n)).unwrap();
        }

        let session = machine.session().unwrap();
        assert_eq!(session.screenshots.len(), 3);
        assert_eq!(session.screenshots.front().unwrap().data, "img1");
        assert_eq!(session.screenshots.back().unwrap().data, "img3");
        assert_eq!(machine.snapshot().screenshot_count, 3);
    }

    #[test]
    fn test_screenshot_requires_recording() {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.add_screenshot(shot(0)), Err(SessionError::NotRecording));
    }

    #[test]
    fn test_participants_replaced_not_merged() {
        let mut machine = recording_machine(5, 20);
        machine
            .replace_participants(
                &Origin::tab(5),
                vec!["Grace".to_string(), "Linus".to_string()],
                None,
            )
            .unwrap();
        machine
            .replace_participants(&Origin::tab(5), vec!["Barbara".to_string()], None)
            .unwrap();

        let snapshot = machine.snapshot();
        assert_eq!(snapshot.participants, vec!["Barbara"]);
        assert_eq!(snapshot.title.as_deref(), Some("Standup"));
    }

    #[test]
    fn test_participants_from_foreign_tab_rejected() {
        let mut machine = recording_machine(5, 20);
        let result = machine.replace_participants(
            &Origin::tab(9),
            vec!["Mallory".to_string()],
            Some("Hijacked".to_string()),
        );

        assert_eq!(
            result,
            Err(SessionError::WrongTab {
                sender: 9,
                session: 5
            })
        );
        let snapshot = machine.snapshot();
        assert_eq!(snapshot.participants, vec!["Ada"]);
        assert_eq!(snapshot.title.as_deref(), Some("Standup"));
    }

    #[test]
    fn test_participants_while_starting_rejected() {
        let mut machine = SessionMachine::new();
        machine.begin_start(5, 20).unwrap();
        assert_eq!(
            machine.replace_participants(&Origin::tab(5), vec!["Ada".to_string()], None),
            Err(SessionError::NotRecording)
        );
    }

    #[test]
    fn test_meeting_title_update() {
        let mut machine = recording_machine(5, 20);
        machine
            .replace_participants(&Origin::tab(5), Vec::new(), Some("Retro".to_string()))
            .unwrap();
        assert_eq!(machine.snapshot().title.as_deref(), Some("Retro"));
    }
}
