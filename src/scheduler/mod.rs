//! Auto-start scheduler.
//!
//! Debounces meeting detection: a tab that lands on a meeting URL while no
//! session is running arms a single-shot timer. The timer is disarmed when
//! the tab closes or leaves the meeting, and re-armed from scratch on every
//! new match. On fire the tab is looked up again and must still be on a
//! meeting URL, otherwise the fire does nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SettingsHandle;
use crate::platform::PlatformMatcher;
use crate::session::{SessionOrchestrator, SessionState};
use crate::tabs::{TabDirectory, TabEvent, TabId};

struct ArmedTimer {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Timers {
    armed: HashMap<TabId, ArmedTimer>,
    next_generation: u64,
}

#[derive(Clone)]
pub struct AutoStartScheduler {
    orchestrator: SessionOrchestrator,
    tabs: Arc<dyn TabDirectory>,
    matcher: Arc<PlatformMatcher>,
    settings: SettingsHandle,
    timers: Arc<Mutex<Timers>>,
}

impl AutoStartScheduler {
    pub fn new(
        orchestrator: SessionOrchestrator,
        tabs: Arc<dyn TabDirectory>,
        matcher: Arc<PlatformMatcher>,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            orchestrator,
            tabs,
            matcher,
            settings,
            timers: Arc::new(Mutex::new(Timers::default())),
        }
    }

    pub async fn on_tab_event(&self, event: &TabEvent) {
        match event {
            TabEvent::Updated(info) => {
                if self.matcher.is_meeting_url(&info.url) {
                    self.arm(info.id).await;
                } else if self.cancel(info.id) {
                    debug!("Tab {} left the meeting, auto-start disarmed", info.id);
                }
            }
            TabEvent::Closed(tab) => {
                if self.cancel(*tab) {
                    debug!("Tab {} closed, auto-start disarmed", tab);
                }
            }
        }
    }

    /// Arm the timer for `tab`, replacing any earlier one. Returns false
    /// when auto-start is disabled or a session is already running.
    pub async fn arm(&self, tab: TabId) -> bool {
        let recording = self.settings.recording().await;
        if !recording.auto_start {
            debug!("Auto-start disabled, not arming tab {}", tab);
            return false;
        }
        if self.orchestrator.state() != SessionState::Idle {
            debug!("Session active, not arming tab {}", tab);
            return false;
        }

        let delay = recording.auto_start_delay();
        let token = CancellationToken::new();
        let generation = {
            let mut timers = self.timers();
            let generation = timers.next_generation;
            timers.next_generation += 1;
            let previous = timers.armed.insert(
                tab,
                ArmedTimer {
                    generation,
                    token: token.clone(),
                },
            );
            if let Some(previous) = previous {
                previous.token.cancel();
            }
            generation
        };

        info!("Meeting detected in tab {}, auto-start in {:?}", tab, delay);
        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => scheduler.fire(tab, generation).await,
            }
        });
        true
    }

    /// Disarm the timer for `tab`. Returns whether one was armed.
    pub fn cancel(&self, tab: TabId) -> bool {
        match self.timers().armed.remove(&tab) {
            Some(timer) => {
                timer.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, tab: TabId) -> bool {
        self.timers().armed.contains_key(&tab)
    }

    /// Disarm every timer.
    pub fn shutdown(&self) {
        for (_, timer) in self.timers().armed.drain() {
            timer.token.cancel();
        }
    }

    async fn fire(&self, tab: TabId, generation: u64) {
        {
            let mut timers = self.timers();
            match timers.armed.get(&tab) {
                Some(timer) if timer.generation == generation => {
                    timers.armed.remove(&tab);
                }
                // Replaced or cancelled after the sleep completed
                _ => return,
            }
        }

        let still_meeting = self
            .tabs
            .get(tab)
            .await
            .map(|info| self.matcher.is_meeting_url(&info.url))
            .unwrap_or(false);
        if !still_meeting {
            debug!("Tab {} no longer on a meeting, auto-start skipped", tab);
            return;
        }

        info!("Auto-starting recording for tab {}", tab);
        if let Err(e) = self.orchestrator.start(tab).await {
            warn!("Auto-start for tab {} did not start: {}", tab, e);
        }
    }

    fn timers(&self) -> MutexGuard<'_, Timers> {
        self.timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::SessionEvent;
    use crate::testing::SessionRig;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    const MEET: &str = "https://meet.google.com/abc-defg-hij";

    fn scheduler(rig: &SessionRig) -> AutoStartScheduler {
        AutoStartScheduler::new(
            rig.orchestrator.clone(),
            Arc::new(rig.tabs.clone()),
            rig.matcher.clone(),
            rig.settings.clone(),
        )
    }

    fn started_tabs(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<TabId> {
        let mut tabs = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(SessionEvent::Starting { tab }) => tabs.push(tab),
                Ok(_) => {}
                Err(TryRecvError::Lagged(_)) => {}
                Err(_) => return tabs,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_away_before_fire_prevents_start() {
        let rig = SessionRig::with_defaults();
        let scheduler = scheduler(&rig);
        let mut rx = rig.events.subscribe();

        let info = rig.tabs.open(1, MEET);
        scheduler.on_tab_event(&TabEvent::Updated(info)).await;
        assert!(scheduler.is_armed(1));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let away = rig.tabs.open(1, "https://example.com/after-call");
        scheduler.on_tab_event(&TabEvent::Updated(away)).await;
        assert!(!scheduler.is_armed(1));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(started_tabs(&mut rx).is_empty());
        assert_eq!(rig.orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_starts_session_after_delay() {
        let rig = SessionRig::with_defaults();
        let scheduler = scheduler(&rig);
        let mut rx = rig.events.subscribe();

        let info = rig.tabs.open(1, MEET);
        scheduler.on_tab_event(&TabEvent::Updated(info)).await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(started_tabs(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(started_tabs(&mut rx), vec![1]);
        assert!(!scheduler.is_armed(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearming_restarts_the_delay() {
        let rig = SessionRig::with_defaults();
        let scheduler = scheduler(&rig);
        let mut rx = rig.events.subscribe();

        let info = rig.tabs.open(1, MEET);
        scheduler.on_tab_event(&TabEvent::Updated(info.clone())).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        scheduler.on_tab_event(&TabEvent::Updated(info)).await;

        // The first timer would have fired at t0+5s
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(started_tabs(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(started_tabs(&mut rx), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_navigation_is_caught_on_fire() {
        let rig = SessionRig::with_defaults();
        let scheduler = scheduler(&rig);
        let mut rx = rig.events.subscribe();

        assert!(scheduler.arm(1).await);
        rig.tabs.open(1, "https://example.com/");
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(started_tabs(&mut rx).is_empty());
        assert!(!scheduler.is_armed(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_timer() {
        let rig = SessionRig::with_defaults();
        let scheduler = scheduler(&rig);
        let mut rx = rig.events.subscribe();

        let info = rig.tabs.open(1, MEET);
        scheduler.on_tab_event(&TabEvent::Updated(info)).await;
        rig.tabs.close(1);
        scheduler.on_tab_event(&TabEvent::Closed(1)).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(started_tabs(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_disabled_auto_start_never_arms() {
        let mut config = Config::default();
        config.recording.auto_start = false;
        let rig = SessionRig::new(
            config,
            crate::testing::FakeAudioBackend::new(),
            crate::testing::FakeMeetingBackend::new(),
        );
        let scheduler = scheduler(&rig);

        let info = rig.tabs.open(1, MEET);
        scheduler.on_tab_event(&TabEvent::Updated(info)).await;
        assert!(!scheduler.is_armed(1));
    }
}
