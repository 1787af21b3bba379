//! Page observer contexts.
//!
//! One observer per meeting tab. It keeps the latest participant list the
//! page reported, pushes every change to the background context as
//! `PARTICIPANTS_UPDATE`, and answers `GET_PARTICIPANTS` requests.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::messaging::{
    ContextRouter, Envelope, Message, MessageBus, Origin, ParticipantsUpdate, Reply, Target,
};
use crate::tabs::TabId;

/// Cleans participant lists reported by pages.
#[derive(Debug, Clone)]
pub struct ParticipantNormalizer {
    self_marker: Regex,
}

impl ParticipantNormalizer {
    pub fn new() -> Result<Self, regex::Error> {
        // "You", "Me" or "Some Name (You)"
        let self_marker = Regex::new(r"(?i)^(?:you|me|.+?\s*\((?:you|me)\))$")?;
        Ok(Self { self_marker })
    }

    /// Trim every name, replace self entries by `self_label`, drop empties
    /// and duplicates, keep order.
    pub fn normalize(&self, names: &[String], self_label: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let name = if self.self_marker.is_match(name) {
                self_label
            } else {
                name
            };
            if !out.iter().any(|existing| existing == name) {
                out.push(name.to_string());
            }
        }
        out
    }
}

struct PageObserver {
    router: ContextRouter,
    latest: Arc<Mutex<ParticipantsUpdate>>,
}

impl PageObserver {
    async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = self.router.next() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            match &delivery.envelope.message {
                Message::GetParticipants => {
                    let latest = lock(&self.latest).clone();
                    delivery.respond(Reply::Participants(latest));
                }
                Message::GetState
                | Message::ToggleRecording
                | Message::TakeScreenshot
                | Message::UpdateConfig(_)
                | Message::ParticipantsUpdate(_)
                | Message::StartRecording(_)
                | Message::StopRecording => {
                    debug!("{} ignoring {}", self.router.local(), delivery.envelope.kind());
                }
            }
        }
    }
}

/// Handle on a running observer.
pub struct ObserverHandle {
    tab: TabId,
    bus: MessageBus,
    latest: Arc<Mutex<ParticipantsUpdate>>,
    shutdown: CancellationToken,
}

impl ObserverHandle {
    pub fn spawn(bus: &MessageBus, tab: TabId) -> Self {
        let router = bus.register(Target::Page(tab));
        let latest = Arc::new(Mutex::new(ParticipantsUpdate::default()));
        let shutdown = CancellationToken::new();

        let observer = PageObserver {
            router,
            latest: latest.clone(),
        };
        tokio::spawn(observer.run(shutdown.clone()));

        Self {
            tab,
            bus: bus.clone(),
            latest,
            shutdown,
        }
    }

    /// Record what the page reported and push it to the background.
    pub fn observe(&self, update: ParticipantsUpdate) {
        *lock(&self.latest) = update.clone();
        self.bus.send(
            Envelope::to_background(Message::ParticipantsUpdate(update)),
            Origin::tab(self.tab),
        );
    }

    pub fn latest(&self) -> ParticipantsUpdate {
        lock(&self.latest).clone()
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Observers of all open tabs.
#[derive(Clone, Default)]
pub struct PageObservers {
    bus: MessageBus,
    observers: Arc<Mutex<HashMap<TabId, ObserverHandle>>>,
}

impl PageObservers {
    pub fn new(bus: MessageBus) -> Self {
        Self {
            bus,
            observers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start an observer for `tab` unless one is running.
    pub fn attach(&self, tab: TabId) {
        let mut observers = lock(&self.observers);
        if !observers.contains_key(&tab) {
            debug!("Attaching page observer to tab {}", tab);
            observers.insert(tab, ObserverHandle::spawn(&self.bus, tab));
        }
    }

    pub fn detach(&self, tab: TabId) -> bool {
        lock(&self.observers).remove(&tab).is_some()
    }

    pub fn is_attached(&self, tab: TabId) -> bool {
        lock(&self.observers).contains_key(&tab)
    }

    /// Feed a page report to the tab's observer, attaching one if needed.
    pub fn observe(&self, tab: TabId, update: ParticipantsUpdate) {
        self.attach(tab);
        if let Some(observer) = lock(&self.observers).get(&tab) {
            observer.observe(update);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
