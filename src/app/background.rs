//! The background context: owner of the session, answering the envelopes
//! addressed to it.
//!
//! Each delivery is handled on its own task so that a request arriving
//! while a start or stop is in flight hits the session guards and is
//! refused, instead of waiting behind it.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::SettingsHandle;
use crate::messaging::{
    ContextRouter, Delivery, Message, MessageBus, ParticipantsUpdate, Reply, Target,
};
use crate::session::SessionOrchestrator;

#[derive(Clone)]
pub struct BackgroundContext {
    orchestrator: SessionOrchestrator,
    settings: SettingsHandle,
}

impl BackgroundContext {
    pub fn new(orchestrator: SessionOrchestrator, settings: SettingsHandle) -> Self {
        Self {
            orchestrator,
            settings,
        }
    }

    /// Register on the bus and serve until `shutdown` fires.
    pub fn spawn(self, bus: &MessageBus, shutdown: CancellationToken) -> JoinHandle<()> {
        let router = bus.register(Target::Background);
        tokio::spawn(self.run(router, shutdown))
    }

    async fn run(self, mut router: ContextRouter, shutdown: CancellationToken) {
        info!("Background context ready");
        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = router.next() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let context = self.clone();
            tokio::spawn(async move {
                if let Some(reply) = context.handle(&delivery).await {
                    if delivery.expects_reply() && !delivery.respond(reply) {
                        debug!("Reply to {} was not collected", delivery.envelope.kind());
                    }
                }
            });
        }
        info!("Background context stopped");
    }

    /// Answer one envelope. `None` for envelopes meant for other contexts.
    pub async fn handle(&self, delivery: &Delivery) -> Option<Reply> {
        let reply = match &delivery.envelope.message {
            Message::GetState => Reply::State(self.orchestrator.snapshot()),
            Message::ToggleRecording => match self.orchestrator.toggle(delivery.origin.tab).await {
                Ok(recording) => Reply::Recording(recording),
                Err(e) => Reply::Rejected(e.to_string()),
            },
            Message::TakeScreenshot => match self.orchestrator.take_screenshot().await {
                Ok(count) => Reply::ScreenshotCount(count),
                Err(e) => Reply::Rejected(e.to_string()),
            },
            Message::UpdateConfig(patch) => match self.settings.update(patch).await {
                Ok(_) => {
                    info!("Settings updated");
                    Reply::ConfigUpdated
                }
                Err(e) => {
                    error!("Failed to persist settings: {:#}", e);
                    Reply::Rejected(format!("{e:#}"))
                }
            },
            Message::ParticipantsUpdate(update) => {
                match self
                    .orchestrator
                    .update_participants(delivery.origin, update.clone())
                    .await
                {
                    Ok(_) => {
                        let snapshot = self.orchestrator.snapshot();
                        Reply::Participants(ParticipantsUpdate {
                            participants: snapshot.participants,
                            meeting_title: snapshot.title,
                        })
                    }
                    Err(e) => Reply::Rejected(e.to_string()),
                }
            }
            Message::GetParticipants | Message::StartRecording(_) | Message::StopRecording => {
                debug!("Background ignoring {}", delivery.envelope.kind());
                return None;
            }
        };
        Some(reply)
    }
}
