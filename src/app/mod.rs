pub mod background;

pub use background::BackgroundContext;

use crate::api::{ApiServer, ApiState};
use crate::capture::{AudioBackend, CaptureCoordinator, CaptureSettings, CpalBackend};
use crate::config::{Config, SettingsHandle};
use crate::events::{EventBus, SessionEvent};
use crate::messaging::MessageBus;
use crate::observer::{PageObservers, ParticipantNormalizer};
use crate::platform::PlatformMatcher;
use crate::scheduler::AutoStartScheduler;
use crate::session::{Indicator, LogIndicator, SessionOrchestrator, SessionServices};
use crate::tabs::{RegisteredTabs, ScreenshotCommand, TabDirectory, TabEvent};
use crate::upload::{HttpMeetingBackend, JobResult, MeetingBackend, UploadSupervisor};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long shutdown waits for uploads still in flight.
const SHUTDOWN_UPLOAD_WAIT: Duration = Duration::from_secs(30);

pub async fn run_service(port: Option<u16>) -> Result<()> {
    info!("Starting meetscribe");

    let config_path = Config::config_path()?;
    let config = Config::load_from(&config_path)?;
    let port = port.unwrap_or(config.api.port);

    let (tabs, tab_events) =
        RegisteredTabs::new(ScreenshotCommand::new(config.screenshot.command.clone()));
    let backend: Arc<dyn MeetingBackend> = Arc::new(HttpMeetingBackend::from_config(&config.backend));
    let daemon = Daemon::build(
        config,
        Some(config_path),
        tabs,
        Arc::new(CpalBackend),
        backend,
        Arc::new(LogIndicator),
    )?;

    let shutdown = CancellationToken::new();
    daemon.start(tab_events, shutdown.clone());

    let api_server = ApiServer::new(daemon.api_state(), port);
    let server = tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            error!("API server failed: {:#}", e);
        }
    });

    info!("meetscribe is ready!");
    info!("Test manually: curl -X POST http://127.0.0.1:{}/toggle", port);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
        }
        _ = server => warn!("API server exited"),
    }

    shutdown.cancel();
    daemon.shutdown().await;
    Ok(())
}

/// Every long-lived component of the daemon, wired together.
#[derive(Clone)]
pub struct Daemon {
    pub bus: MessageBus,
    pub settings: SettingsHandle,
    pub events: EventBus,
    pub tabs: RegisteredTabs,
    pub observers: PageObservers,
    pub orchestrator: SessionOrchestrator,
    pub scheduler: AutoStartScheduler,
    pub uploads: UploadSupervisor,
    matcher: Arc<PlatformMatcher>,
    indicator: Arc<dyn Indicator>,
}

impl Daemon {
    pub fn build(
        config: Config,
        config_path: Option<std::path::PathBuf>,
        tabs: RegisteredTabs,
        audio: Arc<dyn AudioBackend>,
        backend: Arc<dyn MeetingBackend>,
        indicator: Arc<dyn Indicator>,
    ) -> Result<Self> {
        let bus = MessageBus::new();
        let events = EventBus::default();
        let settings = SettingsHandle::new(config.clone(), config_path);
        let matcher = Arc::new(PlatformMatcher::with_extra(&config.platforms.extra));
        let directory: Arc<dyn TabDirectory> = Arc::new(tabs.clone());

        let capture = CaptureCoordinator::new(
            bus.clone(),
            audio,
            CaptureSettings::from(&config.recording),
        );
        let uploads =
            UploadSupervisor::new(backend, config.backend.poll_interval(), events.clone());
        let normalizer =
            ParticipantNormalizer::new().context("Failed to compile participant pattern")?;

        let orchestrator = SessionOrchestrator::new(SessionServices {
            capture: Arc::new(capture),
            tabs: directory.clone(),
            matcher: matcher.clone(),
            settings: settings.clone(),
            bus: bus.clone(),
            uploads: uploads.clone(),
            indicator: indicator.clone(),
            events: events.clone(),
            normalizer,
        });
        let scheduler = AutoStartScheduler::new(
            orchestrator.clone(),
            directory,
            matcher.clone(),
            settings.clone(),
        );

        Ok(Self {
            observers: PageObservers::new(bus.clone()),
            bus,
            settings,
            events,
            tabs,
            orchestrator,
            scheduler,
            uploads,
            matcher,
            indicator,
        })
    }

    /// Start the background context, the tab event pump and job notifications.
    pub fn start(&self, tab_events: mpsc::UnboundedReceiver<TabEvent>, shutdown: CancellationToken) {
        BackgroundContext::new(self.orchestrator.clone(), self.settings.clone())
            .spawn(&self.bus, shutdown.clone());
        tokio::spawn(pump_tab_events(self.clone(), tab_events, shutdown.clone()));
        tokio::spawn(notify_job_events(
            self.events.clone(),
            self.indicator.clone(),
            shutdown,
        ));
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            bus: self.bus.clone(),
            tabs: self.tabs.clone(),
            observers: self.observers.clone(),
            uploads: self.uploads.clone(),
        }
    }

    /// Disarm timers, finish a running session and wait for its upload so
    /// the audio is kept.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        if self.orchestrator.snapshot().recording {
            info!("Stopping the running session before exit");
            if let Err(e) = self
                .orchestrator
                .stop(crate::session::StopReason::Manual, None)
                .await
            {
                warn!("Session could not be stopped: {}", e);
            }
        }
        self.uploads.drain(SHUTDOWN_UPLOAD_WAIT).await;
    }
}

/// Feed tab reports to the orchestrator, the scheduler and the page
/// observers, in arrival order.
async fn pump_tab_events(
    daemon: Daemon,
    mut events: mpsc::UnboundedReceiver<TabEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match &event {
            TabEvent::Updated(info) if daemon.matcher.is_meeting_url(&info.url) => {
                daemon.observers.attach(info.id)
            }
            TabEvent::Updated(info) => {
                daemon.observers.detach(info.id);
            }
            TabEvent::Closed(tab) => {
                daemon.observers.detach(*tab);
            }
        }

        // A stop can take seconds; later tab events must not wait for it
        let orchestrator = daemon.orchestrator.clone();
        let session_event = event.clone();
        tokio::spawn(async move { orchestrator.on_tab_event(&session_event).await });

        daemon.scheduler.on_tab_event(&event).await;
    }
}

/// Tell the user how the upload of each recording ended.
async fn notify_job_events(
    events: EventBus,
    indicator: Arc<dyn Indicator>,
    shutdown: CancellationToken,
) {
    let mut rx = events.subscribe();
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(SessionEvent::UploadFailed { error }) => indicator.notify("Upload failed", &error),
            Ok(SessionEvent::JobFinished(outcome)) => match outcome.result {
                JobResult::Completed => {
                    indicator.notify("Transcript ready", &format!("Job {}", outcome.job_id))
                }
                JobResult::Failed { error } => indicator.notify(
                    "Transcription failed",
                    error.as_deref().unwrap_or("unknown error"),
                ),
                JobResult::Unauthenticated => {
                    indicator.notify("Transcription status unavailable", "Not authenticated")
                }
            },
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => warn!("Job notifications lagged by {}", missed),
            Err(RecvError::Closed) => break,
        }
    }
}
