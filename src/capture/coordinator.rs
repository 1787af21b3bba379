//! Background-side driver of the capture host.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::artifact::RecordingArtifact;
use super::audio_source::AudioBackend;
use super::host::{CaptureHost, HostHandle};
use super::CaptureError;
use crate::config::RecordingConfig;
use crate::messaging::{Envelope, Message, MessageBus, Origin, Reply, StartRecording, Target};

/// Extra time the coordinator grants the host on top of its own stop bound.
const STOP_REPLY_MARGIN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub chunk_interval: Duration,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
}

impl From<&RecordingConfig> for CaptureSettings {
    fn from(config: &RecordingConfig) -> Self {
        Self {
            chunk_interval: config.chunk_interval(),
            start_timeout: config.start_timeout(),
            stop_timeout: config.stop_timeout(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from(&RecordingConfig::default())
    }
}

pub struct CaptureCoordinator {
    bus: MessageBus,
    backend: Arc<dyn AudioBackend>,
    settings: CaptureSettings,
    host: Mutex<Option<HostHandle>>,
}

impl CaptureCoordinator {
    pub fn new(bus: MessageBus, backend: Arc<dyn AudioBackend>, settings: CaptureSettings) -> Self {
        Self {
            bus,
            backend,
            settings,
            host: Mutex::new(None),
        }
    }

    /// Start a capture: make sure a host exists, then have it acquire both
    /// sources and start both encoders. On error the host has already
    /// released whatever it acquired; tearing the host down is up to the
    /// caller's rollback.
    pub async fn begin(&self, start: StartRecording) -> Result<(), CaptureError> {
        self.ensure_host()?;

        let tab = start.tab_id;
        let reply = self
            .bus
            .request(
                Envelope::new(Target::CaptureHost, Message::StartRecording(start)),
                Origin::extension(),
                self.settings.start_timeout,
            )
            .await
            .map_err(|e| CaptureError::HostUnavailable(e.to_string()))?;

        match reply {
            Reply::CaptureStarted => {
                info!("Capture running for tab {}", tab);
                Ok(())
            }
            Reply::CaptureFailed(e) => Err(e),
            other => Err(CaptureError::HostUnavailable(format!(
                "unexpected reply to START_RECORDING: {:?}",
                other
            ))),
        }
    }

    /// Stop the capture and collect both tracks. The host is torn down
    /// afterwards regardless of the outcome.
    pub async fn finish(&self) -> Result<RecordingArtifact, CaptureError> {
        let result = self.request_stop().await;
        self.teardown().await;
        result
    }

    async fn request_stop(&self) -> Result<RecordingArtifact, CaptureError> {
        if !self.has_host() {
            return Err(CaptureError::HostUnavailable(
                "no capture host running".to_string(),
            ));
        }

        let reply = self
            .bus
            .request(
                Envelope::new(Target::CaptureHost, Message::StopRecording),
                Origin::extension(),
                self.settings.stop_timeout + STOP_REPLY_MARGIN,
            )
            .await
            .map_err(|e| CaptureError::HostUnavailable(e.to_string()))?;

        match reply {
            Reply::Artifacts(artifact) => Ok(artifact),
            Reply::CaptureFailed(e) => Err(e),
            other => Err(CaptureError::HostUnavailable(format!(
                "unexpected reply to STOP_RECORDING: {:?}",
                other
            ))),
        }
    }

    /// Close the capture host if one exists and wait until it has left the
    /// bus, so a following `begin` only reaches the new host.
    pub async fn teardown(&self) {
        let host = self.lock_host().take();
        if let Some(host) = host {
            host.close(self.settings.stop_timeout + STOP_REPLY_MARGIN)
                .await;
            info!("Capture host torn down");
        }
    }

    pub fn has_host(&self) -> bool {
        self.lock_host()
            .as_ref()
            .map(HostHandle::is_running)
            .unwrap_or(false)
    }

    fn ensure_host(&self) -> Result<(), CaptureError> {
        let mut host = self.lock_host();
        if let Some(existing) = host.as_ref() {
            if existing.is_running() {
                debug!("Reusing existing capture host");
                return Ok(());
            }
            warn!("Capture host exited unexpectedly, starting a new one");
        }

        *host = Some(CaptureHost::spawn(
            &self.bus,
            self.backend.clone(),
            self.settings.chunk_interval,
            self.settings.stop_timeout,
        )?);
        Ok(())
    }

    fn lock_host(&self) -> MutexGuard<'_, Option<HostHandle>> {
        self.host.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Track;
    use crate::tabs::CaptureTarget;
    use crate::testing::FakeAudioBackend;

    fn settings() -> CaptureSettings {
        CaptureSettings {
            chunk_interval: Duration::from_millis(20),
            start_timeout: Duration::from_secs(2),
            stop_timeout: Duration::from_millis(300),
        }
    }

    fn start_request() -> StartRecording {
        StartRecording {
            capture_target: CaptureTarget::default_monitor(),
            tab_id: 7,
            title: Some("Standup".to_string()),
        }
    }

    #[tokio::test]
    async fn test_begin_and_finish_produce_two_tracks() {
        let backend = FakeAudioBackend::new();
        let coordinator =
            CaptureCoordinator::new(MessageBus::new(), Arc::new(backend.clone()), settings());

        coordinator.begin(start_request()).await.unwrap();
        assert!(coordinator.has_host());
        tokio::time::sleep(Duration::from_millis(60)).await;

        let artifact = coordinator.finish().await.unwrap();
        assert_eq!(artifact.mic.track, Track::Mic);
        assert_eq!(artifact.tab.track, Track::Tab);
        assert!(!artifact.mic.is_empty());
        assert!(!artifact.tab.is_empty());
        assert_eq!(backend.counters().mic_released(), 1);
        assert_eq!(backend.counters().tab_released(), 1);
        assert!(!coordinator.has_host());
    }

    #[tokio::test]
    async fn test_ensure_host_is_idempotent() {
        let bus = MessageBus::new();
        let coordinator = CaptureCoordinator::new(
            bus.clone(),
            Arc::new(FakeAudioBackend::new()),
            settings(),
        );

        coordinator.ensure_host().unwrap();
        coordinator.ensure_host().unwrap();
        assert!(coordinator.has_host());

        coordinator.begin(start_request()).await.unwrap();
        let err = coordinator.begin(start_request()).await.unwrap_err();
        assert_eq!(err, CaptureError::AlreadyRecording);
        coordinator.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_microphone_failure_touches_nothing_else() {
        let backend = FakeAudioBackend::new().with_mic_failure();
        let coordinator =
            CaptureCoordinator::new(MessageBus::new(), Arc::new(backend.clone()), settings());

        let err = coordinator.begin(start_request()).await.unwrap_err();
        assert!(err.is_acquisition());
        assert_eq!(backend.counters().tab_opened(), 0);
        coordinator.teardown().await;
    }

    #[tokio::test]
    async fn test_tab_failure_releases_microphone() {
        let backend = FakeAudioBackend::new().with_tab_failure();
        let coordinator =
            CaptureCoordinator::new(MessageBus::new(), Arc::new(backend.clone()), settings());

        let err = coordinator.begin(start_request()).await.unwrap_err();
        assert!(matches!(err, CaptureError::TabAudioDenied(_)));
        assert_eq!(backend.counters().mic_opened(), 1);
        assert_eq!(backend.counters().mic_released(), 1);
        coordinator.teardown().await;
    }

    #[tokio::test]
    async fn test_finish_releases_sources_when_an_encoder_hangs() {
        let backend = FakeAudioBackend::new().with_hanging_tab_encoder();
        let coordinator =
            CaptureCoordinator::new(MessageBus::new(), Arc::new(backend.clone()), settings());

        coordinator.begin(start_request()).await.unwrap();
        let err = coordinator.finish().await.unwrap_err();

        assert!(matches!(err, CaptureError::StopTimeout(_)));
        assert_eq!(backend.counters().mic_released(), 1);
        assert_eq!(backend.counters().tab_released(), 1);
        assert!(!coordinator.has_host());
    }

    #[tokio::test]
    async fn test_restart_reaches_only_the_new_host() {
        let bus = MessageBus::new();
        let backend = FakeAudioBackend::new();
        let coordinator =
            CaptureCoordinator::new(bus.clone(), Arc::new(backend.clone()), settings());

        for round in 1..=20 {
            coordinator.begin(start_request()).await.unwrap();
            coordinator.finish().await.unwrap();
            assert!(!bus.is_registered(Target::CaptureHost));
            assert_eq!(backend.counters().mic_opened(), round);
            assert_eq!(backend.counters().tab_opened(), round);
        }

        coordinator.begin(start_request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.counters().mic_opened(), 21);
        assert_eq!(backend.counters().mic_released(), 20);
        coordinator.finish().await.unwrap();
        assert_eq!(backend.counters().mic_released(), 21);
    }

    #[tokio::test]
    async fn test_one_failed_encoder_keeps_the_other_track() {
        let backend = FakeAudioBackend::new().with_failing_encoder(Track::Tab);
        let coordinator =
            CaptureCoordinator::new(MessageBus::new(), Arc::new(backend.clone()), settings());

        coordinator.begin(start_request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let artifact = coordinator.finish().await.unwrap();

        assert!(!artifact.mic.is_empty());
        assert!(artifact.tab.is_empty());
        assert_eq!(backend.counters().tab_released(), 1);
    }

    #[tokio::test]
    async fn test_both_encoders_failing_is_an_error() {
        let backend = FakeAudioBackend::new()
            .with_failing_encoder(Track::Mic)
            .with_failing_encoder(Track::Tab);
        let coordinator =
            CaptureCoordinator::new(MessageBus::new(), Arc::new(backend.clone()), settings());

        coordinator.begin(start_request()).await.unwrap();
        let err = coordinator.finish().await.unwrap_err();

        assert!(matches!(err, CaptureError::EncodersFailed { .. }));
        assert_eq!(backend.counters().mic_released(), 1);
        assert_eq!(backend.counters().tab_released(), 1);
    }

    #[tokio::test]
    async fn test_finish_without_host() {
        let coordinator = CaptureCoordinator::new(
            MessageBus::new(),
            Arc::new(FakeAudioBackend::new()),
            settings(),
        );
        let err = coordinator.finish().await.unwrap_err();
        assert!(matches!(err, CaptureError::HostUnavailable(_)));
    }
}
