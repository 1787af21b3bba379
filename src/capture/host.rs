//! The capture host context.
//!
//! Runs on its own thread with a single-threaded runtime. It is the only
//! place audio sources and encoders live, and it answers exactly two
//! requests: `START_RECORDING` and `STOP_RECORDING`.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::artifact::{EncodedTrack, RecordingArtifact};
use super::audio_source::{AcquiredSource, AudioBackend, AudioSource, MicConstraints};
use super::barrier::{join_both, BarrierOutcome};
use super::encoder::TrackEncoder;
use super::{CaptureError, Track};
use crate::messaging::{
    ContextRouter, Delivery, Message, MessageBus, Reply, StartRecording, Target,
};
use crate::tabs::TabId;

struct ActiveCapture {
    tab: TabId,
    mic: Box<dyn AudioSource>,
    tab_audio: Box<dyn AudioSource>,
    mic_encoder: Box<dyn TrackEncoder>,
    tab_encoder: Box<dyn TrackEncoder>,
}

impl ActiveCapture {
    fn release(&mut self) {
        self.mic.release();
        self.tab_audio.release();
    }
}

impl Drop for ActiveCapture {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct CaptureHost {
    router: ContextRouter,
    backend: Arc<dyn AudioBackend>,
    chunk_interval: Duration,
    stop_timeout: Duration,
    active: Option<ActiveCapture>,
}

impl CaptureHost {
    pub fn new(
        router: ContextRouter,
        backend: Arc<dyn AudioBackend>,
        chunk_interval: Duration,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            router,
            backend,
            chunk_interval,
            stop_timeout,
            active: None,
        }
    }

    /// Register the host on the bus and start it on a dedicated thread.
    pub fn spawn(
        bus: &MessageBus,
        backend: Arc<dyn AudioBackend>,
        chunk_interval: Duration,
        stop_timeout: Duration,
    ) -> Result<HostHandle, CaptureError> {
        // Register before the thread starts so nothing sent meanwhile is lost
        let router = bus.register(Target::CaptureHost);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let thread = thread::Builder::new()
            .name("capture-host".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Capture host runtime failed to start: {}", e);
                        return;
                    }
                };
                let host = CaptureHost::new(router, backend, chunk_interval, stop_timeout);
                runtime.block_on(host.run(token));
            })
            .map_err(|e| CaptureError::HostUnavailable(e.to_string()))?;

        info!("Capture host started");
        Ok(HostHandle {
            shutdown,
            thread: Some(thread),
        })
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                delivery = self.router.next() => match delivery {
                    Some(delivery) => self.handle(delivery).await,
                    None => break,
                },
            }
        }

        if let Some(active) = self.active.take() {
            warn!(
                "Capture host closing with a capture for tab {} still running, releasing sources",
                active.tab
            );
        }
        debug!("Capture host stopped");
    }

    async fn handle(&mut self, delivery: Delivery) {
        let reply = match &delivery.envelope.message {
            Message::StartRecording(start) => match self.start(start) {
                Ok(()) => Reply::CaptureStarted,
                Err(e) => Reply::CaptureFailed(e),
            },
            Message::StopRecording => match self.stop().await {
                Ok(artifact) => Reply::Artifacts(artifact),
                Err(e) => Reply::CaptureFailed(e),
            },
            Message::GetState
            | Message::ToggleRecording
            | Message::TakeScreenshot
            | Message::UpdateConfig(_)
            | Message::ParticipantsUpdate(_)
            | Message::GetParticipants => {
                debug!("Capture host ignoring {}", delivery.envelope.kind());
                return;
            }
        };
        delivery.respond(reply);
    }

    fn start(&mut self, request: &StartRecording) -> Result<(), CaptureError> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        // Microphone first: if it fails nothing else has been touched
        let AcquiredSource {
            source: mut mic,
            frames: mic_frames,
        } = self.backend.open_microphone(&MicConstraints::default())?;

        let AcquiredSource {
            source: tab_audio,
            frames: tab_frames,
        } = match self.backend.open_tab_audio(&request.capture_target) {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!("Tab audio acquisition failed, releasing microphone: {}", e);
                mic.release();
                return Err(e);
            }
        };

        let mic_encoder = self.backend.encoder(
            Track::Mic,
            mic_frames,
            mic.sample_rate(),
            self.chunk_interval,
        );
        let tab_encoder = self.backend.encoder(
            Track::Tab,
            tab_frames,
            tab_audio.sample_rate(),
            self.chunk_interval,
        );

        info!(
            "Capture started for tab {}: mic={} ({}Hz), tab={} ({}Hz)",
            request.tab_id,
            mic.label(),
            mic.sample_rate(),
            tab_audio.label(),
            tab_audio.sample_rate()
        );

        self.active = Some(ActiveCapture {
            tab: request.tab_id,
            mic,
            tab_audio,
            mic_encoder,
            tab_encoder,
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<RecordingArtifact, CaptureError> {
        let mut active = self.active.take().ok_or(CaptureError::NotRecording)?;

        let mic_ack = active.mic_encoder.stop();
        let tab_ack = active.tab_encoder.stop();
        let outcome = join_both(mic_ack, tab_ack, self.stop_timeout).await;

        // Sources are released whatever the barrier said
        active.release();

        let mic_rate = active.mic_encoder.sample_rate();
        let tab_rate = active.tab_encoder.sample_rate();

        match outcome {
            BarrierOutcome::BothOk { mic, tab } => {
                let artifact = RecordingArtifact {
                    mic: EncodedTrack::assemble(Track::Mic, mic_rate, &mic)?,
                    tab: EncodedTrack::assemble(Track::Tab, tab_rate, &tab)?,
                };
                info!(
                    "Capture for tab {} stopped: mic {} chunks, tab {} chunks",
                    active.tab, artifact.mic.chunk_count, artifact.tab.chunk_count
                );
                Ok(artifact)
            }
            BarrierOutcome::Partial {
                mic: Err(mic_err),
                tab: Err(tab_err),
            } => Err(CaptureError::EncodersFailed {
                mic: mic_err.to_string(),
                tab: tab_err.to_string(),
            }),
            BarrierOutcome::Partial { mic, tab } => {
                let mic = match mic {
                    Ok(chunks) => EncodedTrack::assemble(Track::Mic, mic_rate, &chunks)?,
                    Err(e) => {
                        warn!("Dropping mic track: {}", e);
                        EncodedTrack::missing(Track::Mic, mic_rate)
                    }
                };
                let tab = match tab {
                    Ok(chunks) => EncodedTrack::assemble(Track::Tab, tab_rate, &chunks)?,
                    Err(e) => {
                        warn!("Dropping tab track: {}", e);
                        EncodedTrack::missing(Track::Tab, tab_rate)
                    }
                };
                Ok(RecordingArtifact { mic, tab })
            }
            BarrierOutcome::TimedOut {
                mic_acked,
                tab_acked,
            } => {
                error!(
                    "Encoders did not stop within {:?} (mic acked: {}, tab acked: {})",
                    self.stop_timeout, mic_acked, tab_acked
                );
                Err(CaptureError::StopTimeout(self.stop_timeout.as_secs()))
            }
        }
    }
}

/// Owner-side handle of a running capture host.
pub struct HostHandle {
    shutdown: CancellationToken,
    thread: Option<thread::JoinHandle<()>>,
}

impl HostHandle {
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| !thread.is_finished())
            .unwrap_or(false)
    }

    /// Shut the host down and wait for its thread to exit, which drops its
    /// router from the bus. Any capture still running is released on the
    /// host thread first.
    pub async fn close(mut self, wait: Duration) {
        self.shutdown.cancel();
        let Some(thread) = self.thread.take() else {
            return;
        };
        let joined = tokio::task::spawn_blocking(move || thread.join());
        match tokio::time::timeout(wait, joined).await {
            Ok(Ok(Ok(()))) => debug!("Capture host thread joined"),
            Ok(Ok(Err(_))) => error!("Capture host thread panicked"),
            Ok(Err(e)) => error!("Capture host join task failed: {}", e),
            Err(_) => warn!("Capture host did not exit within {:?}", wait),
        }
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
