//! In-memory stand-ins for the hardware and network seams, shared by unit
//! and integration tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::capture::{
    AcquiredSource, AudioBackend, AudioSource, CaptureCoordinator, CaptureError, CaptureSettings,
    ChunkedEncoder, MicConstraints, RecordingArtifact, StopAck, Track, TrackEncoder,
};
use crate::config::{Config, SettingsHandle};
use crate::events::EventBus;
use crate::messaging::MessageBus;
use crate::observer::ParticipantNormalizer;
use crate::platform::PlatformMatcher;
use crate::session::{Indicator, SessionOrchestrator, SessionServices, SessionSnapshot};
use crate::tabs::{CaptureTarget, TabDirectory, TabId, TabInfo};
use crate::upload::{
    JobStatus, JobStatusResponse, MeetingBackend, UploadError, UploadMetadata, UploadReceipt,
    UploadSupervisor,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct AudioCounterCells {
    mic_opened: AtomicUsize,
    mic_released: AtomicUsize,
    tab_opened: AtomicUsize,
    tab_released: AtomicUsize,
}

/// How often each fake source was opened and released.
#[derive(Debug, Clone, Default)]
pub struct AudioCounters {
    cells: Arc<AudioCounterCells>,
}

impl AudioCounters {
    pub fn mic_opened(&self) -> usize {
        self.cells.mic_opened.load(Ordering::SeqCst)
    }

    pub fn mic_released(&self) -> usize {
        self.cells.mic_released.load(Ordering::SeqCst)
    }

    pub fn tab_opened(&self) -> usize {
        self.cells.tab_opened.load(Ordering::SeqCst)
    }

    pub fn tab_released(&self) -> usize {
        self.cells.tab_released.load(Ordering::SeqCst)
    }
}

/// A source that delivers one burst of samples at open and then idles.
struct FakeSource {
    track: Track,
    sink: Option<mpsc::UnboundedSender<Vec<f32>>>,
    counters: AudioCounters,
}

impl AudioSource for FakeSource {
    fn label(&self) -> &str {
        match self.track {
            Track::Mic => "fake microphone",
            Track::Tab => "fake tab audio",
        }
    }

    fn sample_rate(&self) -> u32 {
        16000
    }

    fn is_active(&self) -> bool {
        self.sink.is_some()
    }

    fn release(&mut self) {
        if self.sink.take().is_some() {
            let counter = match self.track {
                Track::Mic => &self.counters.cells.mic_released,
                Track::Tab => &self.counters.cells.tab_released,
            };
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// An encoder whose stop always reports a failure.
struct FailingEncoder {
    track: Track,
}

impl TrackEncoder for FailingEncoder {
    fn track(&self) -> Track {
        self.track
    }

    fn sample_rate(&self) -> u32 {
        16000
    }

    fn stop(&mut self) -> oneshot::Receiver<StopAck> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(CaptureError::EncoderFailed {
            track: self.track,
            reason: "writer closed".to_string(),
        }));
        rx
    }
}

/// An encoder that never acknowledges a stop while it is alive.
struct HangingEncoder {
    track: Track,
    pending: Vec<oneshot::Sender<StopAck>>,
}

impl TrackEncoder for HangingEncoder {
    fn track(&self) -> Track {
        self.track
    }

    fn sample_rate(&self) -> u32 {
        16000
    }

    fn stop(&mut self) -> oneshot::Receiver<StopAck> {
        let (tx, rx) = oneshot::channel();
        self.pending.push(tx);
        rx
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeAudioBackend {
    counters: AudioCounters,
    mic_fails: bool,
    tab_fails: bool,
    hang_tab_encoder: bool,
    failing_encoders: Vec<Track>,
}

impl FakeAudioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mic_failure(mut self) -> Self {
        self.mic_fails = true;
        self
    }

    pub fn with_tab_failure(mut self) -> Self {
        self.tab_fails = true;
        self
    }

    pub fn with_hanging_tab_encoder(mut self) -> Self {
        self.hang_tab_encoder = true;
        self
    }

    /// The encoder for `track` acknowledges every stop with an error.
    pub fn with_failing_encoder(mut self, track: Track) -> Self {
        self.failing_encoders.push(track);
        self
    }

    pub fn counters(&self) -> &AudioCounters {
        &self.counters
    }

    fn open(&self, track: Track) -> AcquiredSource {
        let (sink, frames) = mpsc::unbounded_channel();
        let _ = sink.send(vec![0.25; 1600]);
        AcquiredSource {
            source: Box::new(FakeSource {
                track,
                sink: Some(sink),
                counters: self.counters.clone(),
            }),
            frames,
        }
    }
}

impl AudioBackend for FakeAudioBackend {
    fn open_microphone(&self, _constraints: &MicConstraints) -> Result<AcquiredSource, CaptureError> {
        if self.mic_fails {
            return Err(CaptureError::MicrophoneDenied("permission denied".to_string()));
        }
        self.counters.cells.mic_opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.open(Track::Mic))
    }

    fn open_tab_audio(&self, _target: &CaptureTarget) -> Result<AcquiredSource, CaptureError> {
        if self.tab_fails {
            return Err(CaptureError::TabAudioDenied("no monitor source".to_string()));
        }
        self.counters.cells.tab_opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.open(Track::Tab))
    }

    fn encoder(
        &self,
        track: Track,
        frames: mpsc::UnboundedReceiver<Vec<f32>>,
        sample_rate: u32,
        timeslice: Duration,
    ) -> Box<dyn TrackEncoder> {
        if self.failing_encoders.contains(&track) {
            return Box::new(FailingEncoder { track });
        }
        if self.hang_tab_encoder && track == Track::Tab {
            return Box::new(HangingEncoder {
                track,
                pending: Vec::new(),
            });
        }
        Box::new(ChunkedEncoder::spawn(track, frames, sample_rate, timeslice))
    }
}

/// Tab directory backed by a plain map.
#[derive(Debug, Clone, Default)]
pub struct FakeTabs {
    tabs: Arc<Mutex<HashMap<TabId, TabInfo>>>,
    order: Arc<Mutex<Vec<TabId>>>,
    screenshots: Arc<AtomicUsize>,
}

impl FakeTabs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, id: TabId, url: &str) -> TabInfo {
        let info = TabInfo {
            id,
            url: url.to_string(),
            title: Some(format!("Tab {}", id)),
            capture_target: None,
        };
        lock(&self.tabs).insert(id, info.clone());
        let mut order = lock(&self.order);
        order.retain(|tab| *tab != id);
        order.push(id);
        info
    }

    pub fn close(&self, id: TabId) {
        lock(&self.tabs).remove(&id);
        lock(&self.order).retain(|tab| *tab != id);
    }

    pub fn screenshots_taken(&self) -> usize {
        self.screenshots.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TabDirectory for FakeTabs {
    async fn get(&self, tab: TabId) -> Option<TabInfo> {
        lock(&self.tabs).get(&tab).cloned()
    }

    async fn recent(&self) -> Vec<TabInfo> {
        let tabs = lock(&self.tabs);
        lock(&self.order)
            .iter()
            .rev()
            .filter_map(|id| tabs.get(id).cloned())
            .collect()
    }

    async fn capture_target(&self, tab: TabId) -> Result<CaptureTarget> {
        lock(&self.tabs)
            .get(&tab)
            .map(|_| CaptureTarget::default_monitor())
            .ok_or_else(|| anyhow!("Tab {} is not known", tab))
    }

    async fn capture_visible(&self, tab: TabId) -> Result<Vec<u8>> {
        let n = self.screenshots.fetch_add(1, Ordering::SeqCst);
        if lock(&self.tabs).contains_key(&tab) {
            Ok(format!("png-{}", n).into_bytes())
        } else {
            Err(anyhow!("Tab {} is not known", tab))
        }
    }
}

/// Records indicator calls as short strings.
#[derive(Debug, Clone, Default)]
pub struct RecordingIndicator {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn push(&self, call: String) {
        lock(&self.calls).push(call);
    }
}

impl Indicator for RecordingIndicator {
    fn pending(&self) {
        self.push("pending".to_string());
    }

    fn recording(&self, snapshot: &SessionSnapshot) {
        self.push(format!(
            "recording:{}",
            snapshot.platform.as_deref().unwrap_or("-")
        ));
    }

    fn idle(&self) {
        self.push("idle".to_string());
    }

    fn notify(&self, title: &str, _body: &str) {
        self.push(format!("notify:{}", title));
    }

    fn screenshot_count(&self, count: usize) {
        self.push(format!("screenshots:{}", count));
    }
}

/// Upload that was handed to the fake backend.
#[derive(Debug, Clone)]
pub struct SubmittedUpload {
    pub artifact: RecordingArtifact,
    pub metadata: UploadMetadata,
}

/// Meeting backend answering status polls from a script.
#[derive(Debug, Clone, Default)]
pub struct FakeMeetingBackend {
    uploads: Arc<Mutex<Vec<SubmittedUpload>>>,
    statuses: Arc<Mutex<VecDeque<Result<JobStatusResponse, UploadError>>>>,
    status_requests: Arc<AtomicUsize>,
    reject_uploads: bool,
    upload_delay: Option<Duration>,
}

impl FakeMeetingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status answers in order; once exhausted every poll reports `completed`.
    pub fn with_statuses(self, statuses: Vec<Result<JobStatus, UploadError>>) -> Self {
        {
            let mut queue = lock(&self.statuses);
            for status in statuses {
                queue.push_back(status.map(|status| JobStatusResponse {
                    status,
                    error: None,
                }));
            }
        }
        self
    }

    pub fn rejecting_uploads(mut self) -> Self {
        self.reject_uploads = true;
        self
    }

    /// Uploads take this long before they are recorded.
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    pub fn uploads(&self) -> Vec<SubmittedUpload> {
        lock(&self.uploads).clone()
    }

    pub fn status_requests(&self) -> usize {
        self.status_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MeetingBackend for FakeMeetingBackend {
    async fn upload(
        &self,
        artifact: &RecordingArtifact,
        metadata: &UploadMetadata,
    ) -> Result<UploadReceipt, UploadError> {
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_uploads {
            return Err(UploadError::Rejected {
                status: 500,
                body: "storage offline".to_string(),
            });
        }
        let mut uploads = lock(&self.uploads);
        uploads.push(SubmittedUpload {
            artifact: artifact.clone(),
            metadata: metadata.clone(),
        });
        Ok(UploadReceipt {
            job_id: format!("job-{}", uploads.len()),
            meeting_id: format!("meeting-{}", uploads.len()),
        })
    }

    async fn job_status(&self, _job_id: &str) -> Result<JobStatusResponse, UploadError> {
        self.status_requests.fetch_add(1, Ordering::SeqCst);
        lock(&self.statuses).pop_front().unwrap_or(Ok(JobStatusResponse {
            status: JobStatus::Completed,
            error: None,
        }))
    }
}

/// A session orchestrator wired to the fakes above.
pub struct SessionRig {
    pub orchestrator: SessionOrchestrator,
    pub audio: FakeAudioBackend,
    pub tabs: FakeTabs,
    pub backend: FakeMeetingBackend,
    pub indicator: RecordingIndicator,
    pub bus: MessageBus,
    pub events: EventBus,
    pub settings: SettingsHandle,
    pub matcher: Arc<PlatformMatcher>,
}

impl SessionRig {
    /// Encoder chunks every 20ms and a stop bound of 300ms keep tests fast.
    pub fn new(config: Config, audio: FakeAudioBackend, backend: FakeMeetingBackend) -> Self {
        let bus = MessageBus::new();
        let events = EventBus::default();
        let tabs = FakeTabs::new();
        let indicator = RecordingIndicator::new();
        let matcher = Arc::new(PlatformMatcher::with_extra(&config.platforms.extra));
        let poll_interval = config.backend.poll_interval();
        let settings = SettingsHandle::in_memory(config.clone());

        let capture = CaptureCoordinator::new(
            bus.clone(),
            Arc::new(audio.clone()),
            CaptureSettings {
                chunk_interval: Duration::from_millis(20),
                start_timeout: config.recording.start_timeout(),
                stop_timeout: Duration::from_millis(300),
            },
        );

        let orchestrator = SessionOrchestrator::new(SessionServices {
            capture: Arc::new(capture),
            tabs: Arc::new(tabs.clone()),
            matcher: matcher.clone(),
            settings: settings.clone(),
            bus: bus.clone(),
            uploads: UploadSupervisor::new(
                Arc::new(backend.clone()),
                poll_interval,
                events.clone(),
            ),
            indicator: Arc::new(indicator.clone()),
            events: events.clone(),
            normalizer: ParticipantNormalizer::new().expect("participant pattern compiles"),
        });

        Self {
            orchestrator,
            audio,
            tabs,
            backend,
            indicator,
            bus,
            events,
            settings,
            matcher,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            Config::default(),
            FakeAudioBackend::new(),
            FakeMeetingBackend::new(),
        )
    }
}
