//! Audio source abstraction for the capture host.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::encoder::{ChunkedEncoder, TrackEncoder};
use super::mic_source::MicAudioSource;
use super::tab_source::TabAudioSource;
use super::{CaptureError, Track};
use crate::tabs::CaptureTarget;

/// A live audio input. Frames flow into the channel handed out at
/// acquisition until the source is released.
///
/// Sources are created and dropped on the capture host thread, so they do
/// not need to be `Send` (`cpal::Stream` is not).
pub trait AudioSource {
    fn label(&self) -> &str;

    /// The sample rate of delivered frames.
    fn sample_rate(&self) -> u32;

    fn is_active(&self) -> bool;

    /// Stop the underlying device. Calling it twice is harmless.
    fn release(&mut self);
}

/// An acquired source together with its frame stream.
pub struct AcquiredSource {
    pub source: Box<dyn AudioSource>,
    pub frames: mpsc::UnboundedReceiver<Vec<f32>>,
}

/// Processing requested from the microphone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for MicConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Factory for sources and encoders, shared with the capture host thread.
pub trait AudioBackend: Send + Sync {
    fn open_microphone(&self, constraints: &MicConstraints) -> Result<AcquiredSource, CaptureError>;

    fn open_tab_audio(&self, target: &CaptureTarget) -> Result<AcquiredSource, CaptureError>;

    fn encoder(
        &self,
        track: Track,
        frames: mpsc::UnboundedReceiver<Vec<f32>>,
        sample_rate: u32,
        timeslice: Duration,
    ) -> Box<dyn TrackEncoder> {
        Box::new(ChunkedEncoder::spawn(track, frames, sample_rate, timeslice))
    }
}

/// Real devices through cpal: the default input for the microphone and a
/// PipeWire/PulseAudio monitor source for tab audio.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_microphone(&self, constraints: &MicConstraints) -> Result<AcquiredSource, CaptureError> {
        // cpal exposes raw devices; echo cancellation and friends are left to
        // the sound server (e.g. PipeWire's echo-cancel module).
        debug!("Opening microphone with {:?}", constraints);
        let (tx, frames) = mpsc::unbounded_channel();
        let source = MicAudioSource::open(tx)
            .map_err(|e| CaptureError::MicrophoneDenied(format!("{e:#}")))?;
        Ok(AcquiredSource {
            source: Box::new(source),
            frames,
        })
    }

    fn open_tab_audio(&self, target: &CaptureTarget) -> Result<AcquiredSource, CaptureError> {
        let (tx, frames) = mpsc::unbounded_channel();
        let source = TabAudioSource::open(target, tx)
            .map_err(|e| CaptureError::TabAudioDenied(format!("{e:#}")))?;
        Ok(AcquiredSource {
            source: Box::new(source),
            frames,
        })
    }
}
