//! Dual-track audio capture.
//!
//! The capture host is an ephemeral context (its own thread and
//! single-threaded runtime) that owns the microphone and tab-audio sources
//! and one encoder per source. The coordinator, living in the background
//! context, drives it over the message bus with `START_RECORDING` and
//! `STOP_RECORDING`.

pub mod artifact;
pub mod audio_source;
pub mod barrier;
pub mod coordinator;
pub mod encoder;
pub mod host;
pub mod mic_source;
pub mod tab_source;

pub use artifact::{EncodedTrack, RecordingArtifact};
pub use audio_source::{AcquiredSource, AudioBackend, AudioSource, CpalBackend, MicConstraints};
pub use barrier::{join_both, BarrierOutcome};
pub use coordinator::{CaptureCoordinator, CaptureSettings};
pub use encoder::{ChunkedEncoder, EncodedChunk, StopAck, TrackEncoder};
pub use host::{CaptureHost, HostHandle};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which of the two synchronized tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    /// Primary track: the local microphone.
    Mic,
    /// Secondary track: audio of the meeting tab.
    Tab,
}

impl Track {
    pub fn as_str(&self) -> &'static str {
        match self {
            Track::Mic => "mic",
            Track::Tab => "tab",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CaptureError {
    #[error("microphone unavailable: {0}")]
    MicrophoneDenied(String),
    #[error("tab audio unavailable: {0}")]
    TabAudioDenied(String),
    #[error("a capture is already running")]
    AlreadyRecording,
    #[error("no capture is running")]
    NotRecording,
    #[error("encoders did not stop within {0}s")]
    StopTimeout(u64),
    #[error("{track} encoder failed: {reason}")]
    EncoderFailed { track: Track, reason: String },
    #[error("both encoders failed (mic: {mic}; tab: {tab})")]
    EncodersFailed { mic: String, tab: String },
    #[error("capture host unavailable: {0}")]
    HostUnavailable(String),
}

impl CaptureError {
    /// Source acquisition was refused (permission denied, no device).
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            CaptureError::MicrophoneDenied(_) | CaptureError::TabAudioDenied(_)
        )
    }
}
