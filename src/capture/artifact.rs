//! Recording artifacts produced once per session at stop.

use super::encoder::{assemble_wav, EncodedChunk};
use super::{CaptureError, Track};

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedTrack {
    pub track: Track,
    pub sample_rate: u32,
    pub chunk_count: usize,
    /// Complete WAV file. Empty when the track's encoder failed.
    pub bytes: Vec<u8>,
}

impl EncodedTrack {
    pub const MIME_TYPE: &'static str = "audio/wav";

    pub fn assemble(
        track: Track,
        sample_rate: u32,
        chunks: &[EncodedChunk],
    ) -> Result<Self, CaptureError> {
        let bytes = assemble_wav(chunks, sample_rate).map_err(|e| CaptureError::EncoderFailed {
            track,
            reason: e.to_string(),
        })?;
        Ok(Self {
            track,
            sample_rate,
            chunk_count: chunks.len(),
            bytes,
        })
    }

    pub fn missing(track: Track, sample_rate: u32) -> Self {
        Self {
            track,
            sample_rate,
            chunk_count: 0,
            bytes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn file_name(&self) -> String {
        format!("{}.wav", self.track.as_str())
    }
}

/// The pair of tracks from one session. Consumed by the upload supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingArtifact {
    pub mic: EncodedTrack,
    pub tab: EncodedTrack,
}

impl RecordingArtifact {
    pub fn total_bytes(&self) -> usize {
        self.mic.bytes.len() + self.tab.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mic.is_empty() && self.tab.is_empty()
    }
}
