//! Chunked PCM encoder.
//!
//! Each encoder drains one source's frame stream and cuts a 16-bit PCM chunk
//! every timeslice, so even a capture that dies mid-session leaves whole
//! chunks behind. Stopping flushes whatever is buffered and acknowledges
//! with the full chunk list.

use std::io::Cursor;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::{CaptureError, Track};

/// One timeslice of encoded audio (little-endian i16 mono PCM).
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub seq: u32,
    pub data: Vec<u8>,
}

impl EncodedChunk {
    fn from_samples(seq: u32, samples: &[f32]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            data.extend_from_slice(&value.to_le_bytes());
        }
        Self { seq, data }
    }

    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }
}

/// Stop acknowledgement: every chunk the encoder produced, in order.
pub type StopAck = Result<Vec<EncodedChunk>, CaptureError>;

pub trait TrackEncoder {
    fn track(&self) -> Track;

    fn sample_rate(&self) -> u32;

    /// Signal the encoder to stop. The receiver resolves once the encoder has
    /// flushed; it may never resolve if the encoder is wedged.
    fn stop(&mut self) -> oneshot::Receiver<StopAck>;
}

pub struct ChunkedEncoder {
    track: Track,
    sample_rate: u32,
    stop_tx: Option<oneshot::Sender<()>>,
    done_rx: Option<oneshot::Receiver<StopAck>>,
}

impl ChunkedEncoder {
    /// Start encoding on the current runtime.
    pub fn spawn(
        track: Track,
        frames: mpsc::UnboundedReceiver<Vec<f32>>,
        sample_rate: u32,
        timeslice: Duration,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            let chunks = run_encoder(track, frames, timeslice, stop_rx).await;
            let _ = done_tx.send(Ok(chunks));
        });

        debug!("{} encoder started ({}Hz, {:?} chunks)", track, sample_rate, timeslice);

        Self {
            track,
            sample_rate,
            stop_tx: Some(stop_tx),
            done_rx: Some(done_rx),
        }
    }
}

impl TrackEncoder for ChunkedEncoder {
    fn track(&self) -> Track {
        self.track
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn stop(&mut self) -> oneshot::Receiver<StopAck> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        self.done_rx.take().unwrap_or_else(|| {
            // Already stopped: hand back a receiver that reports the fact.
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(Err(CaptureError::EncoderFailed {
                track: self.track,
                reason: "encoder already stopped".to_string(),
            }));
            rx
        })
    }
}

async fn run_encoder(
    track: Track,
    mut frames: mpsc::UnboundedReceiver<Vec<f32>>,
    timeslice: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) -> Vec<EncodedChunk> {
    let mut chunks = Vec::new();
    let mut pending: Vec<f32> = Vec::new();
    let mut input_open = true;

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + timeslice, timeslice);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = frames.recv(), if input_open => match frame {
                Some(samples) => pending.extend_from_slice(&samples),
                None => {
                    warn!("{} source ended before the encoder was stopped", track);
                    input_open = false;
                }
            },
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    chunks.push(EncodedChunk::from_samples(chunks.len() as u32, &pending));
                    pending.clear();
                }
            }
            _ = &mut stop_rx => break,
        }
    }

    // Flush frames that arrived before the stop signal
    while let Ok(samples) = frames.try_recv() {
        pending.extend_from_slice(&samples);
    }
    if !pending.is_empty() {
        chunks.push(EncodedChunk::from_samples(chunks.len() as u32, &pending));
    }

    debug!("{} encoder stopped with {} chunks", track, chunks.len());
    chunks
}

/// Concatenate a track's chunks into a single WAV file.
pub fn assemble_wav(chunks: &[EncodedChunk], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for chunk in chunks {
            for pair in chunk.data.chunks_exact(2) {
                writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
            }
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}
