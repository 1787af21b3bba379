//! Microphone capture via cpal.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::audio_source::AudioSource;

pub struct MicAudioSource {
    label: String,
    stream: Option<cpal::Stream>,
    sample_rate: u32,
}

impl MicAudioSource {
    /// Open the default input device and start streaming mono frames into `sink`.
    pub fn open(sink: mpsc::UnboundedSender<Vec<f32>>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .context("No input device available for meeting mic capture")?;

        let label = device.name().unwrap_or_else(|_| "unknown".to_string());
        let default_config = device
            .default_input_config()
            .context("Input device has no usable configuration")?;
        let sample_rate = default_config.sample_rate().0;

        info!("Meeting mic source using device: {} ({}Hz)", label, sample_rate);

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_fn = |err| error!("Meeting mic stream error: {}", err);

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = sink.send(data.to_vec());
            },
            err_fn,
            None,
        )?;

        stream.play().context("Failed to start microphone stream")?;

        Ok(Self {
            label,
            stream: Some(stream),
            sample_rate,
        })
    }
}

impl AudioSource for MicAudioSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    fn release(&mut self) {
        // Dropping the stream stops the device and closes the frame channel
        if let Some(stream) = self.stream.take() {
            debug!("Stopping meeting mic stream");
            drop(stream);
            info!("Meeting mic released");
        }
    }
}

impl Drop for MicAudioSource {
    fn drop(&mut self) {
        if self.is_active() {
            debug!("Dropping active MicAudioSource, cleaning up");
            self.release();
        }
    }
}
