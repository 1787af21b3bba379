//! Tab audio capture (what the other participants say).
//!
//! Meeting tabs play through the system output, which PipeWire/PulseAudio
//! expose as monitor input devices. The capture-target token names the
//! monitor to use; the generic `monitor` token picks the first one found.

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::audio_source::AudioSource;
use crate::tabs::CaptureTarget;

pub struct TabAudioSource {
    label: String,
    stream: Option<cpal::Stream>,
    sample_rate: u32,
}

impl TabAudioSource {
    pub fn open(target: &CaptureTarget, sink: mpsc::UnboundedSender<Vec<f32>>) -> Result<Self> {
        let (device, label, sample_rate) = find_monitor_device(target)?;

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_fn = |err| error!("Tab audio stream error: {}", err);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = sink.send(data.to_vec());
                },
                err_fn,
                None,
            )
            .context("Failed to build tab audio stream")?;

        stream.play().context("Failed to start tab audio stream")?;
        info!("Tab audio capture started via {}", label);

        Ok(Self {
            label,
            stream: Some(stream),
            sample_rate,
        })
    }
}

fn monitor_matches(device_name: &str, target: &CaptureTarget) -> bool {
    let name = device_name.to_lowercase();
    if target.as_str() == CaptureTarget::DEFAULT_MONITOR {
        name.contains("monitor")
    } else {
        name.contains(&target.as_str().to_lowercase())
    }
}

fn find_monitor_device(target: &CaptureTarget) -> Result<(cpal::Device, String, u32)> {
    let host = cpal::default_host();

    for device in host.input_devices()? {
        let Ok(name) = device.name() else {
            continue;
        };
        if !monitor_matches(&name, target) {
            continue;
        }
        if let Ok(default_config) = device.default_input_config() {
            let sample_rate = default_config.sample_rate().0;
            debug!("Found tab audio monitor: {} ({}Hz)", name, sample_rate);
            return Ok((device, name, sample_rate));
        }
    }

    Err(anyhow!(
        "No monitor source matching '{}'. Ensure PipeWire is running and a monitor source is available.",
        target.as_str()
    ))
}

impl AudioSource for TabAudioSource {
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
        if let Some(stream) = self.stream.take() {
            debug!("Stopping tab audio stream");
            drop(stream);
            info!("Tab audio released");
        }
    }
}

impl Drop for TabAudioSource {
    fn drop(&mut self) {
        if self.is_active() {
            debug!("Dropping active TabAudioSource, cleaning up");
            self.release();
        }
    }
}
