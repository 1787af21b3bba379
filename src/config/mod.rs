use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recording: RecordingConfig,
    pub backend: BackendConfig,
    pub api: ApiConfig,
    pub screenshot: ScreenshotConfig,
    pub platforms: PlatformsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Start recording automatically when a meeting tab is detected.
    pub auto_start: bool,
    pub auto_start_delay_seconds: u64,
    /// Cap of the per-session screenshot ring buffer.
    pub max_screenshots: usize,
    /// Label used for the local speaker in participant lists.
    pub default_speaker_label: String,
    /// How often each encoder emits a chunk.
    pub chunk_interval_ms: u64,
    /// Bound on waiting for both encoders to acknowledge a stop.
    pub stop_timeout_seconds: u64,
    /// Bound on the capture host answering a start request.
    pub start_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub poll_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotConfig {
    /// Shell command that writes one image to stdout, e.g. `grim -`.
    /// Empty disables screenshots.
    pub command: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformsConfig {
    pub extra: Vec<PlatformEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformEntry {
    pub domain: String,
    pub name: String,
    #[serde(default)]
    pub priority: u8,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            auto_start: true,
            auto_start_delay_seconds: 5,
            max_screenshots: 20,
            default_speaker_label: "Me".to_string(),
            chunk_interval_ms: 1000,
            stop_timeout_seconds: 5,
            start_timeout_seconds: 10,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            api_token: None,
            poll_interval_seconds: 5,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 3838 }
    }
}

impl RecordingConfig {
    pub fn auto_start_delay(&self) -> Duration {
        Duration::from_secs(self.auto_start_delay_seconds)
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_seconds)
    }
}

impl BackendConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }
}

/// Partial settings update carried by `UPDATE_CONFIG`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    pub auto_start: Option<bool>,
    pub auto_start_delay: Option<u64>,
    pub max_screenshots: Option<usize>,
    pub default_speaker_label: Option<String>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.auto_start.is_none()
            && self.auto_start_delay.is_none()
            && self.max_screenshots.is_none()
            && self.default_speaker_label.is_none()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn apply(&mut self, patch: &ConfigPatch) {
        if let Some(auto_start) = patch.auto_start {
            self.recording.auto_start = auto_start;
        }
        if let Some(delay) = patch.auto_start_delay {
            self.recording.auto_start_delay_seconds = delay;
        }
        if let Some(max) = patch.max_screenshots {
            self.recording.max_screenshots = max;
        }
        if let Some(label) = &patch.default_speaker_label {
            let label = label.trim();
            if !label.is_empty() {
                self.recording.default_speaker_label = label.to_string();
            }
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}

/// Shared, persisted settings. Readers take snapshots; `update` writes through to disk.
#[derive(Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Config>>,
    path: Option<PathBuf>,
}

impl SettingsHandle {
    pub fn new(config: Config, path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// Settings that live only in memory, for tests and one-off tools.
    pub fn in_memory(config: Config) -> Self {
        Self::new(config, None)
    }

    pub async fn get(&self) -> Config {
        self.inner.read().await.clone()
    }

    pub async fn recording(&self) -> RecordingConfig {
        self.inner.read().await.recording.clone()
    }

    pub async fn update(&self, patch: &ConfigPatch) -> Result<Config> {
        let mut config = self.inner.write().await;
        config.apply(patch);
        if let Some(path) = &self.path {
            config.save_to(path)?;
        }
        info!("Settings updated: {:?}", patch);
        Ok(config.clone())
    }
}
