use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::layout::LayoutOptions;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub layout: LayoutConfig,
    pub recording: RecordingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the meeting REST API (join handshake, recordings, uploads).
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub min_tile_width_px: u32,
    pub gap_px: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub fps: u32,
    /// Encoded chunks are flushed to the spool at this interval.
    pub chunk_interval_ms: u64,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub upload_chunk_bytes: u64,
    /// Defaults to `<data_dir>/recordings` when unset.
    pub spool_dir: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api/v1".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            min_tile_width_px: 300,
            gap_px: 16,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            chunk_interval_ms: 1000,
            width: 1280,
            height: 720,
            bitrate: 2_500_000,
            upload_chunk_bytes: 5 * 1024 * 1024,
            spool_dir: None,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}

impl LayoutConfig {
    pub fn options(&self) -> LayoutOptions {
        LayoutOptions {
            min_tile_width_px: self.min_tile_width_px,
            gap_px: self.gap_px,
        }
    }
}

impl RecordingConfig {
    pub fn spool_dir(&self) -> Result<PathBuf> {
        match &self.spool_dir {
            Some(dir) => Ok(dir.clone()),
            None => global::recordings_dir(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
