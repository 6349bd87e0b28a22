//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RecorderError, RecorderResult};

/// Frame rates the recorder accepts. Anything else falls back to the first.
pub const SUPPORTED_FPS: [u32; 2] = [30, 60];

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Directory recordings are written to. `None` uses the platform default.
    pub output_dir: Option<PathBuf>,

    /// Default recording settings.
    pub recording: RecordingDefaults,

    /// Disk space watchdog settings.
    pub storage: StorageDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Target FPS (30 or 60).
    pub fps: u32,

    /// Audio sample rate in Hz.
    pub audio_sample_rate: u32,

    /// Audio channel count.
    pub audio_channels: u16,

    /// Throttle fps/bitrate while on battery.
    pub apply_power_clamp: bool,

    /// Keep recording video when the audio source fails to initialize.
    pub audio_optional: bool,
}

/// Disk space watchdog parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageDefaults {
    /// Recording auto-stops once free space drops below this many bytes.
    pub min_free_bytes: u64,

    /// How often free space is sampled.
    pub poll_interval_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "steadyrec=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            recording: RecordingDefaults::default(),
            storage: StorageDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            audio_sample_rate: 48000,
            audio_channels: 2,
            apply_power_clamp: true,
            audio_optional: false,
        }
    }
}

impl Default for StorageDefaults {
    fn default() -> Self {
        Self {
            min_free_bytes: 500 * 1024 * 1024,
            poll_interval_ms: 5000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl RecordingDefaults {
    /// Encoder bitrate implied by the frame rate.
    pub fn bitrate_bps(&self) -> u32 {
        if self.fps == 60 {
            14_000_000
        } else {
            8_000_000
        }
    }

    /// Replace out-of-range values with defaults.
    pub fn normalize(&mut self) {
        if !SUPPORTED_FPS.contains(&self.fps) {
            tracing::warn!(fps = self.fps, "Unsupported fps in config, using 30");
            self.fps = SUPPORTED_FPS[0];
        }
        if self.audio_sample_rate == 0 {
            self.audio_sample_rate = 48000;
        }
        if self.audio_channels == 0 {
            self.audio_channels = 2;
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load_from(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                Self::default()
            }
        }
    }

    /// Load and normalize config from an explicit path.
    pub fn load_from(path: &Path) -> RecorderResult<Self> {
        if !path.exists() {
            return Err(RecorderError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = serde_json::from_str(&content)?;
        config.recording.normalize();
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> RecorderResult<()> {
        self.save_to(&config_file_path())
    }

    /// Save config to an explicit path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> RecorderResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), "Config saved");
        Ok(())
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("steadyrec").join("config.json")
}
