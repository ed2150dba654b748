//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global configuration for the assembly pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// External encoder binary invoked for audio stitching.
    pub encoder_bin: PathBuf,

    /// Explicit path to the compositor worker binary. When `None`, callers
    /// are expected to resolve the binary themselves (e.g. from a bundled
    /// toolchain directory).
    pub compositor_bin: Option<PathBuf>,

    /// Default audio settings used when a render job does not override them.
    pub audio: AudioDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default audio encoding parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDefaults {
    /// Default audio bitrate passed to the encoder (e.g. "320k").
    pub bitrate: String,

    /// Default audio codec name.
    pub codec: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "renderweld=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            encoder_bin: PathBuf::from("ffmpeg"),
            compositor_bin: None,
            audio: AudioDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for AudioDefaults {
    fn default() -> Self {
        Self {
            bitrate: "320k".to_string(),
            codec: "aac".to_string(),
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

impl AssemblyConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("renderweld").join("config.json")
}
