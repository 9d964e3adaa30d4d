//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// External media tool settings.
    pub encoder: EncoderConfig,

    /// Parent directory for per-export scratch directories.
    /// `None` uses the system temp directory.
    pub scratch_root: Option<PathBuf>,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Locations and time budgets for the external encoder and prober.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Encoder binary (name looked up on `PATH`, or an explicit path).
    pub ffmpeg_path: PathBuf,

    /// Prober binary.
    pub ffprobe_path: PathBuf,

    /// Budget for single-frame thumbnail extraction.
    pub thumbnail_timeout_secs: u64,

    /// Budget for stream probing.
    pub probe_timeout_secs: u64,

    /// Budget for extracting one audio stream to PCM.
    pub extract_timeout_secs: u64,

    /// Budget for each export encode. `None` lets encodes run to completion.
    pub export_timeout_secs: Option<u64>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "montage=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            thumbnail_timeout_secs: 5,
            probe_timeout_secs: 20,
            extract_timeout_secs: 120,
            export_timeout_secs: None,
        }
    }
}

impl EncoderConfig {
    pub fn thumbnail_timeout(&self) -> Duration {
        Duration::from_secs(self.thumbnail_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn export_timeout(&self) -> Option<Duration> {
        self.export_timeout_secs.map(Duration::from_secs)
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

impl AppConfig {
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

    /// Directory new scratch directories are created under.
    pub fn scratch_parent(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
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
    base.join("montage").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let encoder = EncoderConfig::default();
        assert_eq!(encoder.thumbnail_timeout(), Duration::from_secs(5));
        assert_eq!(encoder.probe_timeout(), Duration::from_secs(20));
        assert_eq!(encoder.extract_timeout(), Duration::from_secs(120));
        assert!(encoder.export_timeout().is_none());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"encoder":{"ffmpeg_path":"/opt/ffmpeg/bin/ffmpeg"}}"#)
                .unwrap();
        assert_eq!(
            config.encoder.ffmpeg_path,
            PathBuf::from("/opt/ffmpeg/bin/ffmpeg")
        );
        assert_eq!(config.encoder.ffprobe_path, PathBuf::from("ffprobe"));
        assert_eq!(config.encoder.probe_timeout_secs, 20);
        assert_eq!(config.logging.level, "info");
        assert!(config.scratch_root.is_none());
    }
}
