//! Latency test configuration
//!
//! Everything the state machine needs to know before the run starts. Values
//! can be loaded from a JSON file; missing fields fall back to defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::report::LatencyError;
use crate::audio::tone::{DEFAULT_TONE_AMPLITUDE, DEFAULT_TONE_FREQUENCY};

/// Number of trials averaged into the final result
pub const DEFAULT_TRIALS: usize = 5;

/// Overall run budget in seconds
pub const DEFAULT_TIME_LIMIT_SECS: u32 = 25;

/// Default period size in frames
pub const DEFAULT_PERIOD_SIZE: usize = 256;

/// Default sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Output periods kept silent after entering play-and-listen
pub const DEFAULT_SILENCE_GUARD_PERIODS: u32 = 2;

/// Lead-in discarded before the ambient measurement
pub const DEFAULT_LEAD_IN_MS: u32 = 200;

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_period_size() -> usize {
    DEFAULT_PERIOD_SIZE
}

fn default_channels() -> u16 {
    1
}

fn default_trials() -> usize {
    DEFAULT_TRIALS
}

fn default_time_limit_secs() -> u32 {
    DEFAULT_TIME_LIMIT_SECS
}

fn default_silence_guard_periods() -> u32 {
    DEFAULT_SILENCE_GUARD_PERIODS
}

fn default_lead_in_ms() -> u32 {
    DEFAULT_LEAD_IN_MS
}

fn default_tone_frequency() -> f64 {
    DEFAULT_TONE_FREQUENCY
}

fn default_tone_amplitude() -> f64 {
    DEFAULT_TONE_AMPLITUDE
}

/// Round-trip latency test configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyConfig {
    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Frames per period, every input block must have exactly this length
    #[serde(default = "default_period_size")]
    pub period_size: usize,
    /// Channel count, only mono is supported
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Number of successful trials to average
    #[serde(default = "default_trials")]
    pub trials: usize,
    /// Run budget in seconds before the driver gives up
    #[serde(default = "default_time_limit_secs")]
    pub time_limit_secs: u32,
    /// Silent output periods at the start of each listening phase
    #[serde(default = "default_silence_guard_periods")]
    pub silence_guard_periods: u32,
    /// Warm-up discarded before measuring ambient noise
    #[serde(default = "default_lead_in_ms")]
    pub lead_in_ms: u32,
    /// Probe tone frequency in Hz
    #[serde(default = "default_tone_frequency")]
    pub tone_frequency: f64,
    /// Probe tone amplitude (0.0 to 1.0)
    #[serde(default = "default_tone_amplitude")]
    pub tone_amplitude: f64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            period_size: default_period_size(),
            channels: default_channels(),
            trials: default_trials(),
            time_limit_secs: default_time_limit_secs(),
            silence_guard_periods: default_silence_guard_periods(),
            lead_in_ms: default_lead_in_ms(),
            tone_frequency: default_tone_frequency(),
            tone_amplitude: default_tone_amplitude(),
        }
    }
}

impl LatencyConfig {
    /// Check the configuration before a run
    pub fn validate(&self) -> Result<(), LatencyError> {
        if self.channels != 1 {
            return Err(LatencyError::UnsupportedChannels(self.channels));
        }
        if !(8000..=384000).contains(&self.sample_rate) {
            return Err(LatencyError::InvalidConfig(format!(
                "sample rate {} Hz out of range",
                self.sample_rate
            )));
        }
        if self.period_size == 0 || self.period_size > self.sample_rate as usize {
            return Err(LatencyError::InvalidConfig(format!(
                "period size {} frames out of range",
                self.period_size
            )));
        }
        if self.trials == 0 {
            return Err(LatencyError::InvalidConfig(
                "at least one trial is required".to_string(),
            ));
        }
        if self.lead_in_ms >= 1000 {
            return Err(LatencyError::InvalidConfig(format!(
                "lead-in of {}ms leaves no ambient measurement window",
                self.lead_in_ms
            )));
        }
        Ok(())
    }

    /// Lead-in in samples, rounded up to whole periods
    pub fn lead_in_samples(&self) -> usize {
        let raw = self.sample_rate as usize * self.lead_in_ms as usize / 1000;
        raw.div_ceil(self.period_size) * self.period_size
    }

    /// Total frames the driver may run before giving up
    pub fn frame_budget(&self) -> u64 {
        self.time_limit_secs as u64 * self.sample_rate as u64
    }

    /// Default config file path: `<config_dir>/latencytester/config.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("latencytester")
            .join("config.json")
    }

    /// Load config from disk, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LatencyConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.trials, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"sample_rate": 44100, "trials": 3}"#;
        let config: LatencyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.trials, 3);
        assert_eq!(config.period_size, DEFAULT_PERIOD_SIZE);
        assert_eq!(config.silence_guard_periods, DEFAULT_SILENCE_GUARD_PERIODS);
    }

    #[test]
    fn test_rejects_stereo() {
        let config = LatencyConfig {
            channels: 2,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LatencyError::UnsupportedChannels(2))
        ));
    }

    #[test]
    fn test_rejects_zero_trials_and_period() {
        let config = LatencyConfig {
            trials: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LatencyError::InvalidConfig(_))));

        let config = LatencyConfig {
            period_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LatencyError::InvalidConfig(_))));
    }

    #[test]
    fn test_lead_in_rounds_up_to_period() {
        let config = LatencyConfig {
            sample_rate: 44100,
            period_size: 256,
            ..Default::default()
        };
        // 200ms at 44.1kHz = 8820 samples -> 35 periods of 256
        assert_eq!(config.lead_in_samples(), 8960);

        let config = LatencyConfig {
            lead_in_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.lead_in_samples(), 0);
    }

    #[test]
    fn test_default_path_in_config_dir() {
        let path = LatencyConfig::default_path();
        assert!(path.ends_with(Path::new("latencytester").join("config.json")));
        if let Some(config_dir) = dirs::config_dir() {
            assert!(path.starts_with(config_dir));
        }
    }

    #[test]
    fn test_frame_budget() {
        let config = LatencyConfig::default();
        assert_eq!(config.frame_budget(), 25 * 48000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = LatencyConfig {
            sample_rate: 96000,
            period_size: 128,
            silence_guard_periods: 4,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = LatencyConfig::load(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = LatencyConfig::load(&dir.path().join("absent.json"));
        assert_eq!(loaded, LatencyConfig::default());
    }

    #[test]
    fn test_load_garbage_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(LatencyConfig::load(&path), LatencyConfig::default());
    }
}
