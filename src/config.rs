//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml)
//! - Environment variables (with `APP__` prefix, `__` between sections)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (`APP__SERVER__PORT`, `APP__MEASUREMENT__SETTLE_DELAY_MS`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::analysis::excitation::LogSweep;
use crate::lobby::model::MAX_DELAY_SECS;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub measurement: MeasurementConfig,
    pub excitation: ExcitationConfig,
    pub analysis: AnalysisConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Orchestration timing and lobby limits.
///
/// ## Fields:
/// - `settle_delay_ms`: pause between `begin_recording` and the first `play_sound`
/// - `speaker_window_ms`: playback window granted to each speaker
/// - `max_concurrent_lobbies`: lobbies that may exist at the same time
/// - `default_repetitions` / `default_delay_secs`: used when `create_lobby` omits them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasurementConfig {
    pub settle_delay_ms: u64,
    pub speaker_window_ms: u64,
    pub max_concurrent_lobbies: usize,
    pub default_repetitions: u32,
    pub default_delay_secs: f64,
}

impl MeasurementConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn speaker_window(&self) -> Duration {
        Duration::from_millis(self.speaker_window_ms)
    }
}

/// Reference sweep played by every speaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExcitationConfig {
    pub sample_rate: u32,
    pub duration_secs: f64,
    pub start_hz: f64,
    pub end_hz: f64,
}

impl ExcitationConfig {
    pub fn sweep(&self) -> LogSweep {
        LogSweep {
            start_hz: self.start_hz,
            end_hz: self.end_hz,
            duration_secs: self.duration_secs,
            sample_rate: self.sample_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisConfig {
    /// Impulse-response threshold as a fraction of its peak.
    pub ir_threshold: f64,
    /// Attach the raw impulse response to every result record.
    pub include_impulse_response: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            measurement: MeasurementConfig {
                settle_delay_ms: 1000,
                speaker_window_ms: 6000,
                max_concurrent_lobbies: 32,
                default_repetitions: 1,
                default_delay_secs: 0.0,
            },
            excitation: ExcitationConfig {
                sample_rate: 48_000,
                duration_secs: 5.0,
                start_hz: 20.0,
                end_hz: 20_000.0,
            },
            analysis: AnalysisConfig {
                ir_threshold: 1e-5,
                include_impulse_response: false,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP__SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP__MEASUREMENT__SPEAKER_WINDOW_MS=8000`: Longer playback window
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.measurement.max_concurrent_lobbies == 0 {
            return Err(anyhow::anyhow!("Max concurrent lobbies must be greater than 0"));
        }

        if self.measurement.default_repetitions == 0 {
            return Err(anyhow::anyhow!("Default repetitions must be at least 1"));
        }

        if !(self.measurement.default_delay_secs.is_finite()
            && (0.0..=MAX_DELAY_SECS).contains(&self.measurement.default_delay_secs))
        {
            return Err(anyhow::anyhow!(
                "Default delay must be between 0 and {} seconds",
                MAX_DELAY_SECS
            ));
        }

        let excitation = &self.excitation;
        if excitation.sample_rate == 0 {
            return Err(anyhow::anyhow!("Excitation sample rate must be greater than 0"));
        }

        if !(excitation.duration_secs.is_finite() && excitation.duration_secs > 0.0) {
            return Err(anyhow::anyhow!("Excitation duration must be greater than 0"));
        }

        let nyquist = excitation.sample_rate as f64 / 2.0;
        if !(excitation.start_hz > 0.0
            && excitation.start_hz < excitation.end_hz
            && excitation.end_hz < nyquist)
        {
            return Err(anyhow::anyhow!(
                "Sweep must satisfy 0 < start_hz < end_hz < {} Hz",
                nyquist
            ));
        }

        if !(self.analysis.ir_threshold > 0.0 && self.analysis.ir_threshold < 1.0) {
            return Err(anyhow::anyhow!("ir_threshold must lie in (0, 1)"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// The JSON object is merged into the current configuration, so you can
    /// send just `{"measurement": {"speaker_window_ms": 4000}}`. The result is
    /// validated before it replaces the current values.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let patch: serde_json::Value = serde_json::from_str(json_str)?;
        if !patch.is_object() {
            return Err(anyhow::anyhow!("Configuration update must be a JSON object"));
        }

        let mut merged = serde_json::to_value(&*self)?;
        merge_json(&mut merged, patch);

        let updated: AppConfig = serde_json::from_value(merged)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

fn merge_json(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.measurement.settle_delay(), Duration::from_secs(1));
        assert_eq!(config.measurement.speaker_window(), Duration::from_secs(6));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.excitation.end_hz = 30_000.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.analysis.ir_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.measurement.max_concurrent_lobbies = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.measurement.default_delay_secs = 1e20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "measurement": {"speaker_window_ms": 4000}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.measurement.speaker_window_ms, 4000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.measurement.settle_delay_ms, 1000);
    }

    #[test]
    fn test_invalid_update_leaves_config_untouched() {
        let mut config = AppConfig::default();
        assert!(config
            .update_from_json(r#"{"analysis": {"ir_threshold": 2.0}}"#)
            .is_err());
        assert!(config.update_from_json(r#"{"server": {"port": "x"}}"#).is_err());
        assert!(config.update_from_json("[1, 2]").is_err());
        assert_eq!(config, AppConfig::default());
    }
}
