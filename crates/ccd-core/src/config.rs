//! Capture configuration.
//!
//! Values are layered with figment: built-in defaults, then an optional TOML
//! file, then `CCD_`-prefixed environment variables
//! (`CCD_TICK_PERIOD_MS=500`). The result is validated before use.
//!
//! ```toml
//! tick_period_ms = 250
//! max_exposure_retries = 3
//! temp_threshold_c = 0.25
//! temp_poll_divisor = 4
//! ```

use crate::error::CaptureError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Error types for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Parse error (invalid TOML or wrong types)
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Semantic validation error
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for CaptureError {
    fn from(err: ConfigError) -> Self {
        CaptureError::Configuration(err.to_string())
    }
}

/// Tunables for one capture session and the host that drives it.
///
/// The spin-poll bound and the guide guard are empirical hardware constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Period of the external tick loop.
    pub tick_period_ms: u64,
    /// Status-query failures tolerated per exposure before giving up.
    pub max_exposure_retries: u8,
    /// Temperature convergence band in degrees Celsius.
    pub temp_threshold_c: f64,
    /// Temperature is refreshed every N ticks.
    pub temp_poll_divisor: u32,
    /// Remaining exposure time below which completion polling starts.
    pub exposure_epsilon_s: f64,
    /// Sleep between completion polls.
    pub spin_poll_quantum_ms: u64,
    /// Polls before a completion wait counts as a status failure.
    pub spin_poll_max_iterations: u32,
    /// Subtracted from long guide pulse timers to absorb scheduling slack.
    pub guide_guard_ms: u64,
    /// Tail margin appended to frame buffers.
    pub frame_safety_margin: usize,
    /// zlib level for compressed streaming.
    pub compression_level: u32,
    /// Per-frame exposure while streaming.
    pub stream_exposure_s: f64,
    /// Frames buffered between the worker and the session.
    pub stream_queue_depth: usize,
    /// Wrap devices in a handle-access lock.
    pub serialize_device_access: bool,
    /// Cameras the host will open.
    pub max_devices: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 250,
            max_exposure_retries: 3,
            temp_threshold_c: 0.25,
            temp_poll_divisor: 4,
            exposure_epsilon_s: 0.05,
            spin_poll_quantum_ms: 50,
            spin_poll_max_iterations: 50,
            guide_guard_ms: 50,
            frame_safety_margin: crate::frame::DEFAULT_SAFETY_MARGIN,
            compression_level: 4,
            stream_exposure_s: 0.1,
            stream_queue_depth: 4,
            serialize_device_access: false,
            max_devices: 4,
        }
    }
}

impl CaptureConfig {
    /// Load from an optional TOML file plus `CCD_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(CaptureConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            debug!("Loading capture config from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        let config: CaptureConfig = figment
            .merge(Env::prefixed("CCD_"))
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        info!(
            tick_period_ms = config.tick_period_ms,
            max_exposure_retries = config.max_exposure_retries,
            "Loaded capture config"
        );
        Ok(config)
    }

    /// Parse a TOML string on top of the defaults. No environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: CaptureConfig = Figment::from(Serialized::defaults(CaptureConfig::default()))
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field and report all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.tick_period_ms == 0 {
            problems.push("tick_period_ms must be > 0".to_string());
        }
        if self.max_exposure_retries == 0 {
            problems.push("max_exposure_retries must be >= 1".to_string());
        }
        if !(self.temp_threshold_c.is_finite() && self.temp_threshold_c > 0.0) {
            problems.push("temp_threshold_c must be finite and > 0".to_string());
        }
        if self.temp_poll_divisor == 0 {
            problems.push("temp_poll_divisor must be >= 1".to_string());
        }
        if !(self.exposure_epsilon_s.is_finite() && self.exposure_epsilon_s >= 0.0) {
            problems.push("exposure_epsilon_s must be finite and >= 0".to_string());
        }
        if self.spin_poll_quantum_ms == 0 || self.spin_poll_quantum_ms > self.tick_period_ms {
            problems.push(format!(
                "spin_poll_quantum_ms must be in 1..={} (tick period)",
                self.tick_period_ms
            ));
        }
        if self.spin_poll_max_iterations == 0 {
            problems.push("spin_poll_max_iterations must be >= 1".to_string());
        }
        if self.guide_guard_ms >= self.tick_period_ms {
            problems.push("guide_guard_ms must be below tick_period_ms".to_string());
        }
        if self.compression_level > 9 {
            problems.push(format!(
                "compression_level {} out of range 0..=9",
                self.compression_level
            ));
        }
        if !(self.stream_exposure_s.is_finite() && self.stream_exposure_s > 0.0) {
            problems.push("stream_exposure_s must be finite and > 0".to_string());
        }
        if self.stream_queue_depth == 0 {
            problems.push("stream_queue_depth must be >= 1".to_string());
        }
        if self.max_devices == 0 {
            problems.push("max_devices must be >= 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError(problems.join("; ")))
        }
    }

    /// Period of the host tick loop.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    /// Sleep between status polls during a spin-poll.
    pub fn spin_poll_quantum(&self) -> Duration {
        Duration::from_millis(self.spin_poll_quantum_ms)
    }

    /// How early a guide timer fires before the pulse ends.
    pub fn guide_guard(&self) -> Duration {
        Duration::from_millis(self.guide_guard_ms)
    }

    /// Video read timeout for a given per-frame exposure.
    pub fn video_timeout(exposure_s: f64) -> Duration {
        Duration::from_secs_f64(exposure_s.max(0.0) * 2.0 + 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_period_ms, 250);
        assert_eq!(config.max_exposure_retries, 3);
        assert_eq!(config.temp_poll_divisor, 4);
        approx::assert_relative_eq!(config.temp_threshold_c, 0.25);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tick_period_ms = 500\nguide_guard_ms = 20").unwrap();

        let config = CaptureConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.tick_period_ms, 500);
        assert_eq!(config.guide_guard_ms, 20);
        assert_eq!(config.spin_poll_max_iterations, 50, "untouched keys keep defaults");
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = CaptureConfig::load(Some(Path::new("/nonexistent/ccd.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_validation_collects_problems() {
        let err = CaptureConfig::from_toml_str("temp_poll_divisor = 0\ncompression_level = 12")
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("temp_poll_divisor"), "{}", message);
        assert!(message.contains("compression_level"), "{}", message);
    }

    #[test]
    fn test_infinite_floats_rejected() {
        let err = CaptureConfig::from_toml_str(
            "stream_exposure_s = inf\ntemp_threshold_c = inf\nexposure_epsilon_s = inf",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        let message = err.to_string();
        for key in ["stream_exposure_s", "temp_threshold_c", "exposure_epsilon_s"] {
            assert!(message.contains(key), "{} missing from {}", key, message);
        }

        let err = CaptureConfig::from_toml_str("stream_exposure_s = nan").unwrap_err();
        assert!(err.to_string().contains("stream_exposure_s"));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let err = CaptureConfig::from_toml_str("tick_period_ms = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_video_timeout() {
        assert_eq!(CaptureConfig::video_timeout(1.0), Duration::from_millis(2500));
        assert_eq!(CaptureConfig::video_timeout(0.0), Duration::from_millis(500));
    }

    #[test]
    fn test_config_error_converts_to_capture_error() {
        let err: CaptureError = ConfigError::ValidationError("bad".into()).into();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
