use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TrackerError};
use crate::types::FEATURE_COUNT;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // ── Gravity filter ──
    pub cutoff_hz: f64,
    pub sample_rate_hz: f64,

    // ── Sensors ──
    pub sensor_interval_ms: u64,
    pub channel_capacity: usize,

    // ── Windowing ──
    pub window_size: usize,
    pub retain_after_inference: usize,

    // ── Scheduling ──
    pub prediction_period_ms: u64,
    pub position_interval_ms: u64,

    // ── Statistics ──
    /// Seconds of activity credited to each stored prediction.
    pub seconds_per_prediction: u64,

    // ── Standardisation, per feature channel ──
    pub feature_mean: [f64; FEATURE_COUNT],
    pub feature_std: [f64; FEATURE_COUNT],
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cutoff_hz: 0.3,
            sample_rate_hz: 50.0,
            sensor_interval_ms: 20,
            channel_capacity: 500,
            window_size: 128,
            retain_after_inference: 64,
            prediction_period_ms: 2600,
            position_interval_ms: 5000,
            seconds_per_prediction: 3,
            feature_mean: [
                0.804749279,
                0.0287554865,
                0.0864980163,
                -0.000636303058,
                -0.000292296856,
                -0.000275299412,
                0.000506464674,
                -0.000823780831,
                0.000112948439,
            ],
            feature_std: [
                0.41411195, 0.39099543, 0.35776881, 0.19484634, 0.12242748, 0.10687881,
                0.40681506, 0.38185432, 0.25574314,
            ],
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file. Missing fields fall back to the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate_hz > 0.0) {
            return Err(invalid("sample_rate_hz must be positive"));
        }
        if !(self.cutoff_hz > 0.0) || self.cutoff_hz >= self.sample_rate_hz / 2.0 {
            return Err(invalid(format!(
                "cutoff_hz must be in (0, {}) for sample_rate_hz {}",
                self.sample_rate_hz / 2.0,
                self.sample_rate_hz
            )));
        }
        if self.sensor_interval_ms == 0 || self.prediction_period_ms == 0 {
            return Err(invalid("sensor and prediction periods must be non-zero"));
        }
        if self.position_interval_ms == 0 {
            return Err(invalid("position_interval_ms must be non-zero"));
        }
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity must be non-zero"));
        }
        if self.window_size == 0 {
            return Err(invalid("window_size must be non-zero"));
        }
        if self.retain_after_inference > self.window_size {
            return Err(invalid(format!(
                "retain_after_inference ({}) exceeds window_size ({})",
                self.retain_after_inference, self.window_size
            )));
        }
        if let Some(i) = self
            .feature_std
            .iter()
            .position(|s| !s.is_finite() || *s == 0.0)
        {
            return Err(invalid(format!("feature_std[{}] must be finite and non-zero", i)));
        }
        if self.feature_mean.iter().any(|m| !m.is_finite()) {
            return Err(invalid("feature_mean must be finite"));
        }
        Ok(())
    }

    pub fn sensor_interval(&self) -> Duration {
        Duration::from_millis(self.sensor_interval_ms)
    }

    pub fn prediction_period(&self) -> Duration {
        Duration::from_millis(self.prediction_period_ms)
    }

    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.position_interval_ms)
    }
}

fn invalid(msg: impl Into<String>) -> TrackerError {
    TrackerError::InvalidParameters(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_cutoff_above_nyquist_rejected() {
        let config = PipelineConfig {
            cutoff_hz: 30.0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TrackerError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_retain_larger_than_window_rejected() {
        let config = PipelineConfig {
            retain_after_inference: 200,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_std_rejected() {
        let mut config = PipelineConfig::default();
        config.feature_std[4] = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("feature_std[4]"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"prediction_period_ms\": 1000}}").unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.prediction_period_ms, 1000);
        assert_eq!(config.window_size, 128);
        assert_eq!(config.retain_after_inference, 64);
    }
}
