//! Run settings with their documented defaults.

use crate::errors::{ConfigError, Result};
use crate::purify::check_unit_interval;
use serde::{Deserialize, Serialize};

/// Settings of the droplet-loading model fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FitConfig {
    /// Number of generated droplets used to seed the first stage.
    pub initial_drop_num: f64,
    /// Capture rate used to seed the first stage.
    pub initial_capture_rate: f64,
    /// Simplex iterations allowed per stage, summed over restarts.
    pub max_iterations: usize,
    /// Convergence tolerance on the spread of objective values across the simplex.
    pub tolerance: f64,
    /// Number of times the simplex is rebuilt around the best point after it converges.
    pub max_restarts: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            initial_drop_num: 80_000.0,
            initial_capture_rate: 0.5,
            max_iterations: 20_000,
            tolerance: 1e-10,
            max_restarts: 4,
        }
    }
}

impl FitConfig {
    /// Reject unusable settings.
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_drop_num.is_finite() && self.initial_drop_num > 0.0) {
            return Err(ConfigError::InvalidFitSetting(format!(
                "initial_drop_num must be positive, got {}",
                self.initial_drop_num
            ))
            .into());
        }
        if !(self.initial_capture_rate > 0.0 && self.initial_capture_rate <= 1.0) {
            return Err(ConfigError::InvalidFitSetting(format!(
                "initial_capture_rate must be in (0, 1], got {}",
                self.initial_capture_rate
            ))
            .into());
        }
        if self.max_iterations == 0 {
            return Err(
                ConfigError::InvalidFitSetting("max_iterations must be positive".into()).into(),
            );
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ConfigError::InvalidFitSetting(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            ))
            .into());
        }
        Ok(())
    }
}

/// Settings of a GMM-Demux run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemuxConfig {
    /// Tagged droplets below this confidence are reported as unclear.
    pub confidence_threshold: f64,
    /// Chance that the clustering leaks a phony droplet into a pure cluster.
    pub ambiguous_rate: f64,
    /// Loading-model fit settings.
    pub fit: FitConfig,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        DemuxConfig {
            confidence_threshold: 0.8,
            ambiguous_rate: 0.05,
            fit: FitConfig::default(),
        }
    }
}

impl DemuxConfig {
    /// Reject unusable settings. Called once before a run starts.
    pub fn validate(&self) -> Result<()> {
        check_unit_interval("confidence threshold", self.confidence_threshold)?;
        check_unit_interval("ambiguous rate", self.ambiguous_rate)?;
        self.fit.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DemuxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.confidence_threshold, 0.8);
        assert_eq!(config.ambiguous_rate, 0.05);
    }

    #[test]
    fn out_of_range_values() {
        let mut config = DemuxConfig {
            confidence_threshold: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.confidence_threshold = 0.5;
        config.ambiguous_rate = 0.0;
        assert!(config.validate().is_err());
        config.ambiguous_rate = 0.1;
        config.fit.initial_capture_rate = 1.5;
        assert!(config.validate().is_err());
    }
}
