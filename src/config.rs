//! Configuration of the feature computations and of the decay fit.
//!
//! Both structures can be deserialized from JSON; missing fields take their default value.
//!
//! ```rust
//! use ephys_features::config::FeatureConfig;
//!
//! let config = FeatureConfig::from_json(r#"{ "trim_padding": 100.0 }"#).unwrap();
//! assert_eq!(config.trim_padding, 100.0);
//! assert_eq!(config.baseline_window, 500.0);
//! ```
use serde::{Deserialize, Serialize};

use crate::error::FeatureError;

/// Settings of the bounded least-squares solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Maximum number of model evaluations, per parameter.
    pub max_evaluations_per_param: usize,
    /// Tolerance on the relative change of the cost.
    pub ftol: f64,
    /// Tolerance on the relative change of the parameters.
    pub xtol: f64,
    /// Tolerance on the sup-norm of the projected gradient.
    pub gtol: f64,
    /// Initial Levenberg-Marquardt damping.
    pub initial_damping: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            max_evaluations_per_param: 100,
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            initial_damping: 1e-3,
        }
    }
}

impl FitConfig {
    /// Check that the evaluation budget and the damping are positive and that the tolerances
    /// are finite and non-negative.
    pub fn validate(&self) -> Result<(), FeatureError> {
        if self.max_evaluations_per_param == 0 {
            return Err(FeatureError::InvalidParameter(
                "the evaluation budget must be positive".to_string(),
            ));
        }
        for (name, tol) in [("ftol", self.ftol), ("xtol", self.xtol), ("gtol", self.gtol)] {
            if !(tol >= 0.0 && tol.is_finite()) {
                return Err(FeatureError::InvalidParameter(format!(
                    "{} must be finite and non-negative, got {}",
                    name, tol
                )));
            }
        }
        if !(self.initial_damping > 0.0 && self.initial_damping.is_finite()) {
            return Err(FeatureError::InvalidParameter(format!(
                "initial damping must be positive, got {}",
                self.initial_damping
            )));
        }
        Ok(())
    }
}

/// Settings of the derived features. Times in ms, voltages in mV, currents in pA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Padding around the stimulus window when counting spikes.
    pub trim_padding: f64,
    /// Samples before this time define the baseline voltage of the input resistance.
    pub baseline_window: f64,
    /// Start of the current step probing the input resistance.
    pub probe_start: f64,
    /// End of the current step probing the input resistance.
    pub probe_end: f64,
    /// Amplitude of the probing current step.
    pub probe_current: f64,
    /// Step of the uniform grid on which decays are resampled before fitting.
    pub resample_step: f64,
    /// Compute the requested features in parallel (see [`crate::MIN_PARALLEL_FEATURES`]).
    pub parallel: bool,
    /// Settings of the decay fit.
    pub fit: FitConfig,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            trim_padding: 200.0,
            baseline_window: 500.0,
            probe_start: 500.0,
            probe_end: 600.0,
            probe_current: -10.0,
            resample_step: 0.001,
            parallel: false,
            fit: FitConfig::default(),
        }
    }
}

impl FeatureConfig {
    /// Parse a configuration from a JSON string and validate it.
    pub fn from_json(json: &str) -> Result<Self, FeatureError> {
        let config: FeatureConfig = serde_json::from_str(json)
            .map_err(|e| FeatureError::InvalidParameter(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the padding is non-negative, that the windows are finite and ordered, that the
    /// probe current is non-zero and that the resample step is positive. The fit settings are
    /// checked too.
    pub fn validate(&self) -> Result<(), FeatureError> {
        if !(self.trim_padding >= 0.0 && self.trim_padding.is_finite()) {
            return Err(FeatureError::InvalidParameter(format!(
                "trim padding must be finite and non-negative, got {}",
                self.trim_padding
            )));
        }
        if !self.baseline_window.is_finite() {
            return Err(FeatureError::InvalidParameter(
                "baseline window must be finite".to_string(),
            ));
        }
        if !(self.probe_start.is_finite() && self.probe_end.is_finite())
            || self.probe_start > self.probe_end
        {
            return Err(FeatureError::InvalidParameter(format!(
                "invalid probe window [{}, {}]",
                self.probe_start, self.probe_end
            )));
        }
        if !(self.probe_current != 0.0 && self.probe_current.is_finite()) {
            return Err(FeatureError::InvalidParameter(format!(
                "probe current must be finite and non-zero, got {}",
                self.probe_current
            )));
        }
        if !(self.resample_step > 0.0 && self.resample_step.is_finite()) {
            return Err(FeatureError::InvalidParameter(format!(
                "resample step must be positive, got {}",
                self.resample_step
            )));
        }
        self.fit.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(FeatureConfig::default().validate(), Ok(()));
        assert_eq!(FitConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_from_json() {
        let config =
            FeatureConfig::from_json(r#"{ "resample_step": 0.1, "fit": { "ftol": 1e-10 } }"#)
                .unwrap();
        assert_eq!(config.resample_step, 0.1);
        assert_eq!(config.fit.ftol, 1e-10);
        assert_eq!(config.fit.xtol, 1e-8);
        assert_eq!(config.probe_current, -10.0);

        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(FeatureConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            FeatureConfig::from_json(r#"{ "resample_step": 0.0 }"#),
            Err(FeatureError::InvalidParameter(_))
        ));
        assert!(matches!(
            FeatureConfig::from_json(r#"{ "probe_start": 600.0, "probe_end": 500.0 }"#),
            Err(FeatureError::InvalidParameter(_))
        ));
        assert!(matches!(
            FeatureConfig::from_json("not json"),
            Err(FeatureError::InvalidParameter(_))
        ));

        let config = FitConfig {
            max_evaluations_per_param: 0,
            ..FitConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
