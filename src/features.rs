//! The feature registry: dispatch of feature names to the derived features or to the spike
//! detector, and normalization of every result to a single scalar.
//!
//! Normalization rules:
//! - no value gives [`MISSING_VALUE`],
//! - an empty array gives [`MISSING_VALUE`], except for spike counts (names containing `AP_count`) which give 0,
//! - a non-empty array gives its first element,
//! - an infinite value gives [`MISSING_VALUE`].
//!
//! A feature failing on a trace does not prevent the other features from being computed: the
//! failure is logged, recorded in the [`FeatureReport`], and the feature takes [`MISSING_VALUE`].
use derivative::Derivative;
use log::{trace, warn};
use rayon::prelude::*;
use serde::ser::{Serialize, Serializer};

use crate::config::FeatureConfig;
use crate::detector::SpikeDetector;
use crate::error::FeatureError;
use crate::trace::Trace;
use crate::{MIN_PARALLEL_FEATURES, MISSING_VALUE};

pub mod derived;

pub use derived::DerivedFeature;

/// Substring identifying the spike-count features, for which an empty result means zero.
const COUNT_MARKER: &str = "AP_count";

/// The raw output of a feature computation, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Missing,
    Scalar(f64),
    Array(Vec<f64>),
}

impl From<Option<f64>> for RawValue {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(value) => RawValue::Scalar(value),
            None => RawValue::Missing,
        }
    }
}

impl From<Option<Vec<f64>>> for RawValue {
    fn from(values: Option<Vec<f64>>) -> Self {
        match values {
            Some(values) => RawValue::Array(values),
            None => RawValue::Missing,
        }
    }
}

/// Collapse a raw output into a finite value or [`MISSING_VALUE`].
pub fn normalize(name: &str, raw: RawValue) -> f64 {
    let value = match raw {
        RawValue::Missing => MISSING_VALUE,
        RawValue::Scalar(value) => value,
        RawValue::Array(values) => match values.first() {
            Some(value) => *value,
            None if name.contains(COUNT_MARKER) => 0.0,
            None => MISSING_VALUE,
        },
    };
    match value.is_infinite() {
        true => MISSING_VALUE,
        false => value,
    }
}

/// A resolved feature request.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Feature<'a> {
    Derived(DerivedFeature),
    Detected(&'a str),
}

/// Feature values, in the order of the request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureValues {
    entries: Vec<(String, f64)>,
}

impl FeatureValues {
    /// Returns the value of the feature, if it was requested.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, value)| *value)
    }

    /// Iterate over the (name, value) pairs in the order of the request.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), *value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Returns the number of requested features, duplicates included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for FeatureValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

/// A feature whose computation failed and whose value was replaced by [`MISSING_VALUE`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFailure {
    pub name: String,
    pub error: FeatureError,
}

/// The values of the requested features together with the failures met while computing them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureReport {
    pub values: FeatureValues,
    pub failures: Vec<FeatureFailure>,
}

/// Computes features on traces with a spike detector.
///
/// ```rust
/// use ephys_features::detector::ThresholdDetector;
/// use ephys_features::features::FeatureExtractor;
/// use ephys_features::trace::Trace;
///
/// let time: Vec<f64> = (0..=1000).map(|i| i as f64).collect();
/// let trace = Trace::build(time, vec![-70.0; 1001], 100.0, 900.0).unwrap();
///
/// let extractor = FeatureExtractor::new(ThresholdDetector::default());
/// let values = extractor.get_feature_values(&trace, &["AP_count", "input_resistance", "AP1_amp_rev"]).unwrap();
/// assert_eq!(values.get("AP_count"), Some(0.0));
/// assert_eq!(values.get("input_resistance"), Some(0.0));
/// assert!(values.get("AP1_amp_rev").unwrap().is_nan());
/// ```
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct FeatureExtractor<D> {
    #[derivative(Debug = "ignore")]
    detector: D,
    config: FeatureConfig,
}

impl<D: SpikeDetector> FeatureExtractor<D> {
    /// Create an extractor with the default configuration.
    pub fn new(detector: D) -> Self {
        FeatureExtractor {
            detector,
            config: FeatureConfig::default(),
        }
    }

    /// Create an extractor with the specified configuration.
    /// The function returns an error for an invalid configuration.
    pub fn with_config(detector: D, config: FeatureConfig) -> Result<Self, FeatureError> {
        config.validate()?;
        Ok(FeatureExtractor { detector, config })
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Returns the configuration of the derived features.
    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Returns true if the feature name is known, either locally or by the detector.
    pub fn is_known(&self, name: &str) -> bool {
        DerivedFeature::from_name(name).is_some() || self.detector.provides(name)
    }

    fn resolve<'a, S: AsRef<str>>(&self, names: &'a [S]) -> Result<Vec<Feature<'a>>, FeatureError> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                match DerivedFeature::from_name(name) {
                    Some(feature) => Ok(Feature::Derived(feature)),
                    None if self.detector.provides(name) => Ok(Feature::Detected(name)),
                    None => Err(FeatureError::UnknownFeature(name.to_string())),
                }
            })
            .collect()
    }

    fn compute_raw(&self, trace: &Trace, feature: Feature) -> Result<RawValue, FeatureError> {
        match feature {
            Feature::Derived(derived) => {
                trace!("Computing derived feature {}", derived.name());
                Ok(derived.compute(trace, &self.detector, &self.config)?.into())
            }
            Feature::Detected(name) => {
                trace!("Delegating feature {} to the detector", name);
                let mut arrays = self.detector.detect_one(trace, &[name])?;
                Ok(arrays.remove(name).into())
            }
        }
    }

    fn compute_one(&self, trace: &Trace, feature: Feature) -> (String, f64, Option<FeatureError>) {
        let name = match feature {
            Feature::Derived(derived) => derived.name(),
            Feature::Detected(name) => name,
        };
        match self.compute_raw(trace, feature) {
            Ok(raw) => (name.to_string(), normalize(name, raw), None),
            Err(error) => {
                warn!(
                    "Feature {} replaced by a missing value ({}): {}",
                    name,
                    error.kind(),
                    error
                );
                (name.to_string(), MISSING_VALUE, Some(error))
            }
        }
    }

    /// Compute the requested features on the trace, in the order of the request.
    ///
    /// The function returns an error, before computing anything, if a name is unknown.
    /// Errors met while computing a feature are recorded in the report, and the feature takes [`MISSING_VALUE`].
    pub fn compute_features<S: AsRef<str>>(
        &self,
        trace: &Trace,
        names: &[S],
    ) -> Result<FeatureReport, FeatureError> {
        let features = self.resolve(names)?;

        let results: Vec<(String, f64, Option<FeatureError>)> =
            if self.config.parallel && features.len() >= MIN_PARALLEL_FEATURES {
                features
                    .par_iter()
                    .map(|&feature| self.compute_one(trace, feature))
                    .collect()
            } else {
                features
                    .iter()
                    .map(|&feature| self.compute_one(trace, feature))
                    .collect()
            };

        let mut report = FeatureReport::default();
        for (name, value, error) in results {
            if let Some(error) = error {
                report.failures.push(FeatureFailure {
                    name: name.clone(),
                    error,
                });
            }
            report.values.entries.push((name, value));
        }
        Ok(report)
    }

    /// Compute the requested features on the trace. Every value is finite or [`MISSING_VALUE`].
    pub fn get_feature_values<S: AsRef<str>>(
        &self,
        trace: &Trace,
        names: &[S],
    ) -> Result<FeatureValues, FeatureError> {
        Ok(self.compute_features(trace, names)?.values)
    }
}

/// Compute the requested features on the trace with the default configuration.
///
/// See [`FeatureExtractor::get_feature_values`].
pub fn get_feature_values<D: SpikeDetector, S: AsRef<str>>(
    detector: &D,
    trace: &Trace,
    names: &[S],
) -> Result<FeatureValues, FeatureError> {
    FeatureExtractor::new(detector).get_feature_values(trace, names)
}
