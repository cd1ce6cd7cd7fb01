//! Interface to the spike detection library.
//!
//! A detector computes named feature arrays (spike onset voltages, peak voltages, inter-spike
//! intervals, ...) on traces. The derived features of [`crate::features`] are built on top of it.
//! [`ThresholdDetector`] is a reference detector based on threshold crossings.
use std::collections::HashMap;

use crate::error::FeatureError;
use crate::trace::Trace;

pub mod threshold;

pub use threshold::ThresholdDetector;

/// Voltage at the onset of each action potential.
pub const AP_BEGIN_VOLTAGE: &str = "AP_begin_voltage";
/// Peak voltage of the first action potential.
pub const AP1_PEAK: &str = "AP1_peak";
/// Peak voltage of the second action potential.
pub const AP2_PEAK: &str = "AP2_peak";
/// All the intervals between consecutive spikes.
pub const ALL_ISI_VALUES: &str = "all_ISI_values";
/// Time of the first spike after the stimulus onset, relative to the stimulus onset.
pub const TIME_TO_FIRST_SPIKE: &str = "time_to_first_spike";

/// Named feature arrays computed on one trace. Arrays may be empty, and a missing name means
/// that the detector could not compute a value.
pub type FeatureArrays = HashMap<String, Vec<f64>>;

/// A spike detector computing named feature arrays on traces.
pub trait SpikeDetector: Sync {
    /// Returns true if the detector knows the feature.
    fn provides(&self, name: &str) -> bool;

    /// Compute the requested features on each trace, one map per trace.
    /// The function returns an error for unknown features or malformed traces.
    fn detect(&self, traces: &[Trace], names: &[&str]) -> Result<Vec<FeatureArrays>, FeatureError>;

    /// Compute the requested features on a single trace.
    fn detect_one(&self, trace: &Trace, names: &[&str]) -> Result<FeatureArrays, FeatureError> {
        self.detect(std::slice::from_ref(trace), names)?
            .pop()
            .ok_or_else(|| {
                FeatureError::DetectionUnavailable("the detector returned no result".to_string())
            })
    }
}

impl<D: SpikeDetector + ?Sized> SpikeDetector for &D {
    fn provides(&self, name: &str) -> bool {
        (**self).provides(name)
    }

    fn detect(&self, traces: &[Trace], names: &[&str]) -> Result<Vec<FeatureArrays>, FeatureError> {
        (**self).detect(traces, names)
    }
}

impl<D: SpikeDetector + ?Sized> SpikeDetector for Box<D> {
    fn provides(&self, name: &str) -> bool {
        (**self).provides(name)
    }

    fn detect(&self, traces: &[Trace], names: &[&str]) -> Result<Vec<FeatureArrays>, FeatureError> {
        (**self).detect(traces, names)
    }
}
