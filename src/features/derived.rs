//! Features computed locally on top of the spike detector and the decay fit.
//!
//! Every feature takes the caller's trace by reference and only works on new traces derived from
//! it (redefined stimulus window, trimmed samples).
use serde::{Deserialize, Serialize};

use crate::config::FeatureConfig;
use crate::detector::{
    SpikeDetector, ALL_ISI_VALUES, AP1_PEAK, AP2_PEAK, AP_BEGIN_VOLTAGE, TIME_TO_FIRST_SPIKE,
};
use crate::error::FeatureError;
use crate::fit::estimate_time_constant_with;
use crate::trace::Trace;

/// Conversion of the probe response to megaohms: mV to V, pA to A, ohms to megaohms.
const VOLTAGE_SCALE: f64 = 1e-3;
const CURRENT_SCALE: f64 = 1e-12;
const RESISTANCE_SCALE: f64 = 1e-6;

/// The features defined locally, i.e., not delegated to the spike detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DerivedFeature {
    /// Number of spikes around the stimulus window.
    #[serde(rename = "AP_count")]
    ApCount,
    /// Number of spikes from the start of the trace to the stimulus onset.
    #[serde(rename = "AP_count_before_stim")]
    ApCountBeforeStim,
    /// Number of spikes from the stimulus offset to the end of the trace.
    #[serde(rename = "AP_count_after_stim")]
    ApCountAfterStim,
    /// Amplitude of the first spike relative to its onset.
    #[serde(rename = "AP1_amp_rev")]
    Ap1AmpRev,
    /// Amplitude of the second spike relative to the onset of the second spike.
    #[serde(rename = "AP2_amp_rev")]
    Ap2AmpRev,
    /// Fraction of the spikes in the first half of the stimulus window.
    #[serde(rename = "clustering_index")]
    ClusteringIndex,
    /// Input resistance (in megaohms) from the response to a hyperpolarizing current step.
    #[serde(rename = "input_resistance")]
    InputResistance,
    /// Membrane time constant of the decay from the stimulus onset to the end of the trace.
    #[serde(rename = "decay_time_constant_after_stim2")]
    DecayTimeConstantAfterStim,
}

impl DerivedFeature {
    pub const ALL: [DerivedFeature; 8] = [
        DerivedFeature::ApCount,
        DerivedFeature::ApCountBeforeStim,
        DerivedFeature::ApCountAfterStim,
        DerivedFeature::Ap1AmpRev,
        DerivedFeature::Ap2AmpRev,
        DerivedFeature::ClusteringIndex,
        DerivedFeature::InputResistance,
        DerivedFeature::DecayTimeConstantAfterStim,
    ];

    /// Returns the feature name as requested by callers.
    pub fn name(&self) -> &'static str {
        match self {
            DerivedFeature::ApCount => "AP_count",
            DerivedFeature::ApCountBeforeStim => "AP_count_before_stim",
            DerivedFeature::ApCountAfterStim => "AP_count_after_stim",
            DerivedFeature::Ap1AmpRev => "AP1_amp_rev",
            DerivedFeature::Ap2AmpRev => "AP2_amp_rev",
            DerivedFeature::ClusteringIndex => "clustering_index",
            DerivedFeature::InputResistance => "input_resistance",
            DerivedFeature::DecayTimeConstantAfterStim => "decay_time_constant_after_stim2",
        }
    }

    /// Returns the derived feature with the given name, if any.
    pub fn from_name(name: &str) -> Option<Self> {
        DerivedFeature::ALL
            .iter()
            .find(|feature| feature.name() == name)
            .copied()
    }

    /// Compute the feature on the trace. `None` means that the feature has no value for the trace.
    pub fn compute<D: SpikeDetector + ?Sized>(
        &self,
        trace: &Trace,
        detector: &D,
        config: &FeatureConfig,
    ) -> Result<Option<f64>, FeatureError> {
        match self {
            DerivedFeature::ApCount => ap_count(trace, detector, config),
            DerivedFeature::ApCountBeforeStim => ap_count_before_stim(trace, detector, config),
            DerivedFeature::ApCountAfterStim => ap_count_after_stim(trace, detector, config),
            DerivedFeature::Ap1AmpRev => ap_amp_rev(trace, detector, config, AP1_PEAK, 0),
            DerivedFeature::Ap2AmpRev => ap_amp_rev(trace, detector, config, AP2_PEAK, 1),
            DerivedFeature::ClusteringIndex => clustering_index(trace, detector),
            DerivedFeature::InputResistance => input_resistance(trace, config),
            DerivedFeature::DecayTimeConstantAfterStim => {
                decay_time_constant_after_stim(trace, config)
            }
        }
    }
}

fn first_time(trace: &Trace) -> Result<f64, FeatureError> {
    trace
        .start_time()
        .ok_or_else(|| FeatureError::InvalidTrace("empty trace".to_string()))
}

fn last_time(trace: &Trace) -> Result<f64, FeatureError> {
    trace
        .end_time()
        .ok_or_else(|| FeatureError::InvalidTrace("empty trace".to_string()))
}

/// Number of spike onsets in the padded stimulus window.
pub fn ap_count<D: SpikeDetector + ?Sized>(
    trace: &Trace,
    detector: &D,
    config: &FeatureConfig,
) -> Result<Option<f64>, FeatureError> {
    let trimmed = trace.trimmed(config.trim_padding);
    let arrays = detector.detect_one(&trimmed, &[AP_BEGIN_VOLTAGE])?;
    let count = arrays.get(AP_BEGIN_VOLTAGE).map_or(0, |onsets| onsets.len());
    Ok(Some(count as f64))
}

pub fn ap_count_before_stim<D: SpikeDetector + ?Sized>(
    trace: &Trace,
    detector: &D,
    config: &FeatureConfig,
) -> Result<Option<f64>, FeatureError> {
    let trace = trace.with_window(first_time(trace)?, trace.stim_start());
    ap_count(&trace, detector, config)
}

pub fn ap_count_after_stim<D: SpikeDetector + ?Sized>(
    trace: &Trace,
    detector: &D,
    config: &FeatureConfig,
) -> Result<Option<f64>, FeatureError> {
    let trace = trace.with_window(trace.stim_end(), last_time(trace)?);
    ap_count(&trace, detector, config)
}

/// Peak voltage (first value of `peak_feature`) minus the onset voltage of rank `onset`.
fn ap_amp_rev<D: SpikeDetector + ?Sized>(
    trace: &Trace,
    detector: &D,
    config: &FeatureConfig,
    peak_feature: &str,
    onset: usize,
) -> Result<Option<f64>, FeatureError> {
    let trimmed = trace.trimmed(config.trim_padding);
    let arrays = detector.detect_one(&trimmed, &[AP_BEGIN_VOLTAGE, AP1_PEAK, AP2_PEAK])?;

    let peak = arrays.get(peak_feature).and_then(|peaks| peaks.first());
    let begin = arrays.get(AP_BEGIN_VOLTAGE).and_then(|onsets| onsets.get(onset));
    Ok(match (peak, begin) {
        (Some(peak), Some(begin)) => Some(peak - begin),
        _ => None,
    })
}

/// Fraction of the spikes occurring before the middle of the stimulus window.
pub fn clustering_index<D: SpikeDetector + ?Sized>(
    trace: &Trace,
    detector: &D,
) -> Result<Option<f64>, FeatureError> {
    let arrays = detector.detect_one(trace, &[ALL_ISI_VALUES, TIME_TO_FIRST_SPIKE])?;
    let first_spike = match arrays.get(TIME_TO_FIRST_SPIKE).and_then(|t| t.first()) {
        Some(t) => *t,
        None => return Ok(None),
    };
    let intervals = arrays
        .get(ALL_ISI_VALUES)
        .map(|isi| isi.as_slice())
        .unwrap_or(&[]);

    let spike_times: Vec<f64> = std::iter::once(0.0)
        .chain(intervals.iter().scan(0.0, |acc, isi| {
            *acc += isi;
            Some(*acc)
        }))
        .map(|t| t + first_spike)
        .collect();

    let half_duration = (trace.stim_end() - trace.stim_start()) / 2.0;
    let early = spike_times.iter().filter(|&&t| t < half_duration).count();
    Ok(Some(early as f64 / spike_times.len() as f64))
}

/// Input resistance from the voltage at the end of the probe step relative to the baseline.
pub fn input_resistance(trace: &Trace, config: &FeatureConfig) -> Result<Option<f64>, FeatureError> {
    let baseline = match trace.mean_voltage_before(config.baseline_window) {
        Some(baseline) => baseline,
        None => return Ok(None),
    };
    let probe = trace
        .with_window(config.probe_start, config.probe_end)
        .trimmed(0.0);
    let deflection = match probe.voltage().last() {
        Some(v) => v - baseline,
        None => return Ok(None),
    };
    Ok(Some(
        (deflection * VOLTAGE_SCALE) / (config.probe_current * CURRENT_SCALE) * RESISTANCE_SCALE,
    ))
}

/// Membrane time constant of the decay between the stimulus onset and the end of the trace.
pub fn decay_time_constant_after_stim(
    trace: &Trace,
    config: &FeatureConfig,
) -> Result<Option<f64>, FeatureError> {
    let window = trace
        .with_window(trace.stim_start(), last_time(trace)?)
        .trimmed(0.0);
    estimate_time_constant_with(
        window.time(),
        window.voltage(),
        config.resample_step,
        &config.fit,
    )
    .map(Some)
}
