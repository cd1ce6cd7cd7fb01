//! Spike detection by threshold crossing.
//!
//! A spike starts when the voltage crosses the threshold upwards and ends when it crosses it
//! downwards (or at the end of the trace). Its peak is the maximum voltage in between, and its
//! onset is found by walking back from the upward crossing while the voltage derivative stays
//! above the derivative threshold.
use itertools::Itertools;
use log::trace;
use serde::{Deserialize, Serialize};

use super::{FeatureArrays, SpikeDetector};
use crate::error::FeatureError;
use crate::trace::Trace;

/// The features computed by the threshold detector.
pub const THRESHOLD_FEATURES: [&str; 17] = [
    "peak_indices",
    "peak_time",
    "peak_voltage",
    "AP1_peak",
    "AP2_peak",
    "AP_begin_indices",
    "AP_begin_time",
    "AP_begin_voltage",
    "AP_amplitude",
    "Spikecount",
    "all_ISI_values",
    "ISI_values",
    "time_to_first_spike",
    "mean_frequency",
    "voltage_base",
    "steady_state_voltage",
    "voltage_deflection",
];

/// Fraction of the stimulus onset time where the baseline window starts.
const VOLTAGE_BASE_START: f64 = 0.9;
/// Fraction of the stimulus duration, at its end, defining the steady state under stimulus.
const DEFLECTION_WINDOW: f64 = 0.1;

/// A threshold-crossing spike detector. Voltages in mV, derivatives in mV/ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdDetector {
    /// Voltage threshold for a spike.
    pub threshold: f64,
    /// Voltage derivative above which the membrane is considered to be firing.
    pub derivative_threshold: f64,
}

impl Default for ThresholdDetector {
    fn default() -> Self {
        ThresholdDetector {
            threshold: -20.0,
            derivative_threshold: 10.0,
        }
    }
}

/// The positions of the onsets and peaks of the spikes in a trace.
#[derive(Debug, Clone, PartialEq)]
struct Spikes {
    begins: Vec<usize>,
    peaks: Vec<usize>,
}

impl ThresholdDetector {
    pub fn new(threshold: f64, derivative_threshold: f64) -> Self {
        ThresholdDetector {
            threshold,
            derivative_threshold,
        }
    }

    fn find_spikes(&self, trace: &Trace) -> Spikes {
        let (time, voltage) = (trace.time(), trace.voltage());
        let slope = |i: usize| {
            let dt = time[i + 1] - time[i];
            match dt > 0.0 {
                true => (voltage[i + 1] - voltage[i]) / dt,
                false => 0.0,
            }
        };

        let mut spikes = Spikes {
            begins: vec![],
            peaks: vec![],
        };
        let mut floor = 0;
        let mut i = 1;
        while i < voltage.len() {
            if !(voltage[i - 1] < self.threshold && voltage[i] >= self.threshold) {
                i += 1;
                continue;
            }

            let up = i;
            let down = (up..voltage.len())
                .find(|&j| voltage[j] < self.threshold)
                .unwrap_or(voltage.len());
            let peak = (up..down)
                .position_max_by(|&j, &k| voltage[j].total_cmp(&voltage[k]))
                .map_or(up, |pos| up + pos);

            let mut begin = up;
            while begin > floor && slope(begin - 1) >= self.derivative_threshold {
                begin -= 1;
            }

            spikes.begins.push(begin);
            spikes.peaks.push(peak);
            floor = down;
            i = down + 1;
        }

        trace!("{} spikes detected", spikes.peaks.len());
        spikes
    }

    fn compute(&self, trace: &Trace, spikes: &Spikes, name: &str) -> Option<Vec<f64>> {
        let (time, voltage) = (trace.time(), trace.voltage());
        let peak_times = || spikes.peaks.iter().map(|&i| time[i]);
        let all_isi = || {
            peak_times()
                .tuple_windows()
                .map(|(t1, t2)| t2 - t1)
                .collect::<Vec<f64>>()
        };

        match name {
            "peak_indices" => Some(spikes.peaks.iter().map(|&i| i as f64).collect()),
            "peak_time" => Some(peak_times().collect()),
            "peak_voltage" => Some(spikes.peaks.iter().map(|&i| voltage[i]).collect()),
            "AP1_peak" => spikes.peaks.first().map(|&i| vec![voltage[i]]),
            "AP2_peak" => spikes.peaks.get(1).map(|&i| vec![voltage[i]]),
            "AP_begin_indices" => Some(spikes.begins.iter().map(|&i| i as f64).collect()),
            "AP_begin_time" => Some(spikes.begins.iter().map(|&i| time[i]).collect()),
            "AP_begin_voltage" => Some(spikes.begins.iter().map(|&i| voltage[i]).collect()),
            "AP_amplitude" => Some(
                spikes
                    .peaks
                    .iter()
                    .zip(spikes.begins.iter())
                    .map(|(&peak, &begin)| voltage[peak] - voltage[begin])
                    .collect(),
            ),
            "Spikecount" => Some(vec![spikes.peaks.len() as f64]),
            "all_ISI_values" => Some(all_isi()),
            "ISI_values" => Some(all_isi().into_iter().skip(1).collect()),
            "time_to_first_spike" => peak_times()
                .find(|&t| t >= trace.stim_start())
                .map(|t| vec![t - trace.stim_start()]),
            "mean_frequency" => {
                let in_stim = peak_times()
                    .filter(|&t| t >= trace.stim_start() && t <= trace.stim_end())
                    .collect::<Vec<f64>>();
                let duration = in_stim.last()? - trace.stim_start();
                match duration > 0.0 {
                    true => Some(vec![1000.0 * in_stim.len() as f64 / duration]),
                    false => None,
                }
            }
            "voltage_base" => voltage_base(trace).map(|v| vec![v]),
            "steady_state_voltage" => mean_between(trace, trace.stim_end(), f64::INFINITY, false)
                .map(|v| vec![v]),
            "voltage_deflection" => {
                let duration = trace.stim_end() - trace.stim_start();
                let steady = mean_between(
                    trace,
                    trace.stim_end() - DEFLECTION_WINDOW * duration,
                    trace.stim_end(),
                    true,
                )?;
                Some(vec![steady - voltage_base(trace)?])
            }
            _ => None,
        }
    }
}

/// Mean voltage of the samples in [start, end] (or (start, end] when `closed` is false).
fn mean_between(trace: &Trace, start: f64, end: f64, closed: bool) -> Option<f64> {
    let samples = trace
        .time()
        .iter()
        .zip(trace.voltage().iter())
        .filter(|(t, _)| (**t > start || (closed && **t == start)) && **t <= end)
        .map(|(_, &v)| v)
        .collect::<Vec<f64>>();
    match samples.is_empty() {
        true => None,
        false => Some(samples.iter().sum::<f64>() / samples.len() as f64),
    }
}

fn voltage_base(trace: &Trace) -> Option<f64> {
    mean_between(
        trace,
        VOLTAGE_BASE_START * trace.stim_start(),
        trace.stim_start(),
        true,
    )
}

impl SpikeDetector for ThresholdDetector {
    fn provides(&self, name: &str) -> bool {
        THRESHOLD_FEATURES.contains(&name)
    }

    fn detect(&self, traces: &[Trace], names: &[&str]) -> Result<Vec<FeatureArrays>, FeatureError> {
        if let Some(name) = names.iter().find(|name| !self.provides(name)) {
            return Err(FeatureError::UnknownFeature(name.to_string()));
        }

        traces
            .iter()
            .map(|trace| {
                if trace.is_empty() {
                    return Err(FeatureError::DetectionUnavailable(format!(
                        "no sample in the window [{}, {}]",
                        trace.stim_start(),
                        trace.stim_end()
                    )));
                }
                let spikes = self.find_spikes(trace);
                Ok(names
                    .iter()
                    .filter_map(|&name| {
                        self.compute(trace, &spikes, name)
                            .map(|values| (name.to_string(), values))
                    })
                    .collect::<FeatureArrays>())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// A resting membrane at -70 mV with gaussian spikes peaking at +20 mV.
    fn spiking_trace(spike_times: &[f64], stim_start: f64, stim_end: f64) -> Trace {
        let time: Vec<f64> = (0..10_000).map(|i| i as f64 * 0.1).collect();
        let voltage: Vec<f64> = time
            .iter()
            .map(|&t| {
                -70.0
                    + spike_times
                        .iter()
                        .map(|ts| 90.0 * (-((t - ts) / 0.3).powi(2)).exp())
                        .sum::<f64>()
            })
            .collect();
        Trace::build(time, voltage, stim_start, stim_end).unwrap()
    }

    #[test]
    fn test_find_spikes() {
        let detector = ThresholdDetector::default();
        let trace = spiking_trace(&[150.0, 300.0, 320.0], 100.0, 900.0);
        let spikes = detector.find_spikes(&trace);
        assert_eq!(spikes.peaks, vec![1500, 3000, 3200]);
        for (&begin, &peak) in spikes.begins.iter().zip(spikes.peaks.iter()) {
            assert!(begin < peak);
            assert!(trace.voltage()[begin] < detector.threshold);
            assert!(trace.voltage()[begin] > -70.0);
        }

        let trace = spiking_trace(&[], 100.0, 900.0);
        assert!(detector.find_spikes(&trace).peaks.is_empty());
    }

    #[test]
    fn test_detect() {
        let detector = ThresholdDetector::default();
        let trace = spiking_trace(&[50.0, 150.0, 300.0, 320.0], 100.0, 900.0);
        let names = [
            "peak_time",
            "peak_voltage",
            "Spikecount",
            "all_ISI_values",
            "ISI_values",
            "time_to_first_spike",
            "AP1_peak",
            "AP2_peak",
            "mean_frequency",
        ];
        let arrays = detector.detect_one(&trace, &names).unwrap();

        assert_eq!(arrays["Spikecount"], vec![4.0]);
        assert_eq!(arrays["peak_voltage"].len(), 4);
        assert_relative_eq!(arrays["AP1_peak"][0], 20.0, epsilon = 1e-9);
        assert_relative_eq!(arrays["AP2_peak"][0], 20.0, epsilon = 1e-9);
        assert_relative_eq!(arrays["peak_time"][2], 300.0, epsilon = 1e-9);
        assert_relative_eq!(arrays["time_to_first_spike"][0], 50.0, epsilon = 1e-9);

        let isi = &arrays["all_ISI_values"];
        assert_eq!(isi.len(), 3);
        assert_relative_eq!(isi[0], 100.0, epsilon = 1e-9);
        assert_relative_eq!(isi[1], 150.0, epsilon = 1e-9);
        assert_relative_eq!(isi[2], 20.0, epsilon = 1e-9);
        assert_eq!(arrays["ISI_values"].len(), 2);

        // 3 spikes in the stimulus window, the last one 220 ms after its onset
        assert_relative_eq!(arrays["mean_frequency"][0], 3000.0 / 220.0, epsilon = 1e-6);
    }

    #[test]
    fn test_detect_without_spikes() {
        let detector = ThresholdDetector::default();
        let trace = spiking_trace(&[], 100.0, 900.0);
        let arrays = detector
            .detect_one(
                &trace,
                &["AP_begin_voltage", "AP1_peak", "time_to_first_spike", "Spikecount"],
            )
            .unwrap();
        assert_eq!(arrays["AP_begin_voltage"], Vec::<f64>::new());
        assert_eq!(arrays["Spikecount"], vec![0.0]);
        assert!(!arrays.contains_key("AP1_peak"));
        assert!(!arrays.contains_key("time_to_first_spike"));
    }

    #[test]
    fn test_detect_voltages() {
        let detector = ThresholdDetector::default();
        let time: Vec<f64> = (0..1000).map(|i| i as f64).collect();
        let voltage: Vec<f64> = time
            .iter()
            .map(|&t| match t >= 200.0 && t <= 800.0 {
                true => -80.0,
                false => -70.0,
            })
            .collect();
        let trace = Trace::build(time, voltage, 200.0, 800.0).unwrap();
        let arrays = detector
            .detect_one(
                &trace,
                &["voltage_base", "steady_state_voltage", "voltage_deflection"],
            )
            .unwrap();
        // the sample at the stimulus onset belongs to the baseline window
        assert_relative_eq!(arrays["voltage_base"][0], -70.0 - 10.0 / 21.0, epsilon = 1e-9);
        assert_relative_eq!(arrays["steady_state_voltage"][0], -70.0);
        assert_relative_eq!(
            arrays["voltage_deflection"][0],
            -10.0 + 10.0 / 21.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_detect_errors() {
        let detector = ThresholdDetector::default();
        let trace = spiking_trace(&[150.0], 100.0, 900.0);
        assert_eq!(
            detector.detect_one(&trace, &["AP_cuont"]),
            Err(FeatureError::UnknownFeature("AP_cuont".to_string()))
        );

        let empty = trace.with_window(5000.0, 6000.0).trimmed(0.0);
        assert!(matches!(
            detector.detect_one(&empty, &["peak_time"]),
            Err(FeatureError::DetectionUnavailable(_))
        ));
    }
}
