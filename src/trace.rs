//! Module implementing the concept of a voltage trace recorded under a stimulus.
use serde::{Deserialize, Serialize};

use crate::column::{NumericColumn, StimulusMarker};
use crate::error::FeatureError;

/// Represents a membrane voltage recording together with its stimulus window.
/// Times are in ms and voltages in mV.
///
/// A trace is never modified in place: methods redefining the window of interest return a new trace.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Trace {
    time: Vec<f64>,
    voltage: Vec<f64>,
    stim_start: f64,
    stim_end: f64,
}

impl Trace {
    /// Create a trace with the specified parameters.
    /// The function returns an error if the samples have different lengths, are empty, contain
    /// non-finite values, or if the times are decreasing or the stimulus window is reversed.
    pub fn build(
        time: Vec<f64>,
        voltage: Vec<f64>,
        stim_start: f64,
        stim_end: f64,
    ) -> Result<Self, FeatureError> {
        if time.len() != voltage.len() {
            return Err(FeatureError::InvalidTrace(format!(
                "{} time samples but {} voltage samples",
                time.len(),
                voltage.len()
            )));
        }
        if time.is_empty() {
            return Err(FeatureError::InvalidTrace("empty trace".to_string()));
        }
        if time.iter().chain(voltage.iter()).any(|x| !x.is_finite()) {
            return Err(FeatureError::InvalidTrace(
                "non-finite sample".to_string(),
            ));
        }
        if let Some(pos) = time.windows(2).position(|ts| ts[1] < ts[0]) {
            return Err(FeatureError::InvalidTrace(format!(
                "time decreases at index {}: {} > {}",
                pos + 1,
                time[pos],
                time[pos + 1]
            )));
        }
        if !(stim_start.is_finite() && stim_end.is_finite()) || stim_start > stim_end {
            return Err(FeatureError::InvalidTrace(format!(
                "invalid stimulus window [{}, {}]",
                stim_start, stim_end
            )));
        }

        Ok(Trace {
            time,
            voltage,
            stim_start,
            stim_end,
        })
    }

    /// Create a trace from arbitrary numeric columns and stimulus markers.
    ///
    /// ```rust
    /// use ephys_features::trace::Trace;
    ///
    /// let trace = Trace::from_columns(&[0_i32, 1, 2], &[-70.0_f32, -71.0, -70.5], &[0.5_f64], &[1.5_f64]).unwrap();
    /// assert_eq!(trace.time(), &[0.0, 1.0, 2.0]);
    /// assert_eq!(trace.stim_end(), 1.5);
    /// ```
    pub fn from_columns<T, V, S, E>(
        time: &T,
        voltage: &V,
        stim_start: &S,
        stim_end: &E,
    ) -> Result<Self, FeatureError>
    where
        T: NumericColumn + ?Sized,
        V: NumericColumn + ?Sized,
        S: StimulusMarker + ?Sized,
        E: StimulusMarker + ?Sized,
    {
        Trace::build(
            time.to_samples()?,
            voltage.to_samples()?,
            stim_start.to_time()?,
            stim_end.to_time()?,
        )
    }

    /// Returns the sample times.
    pub fn time(&self) -> &[f64] {
        &self.time[..]
    }

    /// Returns the voltage samples.
    pub fn voltage(&self) -> &[f64] {
        &self.voltage[..]
    }

    /// Returns the stimulus onset.
    pub fn stim_start(&self) -> f64 {
        self.stim_start
    }

    /// Returns the stimulus offset.
    pub fn stim_end(&self) -> f64 {
        self.stim_end
    }

    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Returns the time of the first sample, if any.
    pub fn start_time(&self) -> Option<f64> {
        self.time.first().copied()
    }

    /// Returns the time of the last sample, if any.
    pub fn end_time(&self) -> Option<f64> {
        self.time.last().copied()
    }

    /// Returns a copy of the trace with a new stimulus window.
    pub fn with_window(&self, stim_start: f64, stim_end: f64) -> Trace {
        Trace {
            time: self.time.clone(),
            voltage: self.voltage.clone(),
            stim_start,
            stim_end,
        }
    }

    /// Returns the trace restricted to the samples in [stim_start - pad, stim_end + pad].
    /// The stimulus window is kept as is. The result may hold no sample.
    pub fn trimmed(&self, pad: f64) -> Trace {
        let (start, end) = (self.stim_start - pad, self.stim_end + pad);
        let (time, voltage) = self
            .time
            .iter()
            .zip(self.voltage.iter())
            .filter(|(t, _)| **t >= start && **t <= end)
            .map(|(t, v)| (*t, *v))
            .unzip();
        Trace {
            time,
            voltage,
            stim_start: self.stim_start,
            stim_end: self.stim_end,
        }
    }

    /// Returns the mean voltage of the samples strictly before the given time, if any.
    pub fn mean_voltage_before(&self, time: f64) -> Option<f64> {
        let (sum, count) = self
            .time
            .iter()
            .zip(self.voltage.iter())
            .filter(|(t, _)| **t < time)
            .fold((0.0, 0_usize), |(sum, count), (_, v)| (sum + v, count + 1));
        match count {
            0 => None,
            _ => Some(sum / count as f64),
        }
    }
}
