//! Estimation of the membrane time constant from a relaxing voltage segment.
//!
//! The segment following the voltage trough is normalized so that it starts at 1 and ends at 0,
//! resampled on a uniform grid and fitted with the two-component exponential mixture
//!
//! ```text
//! f(t) = a * exp(-b * t) + (1 - a) * exp(-c * t),    a, b, c in [0, 1]
//! ```
//!
//! The membrane time constant is the slowest of the two components, i.e., `max(1/b, 1/c)`.
use itertools::Itertools;
use log::debug;

use crate::config::FitConfig;
use crate::error::FeatureError;
use crate::optim::{least_squares, Model};

/// The bounds of the three parameters of the decay model.
pub const DECAY_BOUNDS: [(f64, f64); 3] = [(0.0, 1.0), (0.0, 1.0), (0.0, 1.0)];
/// Ratio between the fast and the slow rate of the initial guess.
const FAST_TO_SLOW_RATIO: f64 = 10.0;
/// Smallest rate of the initial guess.
const MIN_INITIAL_RATE: f64 = 1e-6;

/// The normalized two-component exponential decay model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiExponential;

impl Model for BiExponential {
    fn num_params(&self) -> usize {
        3
    }

    fn eval(&self, x: f64, params: &[f64]) -> f64 {
        let (a, b, c) = (params[0], params[1], params[2]);
        a * (-b * x).exp() + (1.0 - a) * (-c * x).exp()
    }

    fn gradient(&self, x: f64, params: &[f64], grad: &mut [f64]) {
        let (a, b, c) = (params[0], params[1], params[2]);
        let (eb, ec) = ((-b * x).exp(), (-c * x).exp());
        grad[0] = eb - ec;
        grad[1] = -a * x * eb;
        grad[2] = -(1.0 - a) * x * ec;
    }
}

/// The outcome of a decay fit.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayFit {
    /// Weight of the first component.
    pub a: f64,
    /// Rate of the first component.
    pub b: f64,
    /// Rate of the second component.
    pub c: f64,
    /// The dominant time constant, `max(1/b, 1/c)`.
    pub time_constant: f64,
    /// Half the sum of squared residuals on the resampled curve.
    pub cost: f64,
    /// Number of solver iterations.
    pub iterations: usize,
}

/// Returns the dominant (slowest) time constant of the decay following the voltage trough.
///
/// See [`fit_decay`] for the details and the errors.
pub fn estimate_time_constant(
    time: &[f64],
    voltage: &[f64],
    resample_step: f64,
) -> Result<f64, FeatureError> {
    estimate_time_constant_with(time, voltage, resample_step, &FitConfig::default())
}

/// Same as [`estimate_time_constant`] with explicit solver settings.
pub fn estimate_time_constant_with(
    time: &[f64],
    voltage: &[f64],
    resample_step: f64,
    config: &FitConfig,
) -> Result<f64, FeatureError> {
    Ok(fit_decay(time, voltage, resample_step, config)?.time_constant)
}

/// Fit the two-component exponential decay to the segment following the voltage trough.
///
/// The function returns an error if
/// - the inputs are inconsistent (lengths, non-positive step, NaN times),
/// - the segment cannot be normalized (flat segment, trough on the last sample),
/// - the solver does not converge within its evaluation budget.
pub fn fit_decay(
    time: &[f64],
    voltage: &[f64],
    resample_step: f64,
    config: &FitConfig,
) -> Result<DecayFit, FeatureError> {
    let (xp, yp) = normalized_decay(time, voltage)?;
    let (x, y) = resample(&xp, &yp, resample_step)?;

    let initial = initial_guess(&x, &y);
    let result = least_squares(&BiExponential, &x, &y, &DECAY_BOUNDS, &initial, config)?;
    let (a, b, c) = (result.params[0], result.params[1], result.params[2]);
    let time_constant = (1.0 / b).max(1.0 / c);
    debug!(
        "Decay fit on {} samples: a={}, b={}, c={}, tau={} ({} iterations)",
        x.len(),
        a,
        b,
        c,
        time_constant,
        result.iterations
    );

    Ok(DecayFit {
        a,
        b,
        c,
        time_constant,
        cost: result.cost,
        iterations: result.iterations,
    })
}

/// Keep the samples from the voltage trough on, shift the time to start at zero and scale the
/// voltage to go from 1 (trough) to 0 (last sample).
fn normalized_decay(time: &[f64], voltage: &[f64]) -> Result<(Vec<f64>, Vec<f64>), FeatureError> {
    if time.len() != voltage.len() {
        return Err(FeatureError::InvalidParameter(format!(
            "{} time samples but {} voltage samples",
            time.len(),
            voltage.len()
        )));
    }
    if time.iter().chain(voltage.iter()).any(|x| x.is_nan()) {
        return Err(FeatureError::InvalidParameter(
            "NaN sample in the decay segment".to_string(),
        ));
    }

    let mut samples: Vec<(f64, f64)> = time.iter().copied().zip(voltage.iter().copied()).collect();
    if samples.windows(2).any(|s| s[1].0 < s[0].0) {
        samples.sort_by(|s1, s2| s1.0.total_cmp(&s2.0));
    }

    let imin = samples
        .iter()
        .position_min_by(|s1, s2| s1.1.total_cmp(&s2.1))
        .ok_or_else(|| FeatureError::DegenerateSegment("empty segment".to_string()))?;
    let segment = &samples[imin..];

    let (t0, v0) = segment[0];
    let vend = segment[segment.len() - 1].1;
    let span = v0 - vend;
    if span == 0.0 || !span.is_finite() {
        return Err(FeatureError::DegenerateSegment(format!(
            "the segment from t={} does not decay (span {})",
            t0, span
        )));
    }

    Ok(segment
        .iter()
        .map(|(t, v)| (t - t0, (v - vend) / span))
        .unzip())
}

/// Resample the curve on `0, step, 2 step, ...` strictly below its last time, by linear interpolation.
fn resample(xp: &[f64], yp: &[f64], step: f64) -> Result<(Vec<f64>, Vec<f64>), FeatureError> {
    if !(step > 0.0 && step.is_finite()) {
        return Err(FeatureError::InvalidParameter(format!(
            "resample step must be positive, got {}",
            step
        )));
    }
    let duration = xp.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let num_samples = (duration / step).ceil();
    if !(num_samples >= 1.0) {
        return Err(FeatureError::DegenerateSegment(format!(
            "the segment lasts {} which is too short to be resampled",
            duration
        )));
    }

    let x: Vec<f64> = (0..num_samples as usize).map(|i| i as f64 * step).collect();
    let y = interp(&x, xp, yp);
    Ok((x, y))
}

/// One-dimensional linear interpolation of `(xp, yp)` at sorted abscissae `x`.
/// Values outside of `[xp[0], xp[-1]]` are clamped to the boundary ordinates.
pub fn interp(x: &[f64], xp: &[f64], yp: &[f64]) -> Vec<f64> {
    if xp.is_empty() || xp.len() != yp.len() {
        return vec![f64::NAN; x.len()];
    }
    let mut pos = 0;
    x.iter()
        .map(|&xi| {
            if xi <= xp[0] {
                return yp[0];
            }
            if xi >= xp[xp.len() - 1] {
                return yp[yp.len() - 1];
            }
            while xp[pos + 1] < xi {
                pos += 1;
            }
            let (x0, x1) = (xp[pos], xp[pos + 1]);
            if x1 == x0 {
                yp[pos + 1]
            } else {
                yp[pos] + (yp[pos + 1] - yp[pos]) * (xi - x0) / (x1 - x0)
            }
        })
        .collect()
}

/// Initial parameters: equal weights, a slow rate from the 1/e crossing of the curve and a fast rate
/// ten times larger. The two rates never coincide.
fn initial_guess(x: &[f64], y: &[f64]) -> [f64; 3] {
    let threshold = (-1.0_f64).exp();
    let crossing = x
        .iter()
        .zip(y.iter())
        .find(|(_, y)| **y <= threshold)
        .map(|(x, _)| *x)
        .unwrap_or_else(|| x[x.len() - 1]);

    let mut slow = match crossing > 0.0 {
        true => (1.0 / crossing).clamp(MIN_INITIAL_RATE, 1.0),
        false => 1.0,
    };
    let fast = (FAST_TO_SLOW_RATIO * slow).min(1.0);
    if fast <= slow {
        slow = fast / FAST_TO_SLOW_RATIO;
    }
    [0.5, fast, slow]
}
