//! Bounded non-linear least squares.
//!
//! The solver is a projected Levenberg-Marquardt method: at every iteration the parameters
//! sitting on a bound whose gradient points outside of the box are frozen, the damped normal
//! equations are solved on the remaining (free) parameters, and the step is clamped into the box.
//! The normal equations only involve `K x K` matrices (`K` the number of parameters), which makes
//! the method cheap for small models fitted on many samples.
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};

use crate::config::FitConfig;
use crate::error::FeatureError;

/// Damping is never decreased below this value.
const MIN_DAMPING: f64 = 1e-12;
/// Damping above which a vanishing step is considered a stationary point.
const MAX_DAMPING: f64 = 1e12;
/// Floor on the diagonal of the normal matrix used to scale the damping.
const MIN_DIAG: f64 = 1e-12;

/// A parametric model `y = f(x; p)` with analytical gradient with respect to `p`.
pub trait Model {
    /// The number of parameters of the model.
    fn num_params(&self) -> usize;

    /// Evaluate the model at `x`.
    fn eval(&self, x: f64, params: &[f64]) -> f64;

    /// Write the gradient of the model at `x` with respect to the parameters in `grad`.
    fn gradient(&self, x: f64, params: &[f64], grad: &mut [f64]);
}

/// Result of a least-squares fit.
#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquaresResult {
    /// The optimal parameters found.
    pub params: Vec<f64>,
    /// Half the sum of squared residuals at the optimal parameters.
    pub cost: f64,
    /// Number of model evaluations over the whole data set.
    pub evaluations: usize,
    /// Number of iterations performed.
    pub iterations: usize,
}

/// Half the sum of squared residuals together with the normal matrix `J^T J` and the gradient `J^T r`.
struct NormalEquations {
    cost: f64,
    jtj: DMatrix<f64>,
    jtr: DVector<f64>,
}

fn normal_equations<M: Model>(model: &M, x: &[f64], y: &[f64], params: &[f64]) -> NormalEquations {
    let num_params = model.num_params();
    let mut jtj = DMatrix::zeros(num_params, num_params);
    let mut jtr = DVector::zeros(num_params);
    let mut grad = DVector::zeros(num_params);
    let mut cost = 0.0;

    for (&xn, &yn) in x.iter().zip(y.iter()) {
        let r = model.eval(xn, params) - yn;
        model.gradient(xn, params, grad.as_mut_slice());
        cost += 0.5 * r * r;
        jtj.ger(1.0, &grad, &grad, 1.0);
        jtr.axpy(r, &grad, 1.0);
    }

    NormalEquations { cost, jtj, jtr }
}

fn cost<M: Model>(model: &M, x: &[f64], y: &[f64], params: &[f64]) -> f64 {
    x.iter()
        .zip(y.iter())
        .map(|(&xn, &yn)| {
            let r = model.eval(xn, params) - yn;
            0.5 * r * r
        })
        .sum()
}

/// Returns the indices of the parameters that can move, i.e., those not pinned to a bound by the gradient.
fn free_indices(params: &[f64], bounds: &[(f64, f64)], jtr: &DVector<f64>) -> Vec<usize> {
    (0..params.len())
        .filter(|&i| {
            let (lower, upper) = bounds[i];
            !((params[i] <= lower && jtr[i] > 0.0) || (params[i] >= upper && jtr[i] < 0.0))
        })
        .collect()
}

/// Solve `(A + damping * diag(A)) x = b` restricted to the free indices.
fn damped_step(
    jtj: &DMatrix<f64>,
    jtr: &DVector<f64>,
    free: &[usize],
    damping: f64,
) -> Option<DVector<f64>> {
    let k = free.len();
    let a = DMatrix::from_fn(k, k, |i, j| {
        let value = jtj[(free[i], free[j])];
        if i == j {
            value + damping * value.max(MIN_DIAG)
        } else {
            value
        }
    });
    let b = DVector::from_fn(k, |i, _| -jtr[free[i]]);

    match a.clone().cholesky() {
        Some(chol) => Some(chol.solve(&b)),
        None => a.lu().solve(&b),
    }
}

/// Minimize `0.5 * sum_n (f(x_n; p) - y_n)^2` over the box defined by `bounds`, starting from `initial`.
///
/// The initial guess is clamped into the box. The function returns an error if the inputs are
/// inconsistent, or if the evaluation budget of the configuration is exhausted before convergence.
///
/// ```rust
/// use ephys_features::config::FitConfig;
/// use ephys_features::optim::{least_squares, Model};
///
/// // y = p0 * x + p1
/// struct Line;
///
/// impl Model for Line {
///     fn num_params(&self) -> usize { 2 }
///     fn eval(&self, x: f64, p: &[f64]) -> f64 { p[0] * x + p[1] }
///     fn gradient(&self, x: f64, _p: &[f64], grad: &mut [f64]) {
///         grad[0] = x;
///         grad[1] = 1.0;
///     }
/// }
///
/// let x = [0.0, 1.0, 2.0, 3.0];
/// let y = [1.0, 3.0, 5.0, 7.0];
/// let result = least_squares(&Line, &x, &y, &[(0.0, 10.0), (0.0, 10.0)], &[5.0, 5.0], &FitConfig::default()).unwrap();
/// assert!((result.params[0] - 2.0).abs() < 1e-6);
/// assert!((result.params[1] - 1.0).abs() < 1e-6);
/// ```
pub fn least_squares<M: Model>(
    model: &M,
    x: &[f64],
    y: &[f64],
    bounds: &[(f64, f64)],
    initial: &[f64],
    config: &FitConfig,
) -> Result<LeastSquaresResult, FeatureError> {
    let num_params = model.num_params();
    if x.len() != y.len() {
        return Err(FeatureError::InvalidParameter(format!(
            "{} abscissae but {} ordinates",
            x.len(),
            y.len()
        )));
    }
    if x.is_empty() {
        return Err(FeatureError::InvalidParameter(
            "no data to fit".to_string(),
        ));
    }
    if bounds.len() != num_params || initial.len() != num_params {
        return Err(FeatureError::InvalidParameter(format!(
            "the model has {} parameters but {} bounds and {} initial values were provided",
            num_params,
            bounds.len(),
            initial.len()
        )));
    }
    if let Some((lower, upper)) = bounds.iter().find(|(lower, upper)| !(lower <= upper)) {
        return Err(FeatureError::InvalidParameter(format!(
            "invalid bounds [{}, {}]",
            lower, upper
        )));
    }
    config.validate()?;

    let max_evaluations = config.max_evaluations_per_param * num_params;
    let mut params: Vec<f64> = initial
        .iter()
        .zip(bounds.iter())
        .map(|(p, (lower, upper))| p.clamp(*lower, *upper))
        .collect();
    let mut damping = config.initial_damping;
    let mut current = normal_equations(model, x, y, &params);
    let mut evaluations = 1;
    let mut iterations = 0;

    if !current.cost.is_finite() {
        return Err(FeatureError::FitConvergence(
            "non-finite cost at the initial guess".to_string(),
        ));
    }

    loop {
        let free = free_indices(&params, bounds, &current.jtr);
        let grad_norm = free
            .iter()
            .map(|&i| current.jtr[i].abs())
            .fold(0.0, f64::max);
        if free.is_empty() || grad_norm < config.gtol {
            debug!(
                "Converged on the projected gradient after {} iterations (cost={:e})",
                iterations, current.cost
            );
            break;
        }
        if evaluations >= max_evaluations {
            return Err(FeatureError::FitConvergence(format!(
                "{} evaluations exhausted with cost {:e}",
                evaluations, current.cost
            )));
        }

        iterations += 1;
        let step = match damped_step(&current.jtj, &current.jtr, &free, damping) {
            Some(step) if step.iter().all(|s| s.is_finite()) => step,
            _ => {
                damping *= 10.0;
                if damping > MAX_DAMPING {
                    return Err(FeatureError::FitConvergence(
                        "singular normal equations".to_string(),
                    ));
                }
                continue;
            }
        };

        let mut candidate = params.clone();
        for (&i, s) in free.iter().zip(step.iter()) {
            let (lower, upper) = bounds[i];
            candidate[i] = (params[i] + s).clamp(lower, upper);
        }

        let params_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();
        let step_norm = candidate
            .iter()
            .zip(params.iter())
            .map(|(c, p)| (c - p) * (c - p))
            .sum::<f64>()
            .sqrt();
        if step_norm <= config.xtol * (config.xtol + params_norm) {
            if step.norm() <= config.xtol * (config.xtol + params_norm) || damping > MAX_DAMPING {
                debug!(
                    "Converged on the parameter change after {} iterations (cost={:e})",
                    iterations, current.cost
                );
                break;
            }
            // the step is entirely absorbed by the bounds, move closer to a gradient step
            damping *= 10.0;
            continue;
        }

        let candidate_cost = cost(model, x, y, &candidate);
        evaluations += 1;
        trace!(
            "Iteration {}: params={:?}, cost={:e}, damping={:e}",
            iterations,
            candidate,
            candidate_cost,
            damping
        );

        if candidate_cost.is_finite() && candidate_cost < current.cost {
            let reduction = current.cost - candidate_cost;
            let converged = reduction <= config.ftol * current.cost;
            params = candidate;
            current = normal_equations(model, x, y, &params);
            evaluations += 1;
            damping = (damping / 10.0).max(MIN_DAMPING);
            if converged {
                debug!(
                    "Converged on the cost reduction after {} iterations (cost={:e})",
                    iterations, current.cost
                );
                break;
            }
        } else {
            damping *= 10.0;
            if damping > MAX_DAMPING {
                debug!(
                    "No further descent after {} iterations (cost={:e})",
                    iterations, current.cost
                );
                break;
            }
        }
    }

    Ok(LeastSquaresResult {
        params,
        cost: current.cost,
        evaluations,
        iterations,
    })
}
