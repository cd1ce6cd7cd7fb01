//! This crate provides electrophysiology features of voltage traces recorded under a current
//! stimulus, including the membrane time constant from a bi-exponential fit of the voltage decay.
//!
//! # Building Traces
//!
//! ```rust
//! use ephys_features::trace::Trace;
//!
//! // Columns are converted once, at the boundary
//! let time: Vec<f32> = (0..=1000).map(|i| i as f32).collect();
//! let voltage = vec![-70_i32; 1001];
//! let trace = Trace::from_columns(&time, &voltage, &[100.0_f64], &[900.0_f64]).unwrap();
//!
//! assert_eq!(trace.len(), 1001);
//! assert_eq!(trace.stim_start(), 100.0);
//! ```
//!
//! # Computing Features
//!
//! ```rust
//! use ephys_features::detector::ThresholdDetector;
//! use ephys_features::get_feature_values;
//! use ephys_features::trace::Trace;
//!
//! // A resting trace with a single action potential at 300 ms
//! let time: Vec<f64> = (0..=10000).map(|i| i as f64 * 0.1).collect();
//! let voltage: Vec<f64> = time
//!     .iter()
//!     .map(|t| -70.0 + 90.0 * (-((t - 300.0) / 0.3).powi(2)).exp())
//!     .collect();
//! let trace = Trace::build(time, voltage, 100.0, 900.0).unwrap();
//!
//! let detector = ThresholdDetector::default();
//! let values = get_feature_values(&detector, &trace, &["AP_count", "clustering_index"]).unwrap();
//!
//! assert_eq!(values.get("AP_count"), Some(1.0));
//! assert_eq!(values.get("clustering_index"), Some(1.0));
//! ```
//!
//! # Fitting Decays
//!
//! ```rust
//! use ephys_features::fit::estimate_time_constant;
//!
//! // A fast and a slow component, 5 ms and 50 ms
//! let time: Vec<f64> = (0..10_000).map(|i| i as f64 * 0.1).collect();
//! let voltage: Vec<f64> = time
//!     .iter()
//!     .map(|t| -70.0 - 5.0 * (-t / 50.0).exp() - 5.0 * (-t / 5.0).exp())
//!     .collect();
//!
//! let tau = estimate_time_constant(&time, &voltage, 0.1).unwrap();
//! assert!((tau - 50.0).abs() < 0.5);
//! ```

pub mod column;
pub mod config;
pub mod detector;
pub mod error;
pub mod features;
pub mod fit;
pub mod optim;
pub mod trace;

pub use error::FeatureError;
pub use features::{get_feature_values, FeatureExtractor, FeatureReport, FeatureValues};
pub use trace::Trace;

/// The value of a feature which could not be computed.
pub const MISSING_VALUE: f64 = f64::NAN;
/// The minimum number of requested features to compute them in parallel.
pub const MIN_PARALLEL_FEATURES: usize = 4;
