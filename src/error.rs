//! Error module for the electrophysiology features library.
use std::error::Error;
use std::fmt;

/// Error types for the library.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureError {
    /// The bounded optimizer could not find parameters satisfying the convergence tolerances.
    FitConvergence(String),
    /// The decay segment cannot be normalized, e.g., flat trace or zero duration.
    DegenerateSegment(String),
    /// The spike detector rejected the trace, e.g., missing stimulus markers.
    DetectionUnavailable(String),
    /// The feature name is known neither to the local registry nor to the detector.
    UnknownFeature(String),
    /// Error for malformed traces, e.g., mismatched lengths or unsorted times.
    InvalidTrace(String),
    /// Error for invalid parameters
    InvalidParameter(String),
}

impl FeatureError {
    /// A short, stable identifier of the error kind, used for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            FeatureError::FitConvergence(_) => "fit_convergence",
            FeatureError::DegenerateSegment(_) => "degenerate_segment",
            FeatureError::DetectionUnavailable(_) => "detection_unavailable",
            FeatureError::UnknownFeature(_) => "unknown_feature",
            FeatureError::InvalidTrace(_) => "invalid_trace",
            FeatureError::InvalidParameter(_) => "invalid_parameter",
        }
    }
}

impl fmt::Display for FeatureError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FeatureError::FitConvergence(e) => write!(f, "Fit did not converge: {}", e),
            FeatureError::DegenerateSegment(e) => write!(f, "Degenerate decay segment: {}", e),
            FeatureError::DetectionUnavailable(e) => {
                write!(f, "Spike detection unavailable: {}", e)
            }
            FeatureError::UnknownFeature(e) => write!(f, "Unknown feature: {}", e),
            FeatureError::InvalidTrace(e) => write!(f, "Invalid trace: {}", e),
            FeatureError::InvalidParameter(e) => write!(f, "Invalid parameters: {}", e),
        }
    }
}

impl Error for FeatureError {}
