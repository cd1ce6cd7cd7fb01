//! Normalization of heterogeneous columns into plain numeric samples.
//!
//! Traces often come out of tabular containers whose columns are not `f64` slices.
//! Every such column goes through [`NumericColumn::to_samples`] exactly once, when the
//! [`Trace`](crate::trace::Trace) is built, so the feature code only ever sees `Vec<f64>`.
use nalgebra::DVector;

use crate::error::FeatureError;

/// A column that can be converted to a sequence of `f64` samples.
pub trait NumericColumn {
    fn to_samples(&self) -> Result<Vec<f64>, FeatureError>;
}

macro_rules! impl_numeric_column {
    ($($t:ty),*) => {
        $(
            impl NumericColumn for [$t] {
                fn to_samples(&self) -> Result<Vec<f64>, FeatureError> {
                    Ok(self.iter().map(|&x| x as f64).collect())
                }
            }

            impl NumericColumn for Vec<$t> {
                fn to_samples(&self) -> Result<Vec<f64>, FeatureError> {
                    self.as_slice().to_samples()
                }
            }

            impl<const N: usize> NumericColumn for [$t; N] {
                fn to_samples(&self) -> Result<Vec<f64>, FeatureError> {
                    self.as_slice().to_samples()
                }
            }
        )*
    };
}

impl_numeric_column!(f64, f32, i32, i64);

/// Nullable columns: a missing cell makes the whole column invalid.
impl NumericColumn for [Option<f64>] {
    fn to_samples(&self) -> Result<Vec<f64>, FeatureError> {
        self.iter()
            .enumerate()
            .map(|(i, x)| {
                x.ok_or_else(|| FeatureError::InvalidTrace(format!("missing sample at index {}", i)))
            })
            .collect()
    }
}

impl NumericColumn for Vec<Option<f64>> {
    fn to_samples(&self) -> Result<Vec<f64>, FeatureError> {
        self.as_slice().to_samples()
    }
}

impl NumericColumn for DVector<f64> {
    fn to_samples(&self) -> Result<Vec<f64>, FeatureError> {
        Ok(self.iter().copied().collect())
    }
}

impl<C: NumericColumn + ?Sized> NumericColumn for &C {
    fn to_samples(&self) -> Result<Vec<f64>, FeatureError> {
        (**self).to_samples()
    }
}

/// A stimulus marker, i.e., a scalar or a single-element container holding the time.
pub trait StimulusMarker {
    fn to_time(&self) -> Result<f64, FeatureError>;
}

impl StimulusMarker for f64 {
    fn to_time(&self) -> Result<f64, FeatureError> {
        Ok(*self)
    }
}

impl<C: NumericColumn + ?Sized> StimulusMarker for C {
    fn to_time(&self) -> Result<f64, FeatureError> {
        self.to_samples()?
            .first()
            .copied()
            .ok_or_else(|| FeatureError::InvalidTrace("empty stimulus marker".to_string()))
    }
}
