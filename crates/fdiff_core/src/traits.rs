use crate::callable::Sample;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in derivative computations.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {
    /// Converts an `f64` constant. Every `Float` type represents small constants exactly enough.
    fn constant(value: f64) -> Self {
        Self::from_f64(value).unwrap_or_else(Self::nan)
    }
}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A callable object: anything with a single-argument call operation.
pub trait Evaluate<T: Scalar> {
    /// Evaluates the target at `x`.
    fn evaluate(&self, x: &[T]) -> anyhow::Result<Sample<T>>;
}
