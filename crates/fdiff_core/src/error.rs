use crate::callable::SampleShape;
use crate::expression::ExpressionError;
use thiserror::Error;

/// Errors raised while building or evaluating a derivative operation.
///
/// Every error aborts the computation in flight; no partial result is returned.
#[derive(Debug, Error)]
pub enum DiffError {
    /// The supplied target exposes none of the recognised call shapes.
    #[error("object {type_name} is not callable")]
    NotInvocable { type_name: String },

    /// A sample, direction or gradient has the wrong shape.
    #[error("{what} mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: SampleShape,
        actual: SampleShape,
    },

    /// A sample or quotient came out as NaN or infinity.
    #[error("non-finite value in {stage} (evaluation {index})")]
    NonFiniteResult { stage: &'static str, index: usize },

    /// The target function itself failed.
    #[error("target evaluation failed")]
    Target(#[source] anyhow::Error),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

impl DiffError {
    /// True for mistakes in how the op was set up rather than numerical or target failures.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DiffError::NotInvocable { .. }
                | DiffError::DimensionMismatch { .. }
                | DiffError::InvalidSettings(_)
                | DiffError::Expression(_)
        )
    }

    pub(crate) fn mismatch(what: &'static str, expected: SampleShape, actual: SampleShape) -> Self {
        DiffError::DimensionMismatch {
            what,
            expected,
            actual,
        }
    }
}

pub type Result<T> = std::result::Result<T, DiffError>;
