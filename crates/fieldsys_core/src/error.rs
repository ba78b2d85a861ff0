use crate::expression::ExpressionError;
use thiserror::Error;

/// Errors raised by the coupled field integrator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    /// Malformed shapes, non-positive scalars, zero frame count or an
    /// expression that does not compile.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `solve` was called on an instance that has already been solved.
    #[error("solve has already been run on this system")]
    ReentrantSolve,

    /// A per-field accessor was given an index outside `0..count`.
    #[error("field index {index} out of range for {count} fields")]
    FieldIndex { index: usize, count: usize },
}

impl FieldError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        FieldError::Configuration(message.into())
    }
}

impl From<ExpressionError> for FieldError {
    fn from(err: ExpressionError) -> Self {
        FieldError::Configuration(err.to_string())
    }
}

pub type FieldResult<T> = Result<T, FieldError>;
