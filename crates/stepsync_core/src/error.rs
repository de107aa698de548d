//! Error types for stepsync core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur at the sensor boundary.
///
/// Counter resets are not errors; they are reported through
/// [`SessionDelta::reset`](crate::SessionDelta::reset).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// A reading or session value was negative or otherwise malformed.
    #[error("invalid input for {field}: {message}")]
    InvalidInput {
        /// Name of the rejected field.
        field: &'static str,
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid input error.
    pub fn invalid_input(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            message: message.into(),
        }
    }
}
