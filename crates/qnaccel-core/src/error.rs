//! Error types for quasi-Newton accelerators.
//!
//! Only misuse of the API is reported through these errors. A secant update
//! that fails a curvature or division-safety check is an expected outcome and
//! is reported as `Ok(false)` by the update methods instead.

use thiserror::Error;

/// Errors that can occur when configuring or driving an accelerator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccelError {
    /// Invalid accelerator configuration.
    ///
    /// This error occurs when a parameter structure contains a value the
    /// algorithm cannot work with (e.g. a history length of zero).
    #[error("Invalid configuration for `{parameter}` = {value}: {reason}")]
    InvalidConfiguration {
        /// Name of the invalid parameter
        parameter: String,
        /// Value that was rejected
        value: String,
        /// Description of the constraint that was violated
        reason: String,
    },

    /// Vector length does not match the problem dimension.
    #[error("Dimension mismatch for `{argument}`: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Name of the offending argument
        argument: String,
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// An index refers to an element outside of a vector.
    #[error("Index {index} out of range for length {len}")]
    IndexOutOfRange {
        /// Offending index
        index: usize,
        /// Length of the indexed vector
        len: usize,
    },

    /// An operation was called before the accelerator was initialized.
    #[error("{operation} called before {required}")]
    NotInitialized {
        /// Operation that was attempted
        operation: String,
        /// Operation that must be called first
        required: String,
    },

    /// The requested combination of options is not supported.
    #[error("Unsupported operation: {reason}")]
    Unsupported {
        /// Description of the unsupported combination
        reason: String,
    },
}

impl AccelError {
    /// Create an InvalidConfiguration error.
    pub fn invalid_configuration<S1, S2, S3>(parameter: S1, value: S2, reason: S3) -> Self
    where
        S1: Into<String>,
        S2: std::fmt::Display,
        S3: Into<String>,
    {
        Self::InvalidConfiguration {
            parameter: parameter.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a DimensionMismatch error.
    pub fn dimension_mismatch<S: Into<String>>(
        argument: S,
        expected: usize,
        actual: usize,
    ) -> Self {
        Self::DimensionMismatch {
            argument: argument.into(),
            expected,
            actual,
        }
    }

    /// Create an IndexOutOfRange error.
    pub fn index_out_of_range(index: usize, len: usize) -> Self {
        Self::IndexOutOfRange { index, len }
    }

    /// Create a NotInitialized error.
    pub fn not_initialized<S1, S2>(operation: S1, required: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::NotInitialized {
            operation: operation.into(),
            required: required.into(),
        }
    }

    /// Create an Unsupported error.
    pub fn unsupported<S: Into<String>>(reason: S) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }
}

/// Result type alias for accelerator operations.
pub type Result<T> = std::result::Result<T, AccelError>;
