//! Argument checks performed at the public API boundary.
//!
//! Every engine validates vector lengths and index sets before touching its
//! history, so a failed call never leaves partially mutated state behind.

use crate::error::{AccelError, Result};

/// Checks that `actual` equals the expected dimension.
#[inline]
pub fn ensure_len(argument: &str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(AccelError::dimension_mismatch(argument, expected, actual))
    }
}

/// Checks that every index addresses an element of a vector of length `len`.
///
/// Duplicate indices are allowed; the masked operations simply visit them
/// twice.
pub fn ensure_indices(indices: &[usize], len: usize) -> Result<()> {
    match indices.iter().find(|&&i| i >= len) {
        Some(&index) => Err(AccelError::index_out_of_range(index, len)),
        None => Ok(()),
    }
}

/// Checks that a history capacity is at least one.
pub fn ensure_memory(parameter: &str, memory: usize) -> Result<()> {
    if memory == 0 {
        Err(AccelError::invalid_configuration(
            parameter,
            memory,
            "history must hold at least one entry",
        ))
    } else {
        Ok(())
    }
}

/// Checks that a tolerance is finite and non-negative.
pub fn ensure_non_negative<T>(parameter: &str, value: T) -> Result<()>
where
    T: num_traits::Float + std::fmt::Display,
{
    if value.is_finite() && value >= T::zero() {
        Ok(())
    } else {
        Err(AccelError::invalid_configuration(
            parameter,
            value,
            "must be finite and non-negative",
        ))
    }
}
