//! Type definitions and aliases for quasi-Newton acceleration.
//!
//! This module provides the scalar trait shared by every accelerator, the
//! nalgebra aliases used for storage, and the generic vector alias through
//! which callers pass owned vectors, matrix columns or slice views.

use nalgebra::{Dyn, Matrix, OMatrix, OVector, RealField, Scalar as NalgebraScalar, U1};
use num_traits::{Float, FromPrimitive};
use std::fmt::{Debug, Display};

/// Trait for scalar types used by the accelerators (f32 or f64).
///
/// This trait combines all the necessary numeric traits required
/// by the history recurrences and the QR factorization.
pub trait Scalar:
    NalgebraScalar
    + RealField
    + Float
    + FromPrimitive
    + Display
    + Debug
    + Default
    + Copy
    + Send
    + Sync
    + 'static
{
    /// Machine epsilon for this scalar type.
    const EPSILON: Self;

    /// Tolerance for checking orthonormality of a factor.
    const ORTHOGONALITY_TOLERANCE: Self;

    /// Convert from f64 (for constants).
    ///
    /// # Panics
    ///
    /// Panics if the conversion fails, which cannot happen for `f32` or `f64`.
    fn from_f64(v: f64) -> Self {
        <Self as FromPrimitive>::from_f64(v).expect("Failed to convert from f64")
    }
}

impl Scalar for f32 {
    const EPSILON: Self = f32::EPSILON;
    const ORTHOGONALITY_TOLERANCE: Self = 1e-5;
}

impl Scalar for f64 {
    const EPSILON: Self = f64::EPSILON;
    const ORTHOGONALITY_TOLERANCE: Self = 5e-14;
}

/// Type alias for a dynamically-sized matrix.
pub type DMatrix<T> = OMatrix<T, Dyn, Dyn>;

/// Type alias for a dynamically-sized vector.
pub type DVector<T> = OVector<T, Dyn>;

/// Any column vector with a runtime length, owned or borrowed.
///
/// Accepting `&VectorRef<T, S>` with `S: Storage<T, Dyn>` lets callers pass a
/// `DVector`, a column of a `DMatrix` or a `DVectorView` over a slice.
pub type VectorRef<T, S> = Matrix<T, Dyn, U1, S>;
