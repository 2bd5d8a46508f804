//! Core types and data structures for limited-memory quasi-Newton acceleration.
//!
//! This crate provides the building blocks shared by the accelerators in
//! `qnaccel-methods`: a scalar abstraction over `f32`/`f64`, the error type,
//! ring-buffer index arithmetic, a preallocated bounded history, masked vector
//! kernels and an incremental QR factorization of a sliding column window.
//!
//! # Modules
//!
//! - [`error`]: Error type and result alias
//! - [`types`]: Scalar trait and nalgebra aliases
//! - [`validation`]: Argument checks used at API boundaries
//! - [`ring`]: Ring index arithmetic and a sliding-window maximum
//! - [`history`]: Fixed-capacity history of preallocated entries
//! - [`linalg`]: Norms, masked operations and Givens rotations
//! - [`qr`]: Incremental QR factorization with column downdates

pub mod error;
pub mod history;
pub mod linalg;
pub mod qr;
pub mod ring;
pub mod types;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export commonly used items at the crate root
pub use error::{AccelError, Result};
pub use history::LimitedMemoryHistory;
pub use qr::LimitedMemoryQR;
pub use ring::{CircularIndices, CircularRange, MaxHistory, RingIndex};
pub use types::{DMatrix, DVector, Scalar, VectorRef};

/// Prelude module for convenient imports.
///
/// # Example
/// ```
/// use qnaccel_core::prelude::*;
///
/// let mut qr = LimitedMemoryQR::<f64>::new(3, 2);
/// qr.add_column(&DVector::from_vec(vec![3.0, 0.0, 4.0])).unwrap();
/// assert_eq!(qr.num_columns(), 1);
/// ```
pub mod prelude {
    pub use crate::error::{AccelError, Result};
    pub use crate::history::LimitedMemoryHistory;
    pub use crate::linalg::{
        axpy_masked, dot_masked, norm_1, norm_inf, norm_squared_weighted, scale_masked,
        GivensRotation,
    };
    pub use crate::qr::LimitedMemoryQR;
    pub use crate::ring::{CircularIndices, CircularRange, MaxHistory, RingIndex};
    pub use crate::types::{DMatrix, DVector, Scalar, VectorRef};
    pub use crate::validation::{ensure_indices, ensure_len};
}
