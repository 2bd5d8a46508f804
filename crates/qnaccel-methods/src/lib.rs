//! Limited-memory quasi-Newton accelerators.
//!
//! This crate provides three engines that turn the history of a fixed-point
//! or root-finding iteration into a better next step. None of them ever
//! forms an `n × n` matrix, and nothing is allocated after construction.
//!
//! # Available Accelerators
//!
//! - **L-BFGS**: inverse Hessian approximation applied by the two-loop recursion,
//!   with optional cautious updates and masked application
//! - **Broyden (good)**: inverse Jacobian approximation applied by a single
//!   forward sweep, with optional Powell damping
//! - **Anderson**: mixing of past function values with coefficients from an
//!   incrementally updated least-squares problem
//!
//! All engines report a numerically rejected update as `Ok(false)` and
//! reserve `Err` for misuse, such as vectors of the wrong length.
//!
//! # Examples
//!
//! ```rust
//! use nalgebra::{DMatrix, DVector};
//! use qnaccel_methods::{Lbfgs, LbfgsParams, Sign};
//!
//! // Minimize ½ xᵀ H x, whose gradient is H x
//! let h = DMatrix::from_row_slice(2, 2, &[2.0, -1.0, -1.0, 3.0]);
//! let mut lbfgs = Lbfgs::new(LbfgsParams::new().with_memory(5), 2).unwrap();
//!
//! let mut x = DVector::from_vec(vec![10.0, -5.0]);
//! for i in 0..10 {
//!     let grad = &h * &x;
//!     let mut step = grad.clone();
//!     if i > 0 {
//!         lbfgs.apply(&mut step, 1.0).unwrap();
//!     }
//!     let x_next = &x - &step;
//!     let grad_next = &h * &x_next;
//!     lbfgs.update(&x, &x_next, &grad, &grad_next, Sign::Positive, false).unwrap();
//!     x = x_next;
//! }
//! assert!(x.norm() < 1e-10);
//! ```

pub mod anderson;
pub mod broyden;
pub mod lbfgs;

// Re-export main accelerators for convenience
pub use anderson::{minimize_update_anderson, AndersonAccel, AndersonParams};
pub use broyden::{BroydenGood, BroydenGoodParams};
pub use lbfgs::{CbfgsParams, Lbfgs, LbfgsPair, LbfgsParams, Sign};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::anderson::{minimize_update_anderson, AndersonAccel, AndersonParams};
    pub use crate::broyden::{BroydenGood, BroydenGoodParams};
    pub use crate::lbfgs::{CbfgsParams, Lbfgs, LbfgsPair, LbfgsParams, Sign};
    pub use qnaccel_core::{AccelError, DMatrix, DVector, Result, Scalar};
}
