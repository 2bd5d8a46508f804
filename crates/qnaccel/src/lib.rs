//! Limited-memory quasi-Newton acceleration for fixed-point and root-finding
//! iterations.
//!
//! `qnaccel` bundles the building blocks of [`qnaccel_core`] with the
//! accelerators of [`qnaccel_methods`]:
//!
//! - [`Lbfgs`]: limited-memory BFGS inverse Hessian, applied by the two-loop
//!   recursion
//! - [`BroydenGood`]: limited-memory inverse Jacobian from Broyden's good method
//! - [`AndersonAccel`]: Anderson mixing backed by an incremental QR
//!   factorization ([`LimitedMemoryQR`])
//!
//! Vectors are `nalgebra` column vectors; every engine accepts owned vectors
//! as well as views into larger matrices.
//!
//! # Quick Start
//!
//! ```rust
//! use qnaccel::prelude::*;
//!
//! // Fixed point of g(x) = A x − b is (1, 1)
//! let a = DMatrix::from_row_slice(2, 2, &[20.0, -10.0, -10.0, 30.0]);
//! let b = DVector::from_vec(vec![9.0, 19.0]);
//!
//! let mut aa = AndersonAccel::new(AndersonParams::new().with_memory(2), 2)?;
//! let mut x = -b.clone();
//! let g = &a * &x - &b;
//! aa.initialize(&g, &(&g - &x))?;
//! x = g;
//! for _ in 0..4 {
//!     let g = &a * &x - &b;
//!     let r = &g - &x;
//!     aa.compute(&g, &r, &mut x)?;
//! }
//! assert!((x - DVector::from_element(2, 1.0)).amax() < 1e-10);
//! # Ok::<(), qnaccel::AccelError>(())
//! ```
//!
//! # Features
//!
//! - `serde`: `Serialize`/`Deserialize` for all parameter structs
//! - `full`: everything above

pub use qnaccel_core;
pub use qnaccel_methods;

// Re-export key dependencies
pub use nalgebra;

pub use qnaccel_core::{
    AccelError, CircularIndices, CircularRange, DMatrix, DVector, LimitedMemoryHistory,
    LimitedMemoryQR, MaxHistory, Result, RingIndex, Scalar, VectorRef,
};
pub use qnaccel_methods::{
    minimize_update_anderson, AndersonAccel, AndersonParams, BroydenGood, BroydenGoodParams,
    CbfgsParams, Lbfgs, LbfgsPair, LbfgsParams, Sign,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use qnaccel_core::prelude::*;
    pub use qnaccel_methods::prelude::*;
}
