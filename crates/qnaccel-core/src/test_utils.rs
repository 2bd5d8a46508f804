//! Dense reference computations for testing the incremental algorithms.
//!
//! These helpers recompute from scratch what the limited-memory structures
//! maintain incrementally, so tests can compare the two.

use crate::types::{DMatrix, DVector, Scalar};
use nalgebra::storage::Storage;
use nalgebra::{Dyn, Matrix};
use num_traits::Float;

/// Stacks vectors as the columns of a matrix.
pub fn window_matrix<T: Scalar>(columns: &[DVector<T>]) -> DMatrix<T> {
    match columns.first() {
        None => DMatrix::zeros(0, 0),
        Some(first) => DMatrix::from_fn(first.len(), columns.len(), |i, j| columns[j][i]),
    }
}

/// Largest element of `|QᵀQ - I|`.
pub fn orthogonality_defect<T, S>(q: &Matrix<T, Dyn, Dyn, S>) -> T
where
    T: Scalar,
    S: Storage<T, Dyn, Dyn>,
{
    let gram = q.tr_mul(q);
    let mut defect = T::zero();
    for j in 0..gram.ncols() {
        for i in 0..gram.nrows() {
            let target = if i == j { T::one() } else { T::zero() };
            defect = Float::max(defect, Float::abs(gram[(i, j)] - target));
        }
    }
    defect
}

/// Returns `true` if the columns of `q` are orthonormal up to
/// [`Scalar::ORTHOGONALITY_TOLERANCE`].
pub fn is_orthonormal<T, S>(q: &Matrix<T, Dyn, Dyn, S>) -> bool
where
    T: Scalar,
    S: Storage<T, Dyn, Dyn>,
{
    orthogonality_defect(q) < T::ORTHOGONALITY_TOLERANCE
}

/// Minimum-norm least-squares solution of `A x = b` through the SVD.
///
/// # Panics
///
/// Panics if the SVD could not be computed.
pub fn lstsq_svd<T: Scalar>(a: &DMatrix<T>, b: &DVector<T>) -> DVector<T> {
    let svd = a.clone().svd(true, true);
    let largest = svd.singular_values.iter().fold(T::zero(), |m, &s| Float::max(m, s));
    let dim = <T as Scalar>::from_f64(a.nrows().max(a.ncols()) as f64);
    let cutoff = <T as Scalar>::EPSILON * largest * dim;
    svd.solve(b, cutoff).expect("SVD factors were requested")
}

/// Anderson iterate computed from scratch.
///
/// `delta_r` holds the `q` residual differences oldest first, `g` holds the
/// `q + 1` matching function values with the newest one last.
pub fn anderson_reference<T: Scalar>(
    delta_r: &DMatrix<T>,
    g: &DMatrix<T>,
    r_k: &DVector<T>,
) -> DVector<T> {
    let q = delta_r.ncols();
    assert_eq!(g.ncols(), q + 1, "need one more function value than differences");
    if q == 0 {
        return g.column(0).into_owned();
    }
    let gamma = lstsq_svd(delta_r, r_k);
    let mut alpha = DVector::zeros(q + 1);
    alpha[0] = gamma[0];
    for i in 1..q {
        alpha[i] = gamma[i] - gamma[i - 1];
    }
    alpha[q] = T::one() - gamma[q - 1];
    g * alpha
}
