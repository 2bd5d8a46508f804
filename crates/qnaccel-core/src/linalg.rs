//! Vector helpers and plane rotations.
//!
//! The masked variants operate on the sub-vector selected by an index set `J`.
//! When `J` covers the full vector (`J.len() == n`) they fall back to the
//! contiguous nalgebra kernels. Index sets are not validated here; callers
//! check them once with [`ensure_indices`](crate::validation::ensure_indices).

use crate::types::{Scalar, VectorRef};
use nalgebra::storage::{Storage, StorageMut};
use nalgebra::Dyn;
use num_traits::Float;

/// Infinity norm (largest absolute element), zero for an empty vector.
pub fn norm_inf<T, S>(v: &VectorRef<T, S>) -> T
where
    T: Scalar,
    S: Storage<T, Dyn>,
{
    v.iter().fold(T::zero(), |acc, &x| Float::max(acc, Float::abs(x)))
}

/// 1-norm (sum of absolute elements).
pub fn norm_1<T, S>(v: &VectorRef<T, S>) -> T
where
    T: Scalar,
    S: Storage<T, Dyn>,
{
    v.iter().fold(T::zero(), |acc, &x| acc + Float::abs(x))
}

/// Weighted squared norm `vᵀ diag(σ) v`.
pub fn norm_squared_weighted<T, S1, S2>(v: &VectorRef<T, S1>, sigma: &VectorRef<T, S2>) -> T
where
    T: Scalar,
    S1: Storage<T, Dyn>,
    S2: Storage<T, Dyn>,
{
    debug_assert_eq!(v.len(), sigma.len());
    v.iter()
        .zip(sigma.iter())
        .fold(T::zero(), |acc, (&x, &w)| acc + w * x * x)
}

/// Dot product restricted to the indices in `mask`.
pub fn dot_masked<T, S1, S2>(a: &VectorRef<T, S1>, b: &VectorRef<T, S2>, mask: &[usize]) -> T
where
    T: Scalar,
    S1: Storage<T, Dyn>,
    S2: Storage<T, Dyn>,
{
    if mask.len() == a.len() {
        return a.dot(b);
    }
    mask.iter().fold(T::zero(), |acc, &j| acc + a[j] * b[j])
}

/// `y[J] += alpha * x[J]`.
pub fn axpy_masked<T, S1, S2>(
    alpha: T,
    x: &VectorRef<T, S1>,
    y: &mut VectorRef<T, S2>,
    mask: &[usize],
) where
    T: Scalar,
    S1: Storage<T, Dyn>,
    S2: StorageMut<T, Dyn>,
{
    if mask.len() == y.len() {
        y.axpy(alpha, x, T::one());
        return;
    }
    for &j in mask {
        y[j] += alpha * x[j];
    }
}

/// `y[J] *= alpha`.
pub fn scale_masked<T, S>(y: &mut VectorRef<T, S>, alpha: T, mask: &[usize])
where
    T: Scalar,
    S: StorageMut<T, Dyn>,
{
    if mask.len() == y.len() {
        y.scale_mut(alpha);
        return;
    }
    for &j in mask {
        y[j] *= alpha;
    }
}

/// Plane rotation `[c s; -s c]` that maps `(a, b)` to `(ρ, 0)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GivensRotation<T> {
    /// Cosine.
    pub c: T,
    /// Sine.
    pub s: T,
}

impl<T: Scalar> GivensRotation<T> {
    /// Builds the rotation that zeroes `b`, returning it with `ρ = hypot(a, b)`.
    ///
    /// For `a = b = 0` the identity is returned.
    pub fn zeroing(a: T, b: T) -> (Self, T) {
        let rho = Float::hypot(a, b);
        if rho == T::zero() {
            return (Self::identity(), T::zero());
        }
        (Self { c: a / rho, s: b / rho }, rho)
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self {
            c: T::one(),
            s: T::zero(),
        }
    }

    /// Rotates the pair `(x, y)`.
    #[inline]
    pub fn apply(&self, x: T, y: T) -> (T, T) {
        (self.c * x + self.s * y, self.c * y - self.s * x)
    }

    /// Rotates two equally long vectors in place, element by element.
    pub fn apply_pair<S1, S2>(&self, x: &mut VectorRef<T, S1>, y: &mut VectorRef<T, S2>)
    where
        S1: StorageMut<T, Dyn>,
        S2: StorageMut<T, Dyn>,
    {
        debug_assert_eq!(x.len(), y.len());
        for (xi, yi) in x.iter_mut().zip(y.iter_mut()) {
            let (a, b) = self.apply(*xi, *yi);
            *xi = a;
            *yi = b;
        }
    }
}
