//! Anderson acceleration of fixed-point iterations.
//!
//! For a fixed-point map `g` with residual `r(x) = g(x) − x`, the accelerated
//! iterate mixes the last `m + 1` function values
//!
//! ```text
//! xₖ₊₁ = Σᵢ αᵢ gᵢ,    α₀ = γ₀,  αᵢ = γᵢ − γᵢ₋₁,  αₘ = 1 − γₘ₋₁
//! ```
//!
//! where `γ = argmin ‖ΔR γ − rₖ‖²` and the columns of `ΔR` are the successive
//! residual differences `rᵢ₊₁ − rᵢ`. The least-squares problem is solved with
//! a [`LimitedMemoryQR`] that slides along with the window, so each iteration
//! costs `O(n m)`.
//!
//! The function values live in an `n × m` matrix `G` that shares its ring
//! layout with the QR factorization: the physical slot of a residual
//! difference in the QR is also the slot of the matching function value in
//! `G`, and the newest function value is kept at [`LimitedMemoryQR::ring_tail`].

use nalgebra::storage::{Storage, StorageMut};
use nalgebra::{Dyn, Matrix};
use qnaccel_core::validation::{ensure_len, ensure_memory, ensure_non_negative};
use qnaccel_core::{AccelError, DMatrix, DVector, LimitedMemoryQR, Result, Scalar, VectorRef};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for [`AndersonAccel`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AndersonParams<T> {
    /// Number of residual differences to keep. Capped to the problem
    /// dimension, beyond which the least-squares problem is underdetermined.
    pub memory: usize,
    /// Diagonal elements of `R` below this magnitude are treated as rank
    /// deficient when solving for the mixing coefficients.
    pub min_div: T,
}

impl<T: Scalar> Default for AndersonParams<T> {
    fn default() -> Self {
        Self {
            memory: 10,
            min_div: T::zero(),
        }
    }
}

impl<T: Scalar> AndersonParams<T> {
    /// Creates parameters with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of stored residual differences.
    pub fn with_memory(mut self, memory: usize) -> Self {
        self.memory = memory;
        self
    }

    /// Sets the rank-deficiency threshold of the least-squares solve.
    pub fn with_min_div(mut self, min_div: T) -> Self {
        self.min_div = min_div;
        self
    }

    /// Checks that all parameters are usable.
    pub fn validate(&self) -> Result<()> {
        ensure_memory("memory", self.memory)?;
        ensure_non_negative("min_div", self.min_div)?;
        Ok(())
    }

    /// Window length actually used for vectors of length `n`.
    pub fn effective_memory(&self, n: usize) -> usize {
        self.memory.min(n).max(1)
    }
}

/// Performs one Anderson step on caller-owned state.
///
/// Appends `r_k − r_last` to `qr` (dropping the oldest difference if the
/// window is full), solves for the mixing coefficients `gamma_ls`, writes the
/// accelerated iterate to `x_out` and finally stores `g_k` in the slot of `g`
/// that now holds the newest function value.
///
/// `g` must be `n × m` with `n` and `m` those of `qr`, and `gamma_ls` must
/// have length `m`. Its slots must hold the function values matching the
/// columns already in `qr`, with the newest one at `qr.ring_tail()`.
#[allow(clippy::too_many_arguments)]
pub fn minimize_update_anderson<T, SG, S1, S2, S3, S4, S5>(
    qr: &mut LimitedMemoryQR<T>,
    g: &mut Matrix<T, Dyn, Dyn, SG>,
    r_k: &VectorRef<T, S1>,
    r_last: &VectorRef<T, S2>,
    g_k: &VectorRef<T, S3>,
    min_div: T,
    gamma_ls: &mut VectorRef<T, S4>,
    x_out: &mut VectorRef<T, S5>,
) -> Result<()>
where
    T: Scalar,
    SG: StorageMut<T, Dyn, Dyn>,
    S1: Storage<T, Dyn>,
    S2: Storage<T, Dyn>,
    S3: Storage<T, Dyn>,
    S4: StorageMut<T, Dyn>,
    S5: StorageMut<T, Dyn>,
{
    let (n, m) = (qr.n(), qr.m());
    ensure_len("G (rows)", n, g.nrows())?;
    ensure_len("G (columns)", m, g.ncols())?;
    ensure_len("r_k", n, r_k.len())?;
    ensure_len("r_last", n, r_last.len())?;
    ensure_len("g_k", n, g_k.len())?;
    ensure_len("gamma_ls", m, gamma_ls.len())?;
    ensure_len("x_out", n, x_out.len())?;

    qr.add_column_difference(r_k, r_last)?;
    qr.solve_col(r_k, gamma_ls, min_div)?;

    // x = Σ (γᵢ − γᵢ₋₁) gᵢ + (1 − γ_last) gₖ, with γ₋₁ = 0
    x_out.fill(T::zero());
    let mut prev = T::zero();
    for idx in qr.ring_iter() {
        let gamma = gamma_ls[idx.zero_based];
        x_out.axpy(gamma - prev, &g.column(idx.circular), T::one());
        prev = gamma;
    }
    x_out.axpy(T::one() - prev, g_k, T::one());

    g.column_mut(qr.ring_tail()).copy_from(g_k);
    Ok(())
}

/// Anderson accelerator for fixed-point iterations `x = g(x)`.
///
/// # Example
///
/// ```
/// use nalgebra::{DMatrix, DVector};
/// use qnaccel_methods::{AndersonAccel, AndersonParams};
///
/// // g(x) = A x + b is a contraction with fixed point (1, 1)
/// let a = DMatrix::from_row_slice(2, 2, &[0.5, 0.1, -0.2, 0.4]);
/// let b = DVector::from_vec(vec![0.4, 0.8]);
///
/// let mut aa = AndersonAccel::new(AndersonParams::new().with_memory(2), 2).unwrap();
/// let mut x = DVector::zeros(2);
/// let g = &a * &x + &b;
/// let r = &g - &x;
/// aa.initialize(&g, &r).unwrap();
/// x = g;
///
/// for _ in 0..4 {
///     let g = &a * &x + &b;
///     let r = &g - &x;
///     aa.compute(&g, &r, &mut x).unwrap();
/// }
/// assert!((x - DVector::from_vec(vec![1.0, 1.0])).norm() < 1e-10);
/// ```
#[derive(Debug, Clone)]
pub struct AndersonAccel<T: Scalar> {
    params: AndersonParams<T>,
    qr: LimitedMemoryQR<T>,
    g: DMatrix<T>,
    r_last: DVector<T>,
    gamma_ls: DVector<T>,
    initialized: bool,
}

impl<T: Scalar> AndersonAccel<T> {
    /// Creates an uninitialized accelerator for vectors of length `n`.
    pub fn new(params: AndersonParams<T>, n: usize) -> Result<Self> {
        params.validate()?;
        let m = params.effective_memory(n);
        Ok(Self {
            qr: LimitedMemoryQR::new(n, m),
            g: DMatrix::zeros(n, m),
            r_last: DVector::zeros(n),
            gamma_ls: DVector::zeros(m),
            initialized: false,
            params,
        })
    }

    /// Stores the first function value `g_0` and its residual `r_0`,
    /// discarding any history.
    pub fn initialize<S1, S2>(
        &mut self,
        g_0: &VectorRef<T, S1>,
        r_0: &VectorRef<T, S2>,
    ) -> Result<()>
    where
        S1: Storage<T, Dyn>,
        S2: Storage<T, Dyn>,
    {
        ensure_len("g_0", self.n(), g_0.len())?;
        ensure_len("r_0", self.n(), r_0.len())?;
        self.g.column_mut(0).copy_from(g_0);
        self.r_last.copy_from(r_0);
        self.qr.reset();
        self.initialized = true;
        Ok(())
    }

    /// Writes the accelerated iterate for the function value `g_k = g(x_k)`
    /// and residual `r_k = g_k − x_k` to `x_out`.
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::NotInitialized`] if [`initialize`](Self::initialize)
    /// was never called, and a dimension error if any length differs from `n`.
    pub fn compute<S1, S2, S3>(
        &mut self,
        g_k: &VectorRef<T, S1>,
        r_k: &VectorRef<T, S2>,
        x_out: &mut VectorRef<T, S3>,
    ) -> Result<()>
    where
        S1: Storage<T, Dyn>,
        S2: Storage<T, Dyn>,
        S3: StorageMut<T, Dyn>,
    {
        self.mix(g_k, r_k, x_out)?;
        self.r_last.copy_from(r_k);
        Ok(())
    }

    /// Same as [`compute`](Self::compute), taking ownership of `r_k` to keep
    /// it as the previous residual without copying.
    pub fn compute_with_residual<S1, S3>(
        &mut self,
        g_k: &VectorRef<T, S1>,
        r_k: DVector<T>,
        x_out: &mut VectorRef<T, S3>,
    ) -> Result<()>
    where
        S1: Storage<T, Dyn>,
        S3: StorageMut<T, Dyn>,
    {
        self.mix(g_k, &r_k, x_out)?;
        self.r_last = r_k;
        Ok(())
    }

    fn mix<S1, S2, S3>(
        &mut self,
        g_k: &VectorRef<T, S1>,
        r_k: &VectorRef<T, S2>,
        x_out: &mut VectorRef<T, S3>,
    ) -> Result<()>
    where
        S1: Storage<T, Dyn>,
        S2: Storage<T, Dyn>,
        S3: StorageMut<T, Dyn>,
    {
        if !self.initialized {
            return Err(AccelError::not_initialized(
                "AndersonAccel::compute",
                "AndersonAccel::initialize",
            ));
        }
        minimize_update_anderson(
            &mut self.qr,
            &mut self.g,
            r_k,
            &self.r_last,
            g_k,
            self.params.min_div,
            &mut self.gamma_ls,
            x_out,
        )
    }

    /// Drops the residual differences but keeps the newest function value
    /// and residual, so [`compute`](Self::compute) can continue without a new
    /// call to [`initialize`](Self::initialize).
    pub fn reset(&mut self) {
        debug!(discarded = self.qr.num_columns(), "Anderson history reset");
        let newest = self.qr.ring_tail();
        if newest != 0 {
            let (mut first, last) = self.g.columns_range_pair_mut(0, newest);
            first.copy_from(&last);
        }
        self.qr.reset();
    }

    /// Reallocates for vectors of length `n`. The accelerator must be
    /// initialized again afterwards.
    pub fn resize(&mut self, n: usize) {
        debug!(from = self.n(), to = n, "Anderson resized");
        let m = self.params.effective_memory(n);
        self.qr.resize(n, m);
        self.g = DMatrix::zeros(n, m);
        self.r_last = DVector::zeros(n);
        self.gamma_ls = DVector::zeros(m);
        self.initialized = false;
    }

    /// Length of the vectors.
    pub fn n(&self) -> usize {
        self.qr.n()
    }

    /// Maximum number of stored residual differences.
    pub fn history(&self) -> usize {
        self.qr.m()
    }

    /// Number of residual differences currently stored.
    pub fn current_history(&self) -> usize {
        self.qr.num_columns()
    }

    /// Whether [`initialize`](Self::initialize) has been called since
    /// construction or the last resize.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Mixing coefficients `γ` of the last step.
    pub fn gamma(&self) -> &DVector<T> {
        &self.gamma_ls
    }

    /// The factorization of the residual differences, for diagnostics.
    pub fn qr(&self) -> &LimitedMemoryQR<T> {
        &self.qr
    }

    /// The parameters this instance was created with.
    pub fn params(&self) -> &AndersonParams<T> {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    fn vec(v: &[f64]) -> DVector<f64> {
        DVector::from_column_slice(v)
    }

    #[test]
    fn test_params_default_and_builder() {
        let p = AndersonParams::<f64>::default();
        assert_eq!(p.memory, 10);
        assert_eq!(p.min_div, 0.0);

        let p = AndersonParams::<f64>::new().with_memory(3).with_min_div(1e-12);
        assert_eq!(p.memory, 3);
        assert_eq!(p.min_div, 1e-12);
        assert!(p.validate().is_ok());

        assert!(AndersonParams::<f64>::new().with_memory(0).validate().is_err());
        assert!(AndersonParams::<f64>::new().with_min_div(-1.0).validate().is_err());
        assert!(AndersonAccel::<f64>::new(AndersonParams::new().with_memory(0), 4).is_err());
    }

    #[test]
    fn test_memory_is_capped_to_dimension() {
        let aa = AndersonAccel::<f64>::new(AndersonParams::new(), 3).unwrap();
        assert_eq!(aa.history(), 3);
        assert_eq!(aa.n(), 3);
        assert_eq!(aa.current_history(), 0);

        let aa = AndersonAccel::<f64>::new(AndersonParams::new().with_memory(2), 5).unwrap();
        assert_eq!(aa.history(), 2);

        assert_eq!(AndersonParams::<f64>::new().effective_memory(0), 1);
    }

    #[test]
    fn test_compute_before_initialize() {
        let mut aa = AndersonAccel::<f64>::new(AndersonParams::new(), 2).unwrap();
        let mut x = vec(&[0.0, 0.0]);
        let err = aa.compute(&vec(&[1.0, 2.0]), &vec(&[1.0, 0.0]), &mut x).unwrap_err();
        assert!(matches!(err, AccelError::NotInitialized { .. }));
        assert!(!aa.is_initialized());
        assert_eq!(x, vec(&[0.0, 0.0]));

        let err = aa
            .compute_with_residual(&vec(&[1.0, 2.0]), vec(&[1.0, 0.0]), &mut x)
            .unwrap_err();
        assert!(matches!(err, AccelError::NotInitialized { .. }));
    }

    #[test]
    fn test_dimension_mismatch_leaves_state_unchanged() {
        let mut aa = AndersonAccel::<f64>::new(AndersonParams::new(), 2).unwrap();
        assert!(matches!(
            aa.initialize(&vec(&[1.0]), &vec(&[1.0, 0.0])),
            Err(AccelError::DimensionMismatch { .. })
        ));
        assert!(!aa.is_initialized());

        aa.initialize(&vec(&[1.0, 2.0]), &vec(&[1.0, 0.0])).unwrap();
        let mut x = vec(&[0.0, 0.0, 0.0]);
        assert!(matches!(
            aa.compute(&vec(&[3.0, 1.0]), &vec(&[0.0, 2.0]), &mut x),
            Err(AccelError::DimensionMismatch { .. })
        ));
        assert_eq!(aa.current_history(), 0);
    }

    #[test]
    fn test_first_step_closed_form() {
        // One difference Δr = r₁ − r₀: γ = 〈Δr, r₁〉 / ‖Δr‖², x = γ g₀ + (1 − γ) g₁
        let mut aa = AndersonAccel::new(AndersonParams::new(), 2).unwrap();
        aa.initialize(&vec(&[1.0, 2.0]), &vec(&[1.0, 0.0])).unwrap();
        assert!(aa.is_initialized());

        let mut x = DVector::zeros(2);
        aa.compute(&vec(&[3.0, 1.0]), &vec(&[0.0, 2.0]), &mut x).unwrap();
        assert_eq!(aa.current_history(), 1);
        assert_relative_eq!(aa.gamma()[0], 0.8, epsilon = 1e-14);
        assert_eq!(aa.gamma()[1], 0.0);
        assert_relative_eq!(x, vec(&[1.4, 1.8]), epsilon = 1e-14);
    }

    #[test]
    fn test_free_function_on_caller_state() {
        let mut qr = LimitedMemoryQR::new(2, 2);
        let mut g = DMatrix::zeros(2, 2);
        g.column_mut(0).copy_from(&vec(&[1.0, 2.0]));
        let mut gamma = DVector::zeros(2);
        let mut x = DVector::zeros(2);

        minimize_update_anderson(
            &mut qr,
            &mut g,
            &vec(&[0.0, 2.0]),
            &vec(&[1.0, 0.0]),
            &vec(&[3.0, 1.0]),
            0.0,
            &mut gamma,
            &mut x,
        )
        .unwrap();
        assert_relative_eq!(x, vec(&[1.4, 1.8]), epsilon = 1e-14);
        assert_eq!(g.column(1).into_owned(), vec(&[3.0, 1.0]));
        assert_eq!(qr.ring_tail(), 1);

        let mut wrong = DMatrix::zeros(2, 3);
        assert!(minimize_update_anderson(
            &mut qr,
            &mut wrong,
            &vec(&[0.0, 2.0]),
            &vec(&[1.0, 0.0]),
            &vec(&[3.0, 1.0]),
            0.0,
            &mut gamma,
            &mut x,
        )
        .is_err());
        assert_eq!(qr.num_columns(), 1);
    }

    fn data() -> Vec<(DVector<f64>, DVector<f64>)> {
        vec![
            (vec(&[1.0, 2.0, 0.5]), vec(&[1.0, 0.0, 0.2])),
            (vec(&[3.0, 1.0, -1.0]), vec(&[0.0, 2.0, 1.0])),
            (vec(&[2.0, -1.0, 4.0]), vec(&[0.5, -1.0, 3.0])),
            (vec(&[0.0, 1.0, 1.0]), vec(&[2.0, 1.0, -0.5])),
            (vec(&[1.5, 0.5, 2.0]), vec(&[-1.0, 0.5, 0.25])),
        ]
    }

    #[test]
    fn test_reset_keeps_newest_function_value() {
        let d = data();
        let mut x = DVector::zeros(3);

        let mut aa = AndersonAccel::new(AndersonParams::new().with_memory(2), 3).unwrap();
        aa.initialize(&d[0].0, &d[0].1).unwrap();
        aa.compute(&d[1].0, &d[1].1, &mut x).unwrap();
        aa.compute(&d[2].0, &d[2].1, &mut x).unwrap();
        aa.reset();
        assert_eq!(aa.current_history(), 0);
        assert!(aa.is_initialized());
        aa.compute(&d[3].0, &d[3].1, &mut x).unwrap();
        aa.compute(&d[4].0, &d[4].1, &mut x).unwrap();

        let mut fresh = AndersonAccel::new(AndersonParams::new().with_memory(2), 3).unwrap();
        let mut y = DVector::zeros(3);
        fresh.initialize(&d[2].0, &d[2].1).unwrap();
        fresh.compute(&d[3].0, &d[3].1, &mut y).unwrap();
        fresh.compute(&d[4].0, &d[4].1, &mut y).unwrap();

        assert_relative_eq!(x, y, epsilon = 1e-12);
    }

    #[test]
    fn test_compute_with_residual_matches_compute() {
        let d = data();
        let params = AndersonParams::new().with_memory(2);
        let mut by_ref = AndersonAccel::new(params, 3).unwrap();
        let mut by_value = AndersonAccel::new(params, 3).unwrap();
        by_ref.initialize(&d[0].0, &d[0].1).unwrap();
        by_value.initialize(&d[0].0, &d[0].1).unwrap();

        let mut x = DVector::zeros(3);
        let mut y = DVector::zeros(3);
        for (g, r) in &d[1..] {
            by_ref.compute(g, r, &mut x).unwrap();
            by_value.compute_with_residual(g, r.clone(), &mut y).unwrap();
            assert_relative_eq!(x, y, epsilon = 1e-15);
        }
        assert_eq!(by_ref.current_history(), 2);
    }

    #[test]
    fn test_resize_requires_new_initialize() {
        let mut aa = AndersonAccel::new(AndersonParams::new().with_memory(4), 2).unwrap();
        aa.initialize(&vec(&[1.0, 2.0]), &vec(&[1.0, 0.0])).unwrap();
        aa.resize(6);
        assert_eq!(aa.n(), 6);
        assert_eq!(aa.history(), 4);
        assert!(!aa.is_initialized());

        let mut x = DVector::zeros(6);
        assert!(aa.compute(&DVector::zeros(6), &DVector::zeros(6), &mut x).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_params_serde_round_trip() {
        let params = AndersonParams::<f64>::new().with_memory(5).with_min_div(1e-14);
        let json = serde_json::to_string(&params).unwrap();
        let back: AndersonParams<f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
    }
}
