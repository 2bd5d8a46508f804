//! Limited-memory BFGS inverse-Hessian approximation.
//!
//! [`Lbfgs`] stores the last `m` accepted pairs `(sᵢ, yᵢ)` and applies the
//! implied inverse Hessian `Hₖ` to a vector with the two-loop recursion:
//!
//! ```text
//! for i = newest … oldest:        αᵢ = ρᵢ 〈sᵢ, q〉,  q ← q − αᵢ yᵢ
//! q ← γ q                         (H₀ = γ I)
//! for i = oldest … newest:        β = ρᵢ 〈yᵢ, q〉,  q ← q + (αᵢ − β) sᵢ
//! ```
//!
//! with `ρᵢ = 1 / 〈yᵢ, sᵢ〉`. Nothing is allocated after construction: the
//! pairs live in a preallocated ring and are overwritten in place.
//!
//! Pairs that would make the approximation ill-defined are rejected by
//! [`Lbfgs::update_valid`]; a rejected update returns `Ok(false)` and leaves
//! the history untouched. The optional cautious BFGS test (see
//! [`CbfgsParams`]) additionally requires `〈y, s〉 / 〈s, s〉 ≥ ϵ ‖p‖^α`.
//!
//! # References
//!
//! - Nocedal & Wright, "Numerical Optimization" (2006), Algorithm 7.4
//! - Li & Fukushima, "On the global convergence of the BFGS method for
//!   nonconvex unconstrained optimization problems" (2001)

use nalgebra::storage::{Storage, StorageMut};
use nalgebra::Dyn;
use num_traits::Float;
use qnaccel_core::linalg::{axpy_masked, dot_masked, scale_masked};
use qnaccel_core::validation::{ensure_indices, ensure_len, ensure_memory, ensure_non_negative};
use qnaccel_core::{AccelError, DVector, LimitedMemoryHistory, Result, Scalar, VectorRef};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Parameters of the cautious BFGS acceptance test.
///
/// The test is disabled when `epsilon` is zero.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CbfgsParams<T> {
    /// Exponent `α` applied to the norm of the newest function value.
    pub alpha: T,
    /// Threshold `ϵ`; zero disables the test.
    pub epsilon: T,
}

impl<T: Scalar> Default for CbfgsParams<T> {
    fn default() -> Self {
        Self {
            alpha: T::one(),
            epsilon: T::zero(),
        }
    }
}

impl<T: Scalar> CbfgsParams<T> {
    /// Returns `true` if the cautious test is active.
    pub fn is_enabled(&self) -> bool {
        self.epsilon > T::zero()
    }
}

/// Configuration for [`Lbfgs`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LbfgsParams<T> {
    /// Number of `(s, y)` pairs to store (at least 1).
    pub memory: usize,
    /// Reject a pair if `〈y, s〉 ≤ min_div_fac · 〈s, s〉`.
    pub min_div_fac: T,
    /// Reject a pair if `〈s, s〉 ≤ min_abs_s`.
    pub min_abs_s: T,
    /// Require `〈y, s〉` itself to be positive instead of its magnitude.
    pub force_pos_def: bool,
    /// Cautious BFGS acceptance test.
    pub cbfgs: CbfgsParams<T>,
}

impl<T: Scalar> Default for LbfgsParams<T> {
    fn default() -> Self {
        Self {
            memory: 10,
            min_div_fac: <T as Scalar>::from_f64(1e-10),
            min_abs_s: <T as Scalar>::from_f64(1e-32),
            force_pos_def: true,
            cbfgs: CbfgsParams::default(),
        }
    }
}

impl<T: Scalar> LbfgsParams<T> {
    /// Creates parameters with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of stored pairs.
    pub fn with_memory(mut self, memory: usize) -> Self {
        self.memory = memory;
        self
    }

    /// Sets the relative curvature threshold.
    pub fn with_min_div_fac(mut self, min_div_fac: T) -> Self {
        self.min_div_fac = min_div_fac;
        self
    }

    /// Sets the minimum squared step length.
    pub fn with_min_abs_s(mut self, min_abs_s: T) -> Self {
        self.min_abs_s = min_abs_s;
        self
    }

    /// Enables or disables the positive-definiteness requirement.
    pub fn with_force_pos_def(mut self, force_pos_def: bool) -> Self {
        self.force_pos_def = force_pos_def;
        self
    }

    /// Enables the cautious BFGS test with exponent `alpha` and threshold `epsilon`.
    pub fn with_cbfgs(mut self, alpha: T, epsilon: T) -> Self {
        self.cbfgs = CbfgsParams { alpha, epsilon };
        self
    }

    /// Checks that all parameters are usable.
    pub fn validate(&self) -> Result<()> {
        ensure_memory("memory", self.memory)?;
        ensure_non_negative("min_div_fac", self.min_div_fac)?;
        ensure_non_negative("min_abs_s", self.min_abs_s)?;
        ensure_non_negative("cbfgs.epsilon", self.cbfgs.epsilon)?;
        if !Float::is_finite(self.cbfgs.alpha) {
            return Err(AccelError::invalid_configuration(
                "cbfgs.alpha",
                self.cbfgs.alpha,
                "must be finite",
            ));
        }
        Ok(())
    }
}

/// Which difference of function values forms `y` in [`Lbfgs::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Sign {
    /// `y = p_next − p_k`, for gradients.
    #[default]
    Positive,
    /// `y = p_k − p_next`, for negated gradients or fixed-point residuals.
    Negative,
}

/// A stored pair `(s, y)` with `ρ = 1 / 〈y, s〉`.
#[derive(Debug, Clone)]
pub struct LbfgsPair<T: Scalar> {
    s: DVector<T>,
    y: DVector<T>,
    rho: T,
    alpha: T,
    masked_rho: Option<T>,
}

impl<T: Scalar> LbfgsPair<T> {
    fn zeros(n: usize) -> Self {
        Self {
            s: DVector::zeros(n),
            y: DVector::zeros(n),
            rho: T::zero(),
            alpha: T::zero(),
            masked_rho: None,
        }
    }

    /// Step `s = x_next − x_k`.
    pub fn s(&self) -> &DVector<T> {
        &self.s
    }

    /// Function value difference `y`.
    pub fn y(&self) -> &DVector<T> {
        &self.y
    }

    /// `1 / 〈y, s〉`.
    pub fn rho(&self) -> T {
        self.rho
    }
}

/// Limited-memory BFGS approximation of an inverse Hessian or inverse Jacobian.
///
/// # Examples
///
/// ```
/// use nalgebra::DVector;
/// use qnaccel_methods::{Lbfgs, LbfgsParams};
///
/// let mut lbfgs = Lbfgs::new(LbfgsParams::new().with_memory(5), 2).unwrap();
/// let s = DVector::from_vec(vec![1.0, 0.0]);
/// let y = DVector::from_vec(vec![2.0, 0.0]);
/// assert!(lbfgs.update_sy(&s, &y, 0.0, false).unwrap());
///
/// let mut q = y.clone();
/// assert!(lbfgs.apply(&mut q, -1.0).unwrap());
/// assert!((q - s).norm() < 1e-12);
/// ```
#[derive(Debug, Clone)]
pub struct Lbfgs<T: Scalar> {
    params: LbfgsParams<T>,
    n: usize,
    history: LimitedMemoryHistory<LbfgsPair<T>>,
    work_s: DVector<T>,
    work_y: DVector<T>,
}

impl<T: Scalar> Lbfgs<T> {
    /// Creates an empty approximation for vectors of length `n`.
    pub fn new(params: LbfgsParams<T>, n: usize) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            history: LimitedMemoryHistory::new_with(params.memory, || LbfgsPair::zeros(n)),
            work_s: DVector::zeros(n),
            work_y: DVector::zeros(n),
            params,
            n,
        })
    }

    /// Checks whether a pair with the given inner products would be accepted.
    ///
    /// `p_sq` is the squared norm of the newest function value; it only
    /// matters when the cautious test is enabled.
    pub fn update_valid(params: &LbfgsParams<T>, y_dot_s: T, s_sq: T, p_sq: T) -> bool {
        if s_sq <= params.min_abs_s {
            return false;
        }
        if !Float::is_finite(y_dot_s) {
            return false;
        }
        let a = if params.force_pos_def {
            y_dot_s
        } else {
            Float::abs(y_dot_s)
        };
        if a <= params.min_div_fac * s_sq {
            return false;
        }
        if params.cbfgs.is_enabled() {
            let two = T::one() + T::one();
            let bound = s_sq * params.cbfgs.epsilon * Float::powf(p_sq, params.cbfgs.alpha / two);
            if a < bound {
                return false;
            }
        }
        true
    }

    /// Stores the pair `(s, y)` if it passes [`update_valid`](Self::update_valid)
    /// or if `forced` is set.
    ///
    /// Returns `Ok(false)` without changing the history when the pair is rejected.
    pub fn update_sy<S1, S2>(
        &mut self,
        s: &VectorRef<T, S1>,
        y: &VectorRef<T, S2>,
        p_next_sq: T,
        forced: bool,
    ) -> Result<bool>
    where
        S1: Storage<T, Dyn>,
        S2: Storage<T, Dyn>,
    {
        ensure_len("s", self.n, s.len())?;
        ensure_len("y", self.n, y.len())?;
        Ok(push_pair(&mut self.history, &self.params, s, y, p_next_sq, forced))
    }

    /// Forms `s = x_next − x_k` and `y = ±(p_next − p_k)` and stores them
    /// like [`update_sy`](Self::update_sy).
    pub fn update<S1, S2, S3, S4>(
        &mut self,
        x_k: &VectorRef<T, S1>,
        x_next: &VectorRef<T, S2>,
        p_k: &VectorRef<T, S3>,
        p_next: &VectorRef<T, S4>,
        sign: Sign,
        forced: bool,
    ) -> Result<bool>
    where
        S1: Storage<T, Dyn>,
        S2: Storage<T, Dyn>,
        S3: Storage<T, Dyn>,
        S4: Storage<T, Dyn>,
    {
        ensure_len("x_k", self.n, x_k.len())?;
        ensure_len("x_next", self.n, x_next.len())?;
        ensure_len("p_k", self.n, p_k.len())?;
        ensure_len("p_next", self.n, p_next.len())?;

        self.work_s.copy_from(x_next);
        self.work_s.axpy(-T::one(), x_k, T::one());
        match sign {
            Sign::Positive => {
                self.work_y.copy_from(p_next);
                self.work_y.axpy(-T::one(), p_k, T::one());
            }
            Sign::Negative => {
                self.work_y.copy_from(p_k);
                self.work_y.axpy(-T::one(), p_next, T::one());
            }
        }
        let p_next_sq = if self.params.cbfgs.is_enabled() {
            p_next.norm_squared()
        } else {
            T::zero()
        };
        Ok(push_pair(
            &mut self.history,
            &self.params,
            &self.work_s,
            &self.work_y,
            p_next_sq,
            forced,
        ))
    }

    /// Overwrites `q` with `Hₖ q`, using `H₀ = γ I`.
    ///
    /// A negative `gamma` selects `γ = 〈s, y〉 / 〈y, y〉` of the newest pair.
    /// Returns `Ok(false)` and leaves `q` untouched if the history is empty.
    pub fn apply<S>(&mut self, q: &mut VectorRef<T, S>, gamma: T) -> Result<bool>
    where
        S: StorageMut<T, Dyn>,
    {
        ensure_len("q", self.n, q.len())?;
        let Some(newest) = self.history.newest() else {
            return Ok(false);
        };
        let gamma = if gamma < T::zero() {
            T::one() / (newest.rho * newest.y.norm_squared())
        } else {
            gamma
        };

        for pair in self.history.iter_mut().rev() {
            pair.alpha = pair.rho * pair.s.dot(&*q);
            q.axpy(-pair.alpha, &pair.y, T::one());
        }

        q.scale_mut(gamma);

        for pair in self.history.iter() {
            let beta = pair.rho * pair.y.dot(&*q);
            q.axpy(pair.alpha - beta, &pair.s, T::one());
        }
        Ok(true)
    }

    /// Applies `Hₖ` restricted to the indices in `mask`.
    ///
    /// Only `q[mask]` is read and written. Each `ρᵢ` is recomputed from the
    /// restricted vectors and pairs that fail [`update_valid`](Self::update_valid)
    /// on them are skipped. The stored full-vector `ρᵢ` are not modified.
    ///
    /// A negative `gamma` selects `γ` from the newest pair that passes the
    /// check; if there is none, `q` is left untouched and `Ok(false)` is
    /// returned. Fails with [`AccelError::Unsupported`] when the cautious test
    /// is enabled.
    pub fn apply_masked<S>(
        &mut self,
        q: &mut VectorRef<T, S>,
        gamma: T,
        mask: &[usize],
    ) -> Result<bool>
    where
        S: StorageMut<T, Dyn>,
    {
        if self.params.cbfgs.is_enabled() {
            return Err(AccelError::unsupported(
                "masked L-BFGS apply cannot be combined with the cautious BFGS test",
            ));
        }
        ensure_len("q", self.n, q.len())?;
        ensure_indices(mask, self.n)?;
        if self.history.is_empty() {
            return Ok(false);
        }

        let mut gamma = (gamma >= T::zero()).then_some(gamma);
        for pair in self.history.iter_mut().rev() {
            let y_dot_s = dot_masked(&pair.s, &pair.y, mask);
            let s_sq = dot_masked(&pair.s, &pair.s, mask);
            if !Self::update_valid(&self.params, y_dot_s, s_sq, T::zero()) {
                pair.masked_rho = None;
                continue;
            }
            let rho = T::one() / y_dot_s;
            pair.masked_rho = Some(rho);
            pair.alpha = rho * dot_masked(&pair.s, &*q, mask);
            axpy_masked(-pair.alpha, &pair.y, q, mask);
            if gamma.is_none() {
                gamma = Some(T::one() / (rho * dot_masked(&pair.y, &pair.y, mask)));
            }
        }

        let Some(gamma) = gamma else {
            trace!("no stored pair is valid on the index set");
            return Ok(false);
        };
        scale_masked(q, gamma, mask);

        for pair in self.history.iter() {
            if let Some(rho) = pair.masked_rho {
                let beta = rho * dot_masked(&pair.y, &*q, mask);
                axpy_masked(pair.alpha - beta, &pair.s, q, mask);
            }
        }
        Ok(true)
    }

    /// Multiplies every stored `y` by `factor` (and `ρ` by `1 / factor`).
    pub fn scale_y(&mut self, factor: T) {
        let inv = T::one() / factor;
        for pair in self.history.iter_mut() {
            pair.y.scale_mut(factor);
            pair.rho *= inv;
        }
    }

    /// Discards all pairs, keeping the allocated storage.
    pub fn reset(&mut self) {
        debug!(discarded = self.history.len(), "L-BFGS history reset");
        self.history.reset();
    }

    /// Reallocates for vectors of length `n`, discarding all pairs.
    pub fn resize(&mut self, n: usize) {
        debug!(from = self.n, to = n, "L-BFGS resized");
        self.n = n;
        self.history = LimitedMemoryHistory::new_with(self.params.memory, || LbfgsPair::zeros(n));
        self.work_s = DVector::zeros(n);
        self.work_y = DVector::zeros(n);
    }

    /// Length of the vectors.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Maximum number of stored pairs.
    pub fn history(&self) -> usize {
        self.history.capacity()
    }

    /// Number of pairs currently stored.
    pub fn current_history(&self) -> usize {
        self.history.len()
    }

    /// The stored pairs, oldest first.
    pub fn pairs(&self) -> impl DoubleEndedIterator<Item = &LbfgsPair<T>> + '_ {
        self.history.iter()
    }

    /// The parameters this instance was created with.
    pub fn params(&self) -> &LbfgsParams<T> {
        &self.params
    }
}

fn push_pair<T, S1, S2>(
    history: &mut LimitedMemoryHistory<LbfgsPair<T>>,
    params: &LbfgsParams<T>,
    s: &VectorRef<T, S1>,
    y: &VectorRef<T, S2>,
    p_next_sq: T,
    forced: bool,
) -> bool
where
    T: Scalar,
    S1: Storage<T, Dyn>,
    S2: Storage<T, Dyn>,
{
    let y_dot_s = y.dot(s);
    if !forced {
        let s_sq = s.norm_squared();
        if !Lbfgs::update_valid(params, y_dot_s, s_sq, p_next_sq) {
            trace!(y_dot_s = %y_dot_s, s_sq = %s_sq, "rejected L-BFGS update");
            return false;
        }
    }
    history.push_with(|pair| {
        pair.s.copy_from(s);
        pair.y.copy_from(y);
        pair.rho = T::one() / y_dot_s;
        pair.masked_rho = None;
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn vec(v: &[f64]) -> DVector<f64> {
        DVector::from_column_slice(v)
    }

    fn filled(memory: usize) -> Lbfgs<f64> {
        let mut lbfgs = Lbfgs::new(LbfgsParams::new().with_memory(memory), 3).unwrap();
        let h = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 0.5, 0.0, 0.5, 2.0]);
        for s in [vec(&[1.0, 0.0, 0.0]), vec(&[0.3, 1.0, -0.2]), vec(&[0.1, 0.4, 1.0])] {
            let y = &h * &s;
            assert!(lbfgs.update_sy(&s, &y, 0.0, false).unwrap());
        }
        lbfgs
    }

    #[test]
    fn test_params_default_and_builder() {
        let p = LbfgsParams::<f64>::default();
        assert_eq!(p.memory, 10);
        assert_eq!(p.min_div_fac, 1e-10);
        assert_eq!(p.min_abs_s, 1e-32);
        assert!(p.force_pos_def);
        assert!(!p.cbfgs.is_enabled());
        assert_eq!(p.cbfgs.alpha, 1.0);

        let p = LbfgsParams::<f64>::new()
            .with_memory(3)
            .with_min_div_fac(1e-6)
            .with_min_abs_s(1e-20)
            .with_force_pos_def(false)
            .with_cbfgs(2.0, 1e-4);
        assert_eq!(p.memory, 3);
        assert!(!p.force_pos_def);
        assert!(p.cbfgs.is_enabled());
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_params_validation() {
        assert!(Lbfgs::<f64>::new(LbfgsParams::new().with_memory(0), 2).is_err());
        assert!(LbfgsParams::<f64>::new().with_min_div_fac(-1.0).validate().is_err());
        assert!(LbfgsParams::<f64>::new().with_cbfgs(f64::NAN, 1.0).validate().is_err());
        assert!(LbfgsParams::<f64>::new().with_cbfgs(1.0, -1.0).validate().is_err());
    }

    #[test]
    fn test_update_valid() {
        let p = LbfgsParams::<f64>::default();
        assert!(Lbfgs::update_valid(&p, 1.0, 1.0, 0.0));
        assert!(!Lbfgs::update_valid(&p, 1.0, 0.0, 0.0));
        assert!(!Lbfgs::update_valid(&p, f64::INFINITY, 1.0, 0.0));
        assert!(!Lbfgs::update_valid(&p, f64::NAN, 1.0, 0.0));
        assert!(!Lbfgs::update_valid(&p, -1.0, 1.0, 0.0));
        assert!(!Lbfgs::update_valid(&p, 1e-12, 1.0, 0.0));

        let p = p.with_force_pos_def(false);
        assert!(Lbfgs::update_valid(&p, -1.0, 1.0, 0.0));

        let p = LbfgsParams::<f64>::new().with_cbfgs(1.0, 0.5);
        // 〈y, s〉 / 〈s, s〉 = 1 against ϵ ‖p‖ = 0.5 ‖p‖
        assert!(Lbfgs::update_valid(&p, 1.0, 1.0, 4.0));
        assert!(!Lbfgs::update_valid(&p, 1.0, 1.0, 9.0));
    }

    #[test]
    fn test_rejected_update_leaves_history() {
        let mut lbfgs = filled(5);
        let before: Vec<f64> = lbfgs.pairs().map(LbfgsPair::rho).collect();
        let tiny = vec(&[1e-17, 0.0, 0.0]);
        assert!(!lbfgs.update_sy(&tiny, &tiny, 0.0, false).unwrap());
        let negative = vec(&[-1.0, 0.0, 0.0]);
        assert!(!lbfgs.update_sy(&vec(&[1.0, 0.0, 0.0]), &negative, 0.0, false).unwrap());
        assert_eq!(lbfgs.current_history(), 3);
        let after: Vec<f64> = lbfgs.pairs().map(LbfgsPair::rho).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_forced_update_is_stored() {
        let mut lbfgs = Lbfgs::new(LbfgsParams::new(), 1).unwrap();
        assert!(lbfgs.update_sy(&vec(&[1.0]), &vec(&[-2.0]), 0.0, true).unwrap());
        assert_eq!(lbfgs.current_history(), 1);
        assert_eq!(lbfgs.pairs().next().unwrap().rho(), -0.5);
    }

    #[test]
    fn test_apply_empty_history() {
        let mut lbfgs = Lbfgs::<f64>::new(LbfgsParams::new(), 2).unwrap();
        let mut q = vec(&[3.0, -1.0]);
        assert!(!lbfgs.apply(&mut q, 1.0).unwrap());
        assert!(!lbfgs.apply(&mut q, -1.0).unwrap());
        assert_eq!(q, vec(&[3.0, -1.0]));
    }

    #[test]
    fn test_apply_satisfies_newest_secant() {
        let mut lbfgs = filled(5);
        let newest = lbfgs.pairs().next_back().unwrap();
        let (s, y) = (newest.s().clone(), newest.y().clone());
        for gamma in [-1.0, 1.0, 0.25] {
            let mut q = y.clone();
            assert!(lbfgs.apply(&mut q, gamma).unwrap());
            assert_relative_eq!(q, s, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_apply_matches_dense_bfgs_recursion() {
        let mut lbfgs = filled(5);
        let gamma = 0.7;
        let mut h = DMatrix::<f64>::identity(3, 3) * gamma;
        for pair in lbfgs.pairs() {
            let (s, y) = (pair.s(), pair.y());
            let rho = 1.0 / y.dot(s);
            let v = DMatrix::identity(3, 3) - rho * (y * s.transpose());
            h = v.transpose() * &h * &v + rho * (s * s.transpose());
        }

        let g = vec(&[1.0, -2.0, 0.5]);
        let mut q = g.clone();
        assert!(lbfgs.apply(&mut q, gamma).unwrap());
        assert_relative_eq!(q, &h * &g, epsilon = 1e-12);
    }

    #[test]
    fn test_update_with_sign() {
        let x0 = vec(&[0.0, 0.0]);
        let x1 = vec(&[1.0, 2.0]);
        let p0 = vec(&[3.0, 3.0]);
        let p1 = vec(&[1.0, 0.0]);

        let mut a = Lbfgs::new(LbfgsParams::new(), 2).unwrap();
        assert!(a.update(&x0, &x1, &p0, &p1, Sign::Negative, false).unwrap());
        let pair = a.pairs().next().unwrap();
        assert_eq!(pair.s(), &vec(&[1.0, 2.0]));
        assert_eq!(pair.y(), &vec(&[2.0, 3.0]));
        assert_relative_eq!(pair.rho(), 1.0 / 8.0);

        let mut b = Lbfgs::new(LbfgsParams::new(), 2).unwrap();
        assert!(!b.update(&x0, &x1, &p0, &p1, Sign::Positive, false).unwrap());
        assert_eq!(b.current_history(), 0);
    }

    #[test]
    fn test_cbfgs_uses_newest_value_norm() {
        let params = LbfgsParams::new().with_cbfgs(2.0, 0.1);
        let mut lbfgs = Lbfgs::new(params, 1).unwrap();
        // 〈y, s〉 / 〈s, s〉 = 1, ϵ ‖p‖² = 0.1 · 100
        let (x0, x1) = (vec(&[0.0]), vec(&[1.0]));
        let (p0, p1) = (vec(&[9.0]), vec(&[10.0]));
        assert!(!lbfgs.update(&x0, &x1, &p0, &p1, Sign::Positive, false).unwrap());
        // ϵ ‖p‖² = 0.1 · 1
        let (p0, p1) = (vec(&[0.0]), vec(&[1.0]));
        assert!(lbfgs.update(&x0, &x1, &p0, &p1, Sign::Positive, false).unwrap());
    }

    #[test]
    fn test_masked_apply_with_full_mask_matches_apply() {
        let mut a = filled(5);
        let mut b = a.clone();
        let mut qa = vec(&[0.3, -1.0, 2.0]);
        let mut qb = qa.clone();
        a.apply(&mut qa, -1.0).unwrap();
        b.apply_masked(&mut qb, -1.0, &[0, 1, 2]).unwrap();
        assert_relative_eq!(qa, qb, epsilon = 1e-14);
    }

    #[test]
    fn test_masked_apply_only_touches_mask() {
        let mut lbfgs = filled(5);
        let mut q = vec(&[0.3, -1.0, 2.0]);
        assert!(lbfgs.apply_masked(&mut q, 1.0, &[0, 2]).unwrap());
        assert_eq!(q[1], -1.0);
        assert!(q[0] != 0.3 || q[2] != 2.0);
    }

    #[test]
    fn test_masked_apply_matches_reduced_problem() {
        let mask = [0, 2];
        let restrict =
            |v: &DVector<f64>| DVector::from_iterator(mask.len(), mask.iter().map(|&i| v[i]));
        let pairs = [
            (vec(&[1.0, 0.0, 0.5, 0.0]), vec(&[2.0, 1.0, 0.5, 0.0])),
            // 〈y, s〉 = 4.5 on all indices but −1.5 on the mask
            (vec(&[1.0, 2.0, -1.0, 0.0]), vec(&[-1.0, 3.0, 0.5, 1.0])),
            (vec(&[0.5, -1.0, 1.0, 2.0]), vec(&[1.0, -1.0, 2.0, 1.0])),
            (vec(&[0.2, 0.3, -0.4, 1.0]), vec(&[0.5, 0.1, -0.3, 2.0])),
        ];

        let mut full = Lbfgs::new(LbfgsParams::new(), 4).unwrap();
        let mut reduced = Lbfgs::new(LbfgsParams::new(), mask.len()).unwrap();
        let mut kept = 0;
        for (s, y) in &pairs {
            assert!(full.update_sy(s, y, 0.0, false).unwrap());
            if reduced.update_sy(&restrict(s), &restrict(y), 0.0, false).unwrap() {
                kept += 1;
            }
        }
        assert_eq!(full.current_history(), 4);
        assert_eq!(kept, 3);

        for gamma in [-1.0, 0.7] {
            let q0 = vec(&[0.3, -1.0, 2.0, 4.0]);
            let mut q = q0.clone();
            assert!(full.apply_masked(&mut q, gamma, &mask).unwrap());
            let mut expected = restrict(&q0);
            assert!(reduced.apply(&mut expected, gamma).unwrap());

            assert_relative_eq!(restrict(&q), expected, epsilon = 1e-12);
            assert_eq!((q[1], q[3]), (q0[1], q0[3]));
        }
    }

    #[test]
    fn test_masked_apply_keeps_stored_rho() {
        let mut lbfgs = filled(5);
        let before: Vec<f64> = lbfgs.pairs().map(LbfgsPair::rho).collect();
        let mut q = vec(&[1.0, 1.0, 1.0]);
        lbfgs.apply_masked(&mut q, -1.0, &[1]).unwrap();
        let after: Vec<f64> = lbfgs.pairs().map(LbfgsPair::rho).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_masked_apply_without_valid_pairs() {
        let mut lbfgs = Lbfgs::new(LbfgsParams::new(), 2).unwrap();
        lbfgs.update_sy(&vec(&[1.0, 0.0]), &vec(&[1.0, 0.0]), 0.0, false).unwrap();
        let mut q = vec(&[5.0, 7.0]);
        // sᵀs restricted to index 1 is zero, so the only pair is skipped.
        assert!(!lbfgs.apply_masked(&mut q, -1.0, &[1]).unwrap());
        assert_eq!(q, vec(&[5.0, 7.0]));
        assert!(lbfgs.apply_masked(&mut q, 2.0, &[1]).unwrap());
        assert_eq!(q, vec(&[5.0, 14.0]));
    }

    #[test]
    fn test_masked_apply_errors() {
        let mut lbfgs = Lbfgs::new(LbfgsParams::new().with_cbfgs(1.0, 1e-3), 2).unwrap();
        let mut q = vec(&[1.0, 2.0]);
        assert!(matches!(
            lbfgs.apply_masked(&mut q, 1.0, &[0]),
            Err(AccelError::Unsupported { .. })
        ));

        let mut lbfgs = Lbfgs::new(LbfgsParams::new(), 2).unwrap();
        assert!(matches!(
            lbfgs.apply_masked(&mut q, 1.0, &[0, 2]),
            Err(AccelError::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_scale_y() {
        let mut lbfgs = filled(5);
        let before: Vec<(DVector<f64>, f64)> =
            lbfgs.pairs().map(|p| (p.y().clone(), p.rho())).collect();
        lbfgs.scale_y(2.0);
        for (pair, (y, rho)) in lbfgs.pairs().zip(before) {
            assert_relative_eq!(pair.y(), &(y * 2.0));
            assert_relative_eq!(pair.rho(), rho / 2.0);
        }
    }

    #[test]
    fn test_reset_then_reuse_matches_fresh() {
        let mut used = filled(2);
        used.reset();
        assert_eq!(used.current_history(), 0);
        let mut fresh = Lbfgs::new(LbfgsParams::new().with_memory(2), 3).unwrap();

        let s = vec(&[1.0, 2.0, 0.5]);
        let y = vec(&[2.0, 1.0, 1.0]);
        assert!(used.update_sy(&s, &y, 0.0, false).unwrap());
        assert!(fresh.update_sy(&s, &y, 0.0, false).unwrap());

        let mut qa = vec(&[1.0, -1.0, 3.0]);
        let mut qb = qa.clone();
        used.apply(&mut qa, -1.0).unwrap();
        fresh.apply(&mut qb, -1.0).unwrap();
        assert_eq!(qa, qb);
    }

    #[test]
    fn test_memory_window_and_dimensions() {
        let mut lbfgs = filled(2);
        assert_eq!(lbfgs.history(), 2);
        assert_eq!(lbfgs.current_history(), 2);
        assert_eq!(lbfgs.pairs().next().unwrap().s(), &vec(&[0.3, 1.0, -0.2]));

        let mut q = vec(&[1.0, 2.0]);
        assert!(matches!(
            lbfgs.apply(&mut q, 1.0),
            Err(AccelError::DimensionMismatch { expected: 3, actual: 2, .. })
        ));
        assert!(lbfgs.update_sy(&vec(&[1.0, 0.0]), &vec(&[1.0, 0.0, 0.0]), 0.0, false).is_err());
        assert_eq!(lbfgs.current_history(), 2);

        lbfgs.resize(2);
        assert_eq!(lbfgs.n(), 2);
        assert_eq!(lbfgs.current_history(), 0);
        assert!(!lbfgs.apply(&mut q, 1.0).unwrap());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_params_serde_round_trip() {
        let params = LbfgsParams::<f64>::new().with_memory(7).with_cbfgs(1.5, 1e-6);
        let json = serde_json::to_string(&params).unwrap();
        let back: LbfgsParams<f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);

        // 1e-32 in the defaults must parse back to the same bits.
        let defaults = LbfgsParams::<f64>::default();
        let json = serde_json::to_string(&defaults).unwrap();
        let back: LbfgsParams<f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.min_abs_s.to_bits(), 1e-32_f64.to_bits());
        assert_eq!(defaults, back);
    }
}
