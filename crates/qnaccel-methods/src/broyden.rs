//! Limited-memory Broyden's "good" method.
//!
//! The inverse Jacobian is never formed. Each accepted update stores the step
//! `sᵢ` and a correction direction `s̃ᵢ` such that
//!
//! ```text
//! Hₖ q = γ q + Σᵢ s̃ᵢ 〈sᵢ, q₍ᵢ₋₁₎〉        (oldest first, q₍ᵢ₎ the running vector)
//! ```
//!
//! For a new pair `(s, y)` the correction is `s̃ = (s − Hₖ y) / 〈s, Hₖ y〉`,
//! optionally damped à la Powell so that `〈s, Hₖ y〉 / 〈s, s〉` stays away
//! from zero.
//!
//! Each `s̃ᵢ` depends on all earlier pairs, so dropping the oldest pair from a
//! full history does not give the exact limited-memory Broyden matrix. With
//! [`BroydenGoodParams::restarted`] (the default) the history is cleared
//! instead once it is full.

use nalgebra::storage::{Storage, StorageMut};
use nalgebra::Dyn;
use num_traits::Float;
use qnaccel_core::validation::{ensure_len, ensure_memory, ensure_non_negative};
use qnaccel_core::{AccelError, DVector, LimitedMemoryHistory, Result, Scalar, VectorRef};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Configuration for [`BroydenGood`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BroydenGoodParams<T> {
    /// Number of `(s, s̃)` pairs to store (at least 1).
    pub memory: usize,
    /// Reject an update if `|〈s, Hy〉| ≤ min_div_abs`.
    pub min_div_abs: T,
    /// Require `〈s, Hy〉` itself to exceed the threshold instead of its
    /// magnitude; also changes the Powell damping rule.
    pub force_pos_def: bool,
    /// Clear the history once it is full instead of dropping the oldest pair.
    pub restarted: bool,
    /// Powell damping threshold `θ̄`; zero disables damping.
    pub powell_damping_factor: T,
    /// Lower bound on the magnitude of the step scale used by
    /// [`BroydenGood::apply`] when `γ < 0`.
    pub min_stepsize: T,
}

impl<T: Scalar> Default for BroydenGoodParams<T> {
    fn default() -> Self {
        Self {
            memory: 10,
            min_div_abs: <T as Scalar>::from_f64(1e-32),
            force_pos_def: false,
            restarted: true,
            powell_damping_factor: T::zero(),
            min_stepsize: <T as Scalar>::from_f64(1e-10),
        }
    }
}

impl<T: Scalar> BroydenGoodParams<T> {
    /// Creates parameters with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of stored pairs.
    pub fn with_memory(mut self, memory: usize) -> Self {
        self.memory = memory;
        self
    }

    /// Sets the absolute division threshold.
    pub fn with_min_div_abs(mut self, min_div_abs: T) -> Self {
        self.min_div_abs = min_div_abs;
        self
    }

    /// Enables or disables the positive-definiteness requirement.
    pub fn with_force_pos_def(mut self, force_pos_def: bool) -> Self {
        self.force_pos_def = force_pos_def;
        self
    }

    /// Chooses between restarting and sliding once the history is full.
    pub fn with_restarted(mut self, restarted: bool) -> Self {
        self.restarted = restarted;
        self
    }

    /// Sets the Powell damping threshold.
    pub fn with_powell_damping_factor(mut self, factor: T) -> Self {
        self.powell_damping_factor = factor;
        self
    }

    /// Sets the lower bound on the automatic step scale.
    pub fn with_min_stepsize(mut self, min_stepsize: T) -> Self {
        self.min_stepsize = min_stepsize;
        self
    }

    /// Checks that all parameters are usable.
    pub fn validate(&self) -> Result<()> {
        ensure_memory("memory", self.memory)?;
        ensure_non_negative("min_div_abs", self.min_div_abs)?;
        ensure_non_negative("powell_damping_factor", self.powell_damping_factor)?;
        if self.powell_damping_factor > T::one() {
            return Err(AccelError::invalid_configuration(
                "powell_damping_factor",
                self.powell_damping_factor,
                "must lie in [0, 1]",
            ));
        }
        ensure_non_negative("min_stepsize", self.min_stepsize)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct BroydenPair<T: Scalar> {
    s: DVector<T>,
    s_tilde: DVector<T>,
}

impl<T: Scalar> BroydenPair<T> {
    fn zeros(n: usize) -> Self {
        Self {
            s: DVector::zeros(n),
            s_tilde: DVector::zeros(n),
        }
    }
}

/// Limited-memory approximation of an inverse Jacobian by Broyden's good method.
#[derive(Debug, Clone)]
pub struct BroydenGood<T: Scalar> {
    params: BroydenGoodParams<T>,
    n: usize,
    history: LimitedMemoryHistory<BroydenPair<T>>,
    work_r: DVector<T>,
    work_s: DVector<T>,
    work_y: DVector<T>,
    latest_gamma: Option<T>,
}

impl<T: Scalar> BroydenGood<T> {
    /// Creates an empty approximation for vectors of length `n`.
    pub fn new(params: BroydenGoodParams<T>, n: usize) -> Result<Self> {
        params.validate()?;
        if !params.restarted {
            warn!(
                memory = params.memory,
                "Broyden history slides without restarting; the stored corrections \
                 depend on discarded pairs, so the result is not the exact limited-memory update"
            );
        }
        Ok(Self {
            history: LimitedMemoryHistory::new_with(params.memory, || BroydenPair::zeros(n)),
            work_r: DVector::zeros(n),
            work_s: DVector::zeros(n),
            work_y: DVector::zeros(n),
            latest_gamma: None,
            params,
            n,
        })
    }

    /// Stores the update for the pair `(s, y)`.
    ///
    /// Returns `Ok(false)` without changing anything if `〈s, Hₖ y〉` is too
    /// small (or not finite) and `forced` is not set. A pair whose correction
    /// scale would not be finite is refused even when `forced` is set.
    pub fn update_sy<S1, S2>(
        &mut self,
        s: &VectorRef<T, S1>,
        y: &VectorRef<T, S2>,
        forced: bool,
    ) -> Result<bool>
    where
        S1: Storage<T, Dyn>,
        S2: Storage<T, Dyn>,
    {
        ensure_len("s", self.n, s.len())?;
        ensure_len("y", self.n, y.len())?;
        Ok(push_pair(
            &mut self.history,
            &self.params,
            &mut self.work_r,
            &mut self.latest_gamma,
            s,
            y,
            forced,
        ))
    }

    /// Forms `s = x_next − x_k` and `y = p_next − p_k` and stores them like
    /// [`update_sy`](Self::update_sy).
    pub fn update<S1, S2, S3, S4>(
        &mut self,
        x_k: &VectorRef<T, S1>,
        x_next: &VectorRef<T, S2>,
        p_k: &VectorRef<T, S3>,
        p_next: &VectorRef<T, S4>,
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
        self.work_y.copy_from(p_next);
        self.work_y.axpy(-T::one(), p_k, T::one());
        Ok(push_pair(
            &mut self.history,
            &self.params,
            &mut self.work_r,
            &mut self.latest_gamma,
            &self.work_s,
            &self.work_y,
            forced,
        ))
    }

    /// Overwrites `q` with `Hₖ q`, using `H₀ = γ I`.
    ///
    /// A negative `gamma` selects the scale `〈s, y〉 / 〈y, y〉` of the newest
    /// accepted pair, bounded below in magnitude by `min_stepsize`.
    /// Returns `Ok(false)` and leaves `q` untouched if the history is empty.
    pub fn apply<S>(&self, q: &mut VectorRef<T, S>, gamma: T) -> Result<bool>
    where
        S: StorageMut<T, Dyn>,
    {
        ensure_len("q", self.n, q.len())?;
        if self.history.is_empty() {
            return Ok(false);
        }
        let gamma = match self.latest_gamma {
            Some(latest) if gamma < T::zero() => latest,
            _ => gamma,
        };
        if gamma != T::one() {
            q.scale_mut(gamma);
        }
        for pair in self.history.iter() {
            let c = pair.s.dot(&*q);
            q.axpy(c, &pair.s_tilde, T::one());
        }
        Ok(true)
    }

    /// Discards all pairs, keeping the allocated storage.
    pub fn reset(&mut self) {
        debug!(discarded = self.history.len(), "Broyden history reset");
        self.history.reset();
        self.latest_gamma = None;
    }

    /// Reallocates for vectors of length `n`, discarding all pairs.
    pub fn resize(&mut self, n: usize) {
        debug!(from = self.n, to = n, "Broyden resized");
        self.n = n;
        self.history = LimitedMemoryHistory::new_with(self.params.memory, || BroydenPair::zeros(n));
        self.work_r = DVector::zeros(n);
        self.work_s = DVector::zeros(n);
        self.work_y = DVector::zeros(n);
        self.latest_gamma = None;
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

    /// The parameters this instance was created with.
    pub fn params(&self) -> &BroydenGoodParams<T> {
        &self.params
    }
}

/// Checks one pair and stores it, restarting a full history first if asked to.
///
/// `r` is scratch space of length `n` that ends up holding `Hₖ y`.
fn push_pair<T, S1, S2>(
    history: &mut LimitedMemoryHistory<BroydenPair<T>>,
    params: &BroydenGoodParams<T>,
    r: &mut DVector<T>,
    latest_gamma: &mut Option<T>,
    s: &VectorRef<T, S1>,
    y: &VectorRef<T, S2>,
    forced: bool,
) -> bool
where
    T: Scalar,
    S1: Storage<T, Dyn>,
    S2: Storage<T, Dyn>,
{
    let restart = params.restarted && history.is_full();

    // r = Hₖ y, using no history at all if it is about to be cleared.
    r.copy_from(y);
    if !restart {
        for pair in history.iter() {
            let c = pair.s.dot(&*r);
            r.axpy(c, &pair.s_tilde, T::one());
        }
    }
    let s_hy = s.dot(&*r);
    let a = if params.force_pos_def {
        s_hy
    } else {
        Float::abs(s_hy)
    };
    if !forced && !(Float::is_finite(a) && a > params.min_div_abs) {
        trace!(s_hy = %s_hy, "rejected Broyden update");
        return false;
    }

    // Also catches forced pairs with 〈s, Hy〉 = 0.
    let damp = damping(params, s_hy, s.norm_squared());
    if !Float::is_finite(damp) {
        trace!(s_hy = %s_hy, "rejected Broyden update with non-finite scale");
        return false;
    }

    if restart {
        debug!(memory = history.capacity(), "Broyden history full, restarting");
        history.reset();
    }
    history.push_with(|pair| {
        pair.s.copy_from(s);
        pair.s_tilde.copy_from(s);
        pair.s_tilde.axpy(-T::one(), &*r, T::one());
        pair.s_tilde.scale_mut(damp);
    });

    let mut gamma = s.dot(y) / y.norm_squared();
    if !Float::is_finite(gamma) {
        gamma = T::one();
    }
    if Float::abs(gamma) < params.min_stepsize {
        gamma = Float::copysign(params.min_stepsize, gamma);
    }
    *latest_gamma = Some(gamma);
    true
}

/// Scale of `s − Hy` in the stored correction, `1 / 〈s, Hy〉` without damping.
fn damping<T: Scalar>(params: &BroydenGoodParams<T>, s_hy: T, s_sq: T) -> T {
    let theta_bar = params.powell_damping_factor;
    if theta_bar == T::zero() {
        return T::one() / s_hy;
    }
    let one = T::one();
    let gamma = s_hy / s_sq;
    let sign = if gamma >= T::zero() { one } else { -one };
    let (gamma_theta, a_gamma) = if params.force_pos_def {
        (gamma * theta_bar, gamma)
    } else {
        (sign * theta_bar, Float::abs(gamma))
    };
    let theta = if a_gamma >= theta_bar {
        one
    } else {
        (one - gamma_theta) / (one - gamma)
    };
    theta / (s_sq * (one - theta + theta * gamma))
}
