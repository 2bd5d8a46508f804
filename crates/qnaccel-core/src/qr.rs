//! Incremental QR factorization of a sliding window of columns.
//!
//! [`LimitedMemoryQR`] keeps `A = Q R` for the last (at most) `m` columns that
//! were appended. Appending orthogonalizes the new column against `Q` with
//! modified Gram-Schmidt; once `m` columns are stored, the oldest column is
//! dropped first and `R` is brought back to triangular form with Givens
//! rotations. Each step costs `O(n m)` instead of refactorizing from scratch.
//!
//! # Storage
//!
//! `Q` is `n × m` with columns in logical (oldest-first) order. The columns of
//! `R` are stored in a ring so that dropping the oldest column does not shift
//! memory: logical column `j` lives at physical column `(ring_head + j) % m`.
//! Rows of `R` are always in logical order.
//!
//! ```text
//!   m = 3, two slides done:   R storage columns   [ c2 | c0 | c1 ]
//!                                                     ▲ ring_head = 1
//! ```

use crate::error::Result;
use crate::linalg::GivensRotation;
use crate::ring::{CircularIter, CircularRange};
use crate::types::{DMatrix, DVector, Scalar, VectorRef};
use crate::validation::ensure_len;
use nalgebra::storage::{Storage, StorageMut};
use nalgebra::{DMatrixView, Dyn, Matrix};
use num_traits::Float;
use tracing::{debug, trace};

/// Upper bound on re-orthogonalization passes per appended column.
const MAX_REORTH_PASSES: usize = 3;

/// A new column is re-orthogonalized while its norm shrinks below this
/// fraction of the norm before the last pass.
const REORTH_THRESHOLD: f64 = 0.7;

/// QR factorization of the last `m` columns appended to it.
#[derive(Debug, Clone)]
pub struct LimitedMemoryQR<T: Scalar> {
    q: DMatrix<T>,
    r: DMatrix<T>,
    work: DVector<T>,
    q_idx: usize,
    r_idx_start: usize,
    r_idx_end: usize,
    reorth_count: usize,
    min_eig: T,
    max_eig: T,
}

impl<T: Scalar> LimitedMemoryQR<T> {
    /// Creates an empty factorization for columns of length `n`, keeping at
    /// most `m` of them.
    ///
    /// # Panics
    ///
    /// Panics if `m` is zero.
    pub fn new(n: usize, m: usize) -> Self {
        assert!(m > 0, "LimitedMemoryQR needs room for at least one column");
        Self {
            q: DMatrix::zeros(n, m),
            r: DMatrix::zeros(m, m),
            work: DVector::zeros(n),
            q_idx: 0,
            r_idx_start: 0,
            r_idx_end: 0,
            reorth_count: 0,
            min_eig: <T as Float>::infinity(),
            max_eig: <T as Float>::neg_infinity(),
        }
    }

    /// Length of the columns.
    pub fn n(&self) -> usize {
        self.q.nrows()
    }

    /// Maximum number of stored columns.
    pub fn m(&self) -> usize {
        self.r.ncols()
    }

    /// Number of columns currently stored.
    pub fn num_columns(&self) -> usize {
        self.q_idx
    }

    /// Returns `true` if no column is stored.
    pub fn is_empty(&self) -> bool {
        self.q_idx == 0
    }

    /// Returns `true` if the next append drops the oldest column.
    pub fn is_full(&self) -> bool {
        self.q_idx == self.m()
    }

    #[inline]
    fn r_succ(&self, i: usize) -> usize {
        if i + 1 < self.m() {
            i + 1
        } else {
            0
        }
    }

    /// Physical column of `R` holding logical column `j`.
    #[inline]
    fn r_col(&self, j: usize) -> usize {
        let c = self.r_idx_start + j;
        if c >= self.m() {
            c - self.m()
        } else {
            c
        }
    }

    /// Appends a column, dropping the oldest one first if the window is full.
    pub fn add_column<S>(&mut self, v: &VectorRef<T, S>) -> Result<()>
    where
        S: Storage<T, Dyn>,
    {
        ensure_len("v", self.n(), v.len())?;
        if self.is_full() {
            self.remove_column();
        }
        self.work.copy_from(v);
        self.append_work_column();
        Ok(())
    }

    /// Appends the column `a - b` without materializing the difference.
    pub fn add_column_difference<S1, S2>(
        &mut self,
        a: &VectorRef<T, S1>,
        b: &VectorRef<T, S2>,
    ) -> Result<()>
    where
        S1: Storage<T, Dyn>,
        S2: Storage<T, Dyn>,
    {
        ensure_len("a", self.n(), a.len())?;
        ensure_len("b", self.n(), b.len())?;
        if self.is_full() {
            self.remove_column();
        }
        for ((w, &x), &y) in self.work.iter_mut().zip(a.iter()).zip(b.iter()) {
            *w = x - y;
        }
        self.append_work_column();
        Ok(())
    }

    /// Orthogonalizes `work` against the stored columns of `Q` and appends it.
    fn append_work_column(&mut self) {
        let end = self.r_idx_end;
        let mut norm_v = self.work.norm();

        for i in 0..self.q_idx {
            let qi = self.q.column(i);
            let rij = qi.dot(&self.work);
            self.r[(i, end)] = rij;
            self.work.axpy(-rij, &qi, T::one());
        }

        let eta = <T as Scalar>::from_f64(REORTH_THRESHOLD);
        let mut norm_q = self.work.norm();
        let mut passes = 0;
        while norm_q > T::zero() && norm_q < eta * norm_v && passes < MAX_REORTH_PASSES {
            for i in 0..self.q_idx {
                let qi = self.q.column(i);
                let correction = qi.dot(&self.work);
                self.r[(i, end)] += correction;
                self.work.axpy(-correction, &qi, T::one());
            }
            norm_v = norm_q;
            norm_q = self.work.norm();
            passes += 1;
            self.reorth_count += 1;
            trace!(column = self.q_idx, pass = passes, "re-orthogonalized QR column");
        }

        self.r[(self.q_idx, end)] = norm_q;
        let mut q_new = self.q.column_mut(self.q_idx);
        q_new.copy_from(&self.work);
        if norm_q > T::zero() {
            q_new.unscale_mut(norm_q);
        }

        self.track_diagonal(norm_q);
        self.q_idx += 1;
        self.r_idx_end = self.r_succ(end);
    }

    fn track_diagonal(&mut self, d: T) {
        let d = Float::abs(d);
        self.min_eig = Float::min(self.min_eig, d);
        self.max_eig = Float::max(self.max_eig, d);
    }

    /// Drops the oldest column. Does nothing if no column is stored.
    pub fn remove_column(&mut self) {
        if self.q_idx == 0 {
            return;
        }
        // Without its first column, R is upper Hessenberg. One rotation per
        // sub-diagonal element restores the triangular form.
        let mut row = 0;
        let mut c = self.r_succ(self.r_idx_start);
        while row + 1 < self.q_idx {
            let (g, rho) = GivensRotation::zeroing(self.r[(row, c)], self.r[(row + 1, c)]);
            self.r[(row, c)] = rho;
            self.r[(row + 1, c)] = T::zero();

            let mut cc = self.r_succ(c);
            while cc != self.r_idx_end {
                let (x, y) = g.apply(self.r[(row, cc)], self.r[(row + 1, cc)]);
                self.r[(row, cc)] = x;
                self.r[(row + 1, cc)] = y;
                cc = self.r_succ(cc);
            }

            let (mut q_row, mut q_next) = self.q.columns_range_pair_mut(row, row + 1);
            g.apply_pair(&mut q_row, &mut q_next);

            self.track_diagonal(rho);
            row += 1;
            c = self.r_succ(c);
        }
        self.q_idx -= 1;
        self.r_idx_start = self.r_succ(self.r_idx_start);
    }

    /// Solves `R x = Qᵀ b` in the least-squares sense over the stored columns.
    ///
    /// `x` has length `m`; entries past [`num_columns`](Self::num_columns) are
    /// set to zero. A diagonal element of `R` that is zero or smaller than
    /// `tol` in magnitude is treated as a rank deficiency and the matching
    /// entry of `x` is set to zero.
    pub fn solve_col<S1, S2>(
        &self,
        b: &VectorRef<T, S1>,
        x: &mut VectorRef<T, S2>,
        tol: T,
    ) -> Result<()>
    where
        S1: Storage<T, Dyn>,
        S2: StorageMut<T, Dyn>,
    {
        ensure_len("b", self.n(), b.len())?;
        ensure_len("x", self.m(), x.len())?;

        let q = self.q_idx;
        for i in 0..q {
            x[i] = self.q.column(i).dot(b);
        }
        for i in q..self.m() {
            x[i] = T::zero();
        }

        for i in (0..q).rev() {
            let diag = self.r[(i, self.r_col(i))];
            if diag == T::zero() || Float::abs(diag) < tol {
                debug!(column = i, "rank-deficient column in QR solve");
                x[i] = T::zero();
                continue;
            }
            let mut acc = x[i];
            for j in i + 1..q {
                acc -= self.r[(i, self.r_col(j))] * x[j];
            }
            x[i] = acc / diag;
        }
        Ok(())
    }

    /// Column-wise [`solve_col`](Self::solve_col) of `R X = Qᵀ B`, with `B`
    /// of size `n × k` and `X` of size `m × k`.
    pub fn solve<S1, S2>(
        &self,
        b: &Matrix<T, Dyn, Dyn, S1>,
        x: &mut Matrix<T, Dyn, Dyn, S2>,
        tol: T,
    ) -> Result<()>
    where
        S1: Storage<T, Dyn, Dyn>,
        S2: StorageMut<T, Dyn, Dyn>,
    {
        ensure_len("X (columns)", b.ncols(), x.ncols())?;
        for j in 0..b.ncols() {
            self.solve_col(&b.column(j), &mut x.column_mut(j), tol)?;
        }
        Ok(())
    }

    /// The orthonormal factor restricted to the stored columns.
    pub fn q(&self) -> DMatrixView<'_, T> {
        self.q.columns(0, self.q_idx)
    }

    /// The triangular factor in logical column order.
    pub fn r(&self) -> DMatrix<T> {
        let q = self.q_idx;
        DMatrix::from_fn(q, q, |i, j| {
            if i <= j {
                self.r[(i, self.r_col(j))]
            } else {
                T::zero()
            }
        })
    }

    /// Physical slot of the oldest stored column.
    pub fn ring_head(&self) -> usize {
        self.r_idx_start
    }

    /// Physical slot the next column will be written to.
    pub fn ring_tail(&self) -> usize {
        self.r_idx_end
    }

    /// Physical slots of the stored columns, oldest first.
    pub fn ring_iter(&self) -> CircularIter {
        CircularRange::new(self.q_idx, self.r_idx_start, self.m()).iter()
    }

    /// Smallest `|R_ii|` seen since the last reset, a cheap conditioning hint.
    pub fn min_eig(&self) -> T {
        self.min_eig
    }

    /// Largest `|R_ii|` seen since the last reset.
    pub fn max_eig(&self) -> T {
        self.max_eig
    }

    /// Restarts the tracking of the diagonal extremes.
    pub fn clear_min_max(&mut self) {
        self.min_eig = <T as Float>::infinity();
        self.max_eig = <T as Float>::neg_infinity();
    }

    /// Number of re-orthogonalization passes since the last reset.
    pub fn reorth_count(&self) -> usize {
        self.reorth_count
    }

    /// Resets the re-orthogonalization counter.
    pub fn clear_reorth_count(&mut self) {
        self.reorth_count = 0;
    }

    /// Multiplies `R` by `factor`, which corresponds to scaling all columns.
    pub fn scale_r(&mut self, factor: T) {
        self.r.scale_mut(factor);
        let f = Float::abs(factor);
        self.min_eig *= f;
        self.max_eig *= f;
    }

    /// Drops all columns, keeping the allocated storage.
    pub fn reset(&mut self) {
        self.q_idx = 0;
        self.r_idx_start = 0;
        self.r_idx_end = 0;
        self.reorth_count = 0;
        self.clear_min_max();
    }

    /// Reallocates for columns of length `n` and a window of `m`, dropping
    /// all columns.
    ///
    /// # Panics
    ///
    /// Panics if `m` is zero.
    pub fn resize(&mut self, n: usize, m: usize) {
        *self = Self::new(n, m);
    }
}
