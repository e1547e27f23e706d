//! Limited-memory QR factorization with incremental column updates.
//!
//! Maintains a thin QR factorization `Q R` of a sliding window of at most
//! `memory` columns of length `n`. Columns are appended with a modified
//! Gram-Schmidt pass and evicted oldest-first by dropping the first column
//! of `R` and re-triangularizing with Givens rotations. Both operations are
//! `O(n·memory)`; nothing is recomputed from scratch, which is what makes
//! Anderson acceleration affordable inside the inner solver loop.

use crate::float::Float;
use crate::linalg;

/// Thin QR factorization of a bounded sliding window of columns.
#[derive(Clone, Debug)]
pub struct LimitedMemoryQr<F> {
    /// Orthonormal columns, column-major, `n × memory`.
    q: Vec<F>,
    /// Upper-triangular factor, row-major, `memory × memory`.
    r: Vec<F>,
    /// Scratch column for orthogonalization.
    work: Vec<F>,
    n: usize,
    memory: usize,
    cols: usize,
}

impl<F: Float> LimitedMemoryQr<F> {
    /// Create an empty factorization for length-`n` columns with the given
    /// window capacity.
    pub fn new(n: usize, memory: usize) -> Self {
        LimitedMemoryQr {
            q: vec![F::zero(); n * memory],
            r: vec![F::zero(); memory * memory],
            work: vec![F::zero(); n],
            n,
            memory,
            cols: 0,
        }
    }

    /// Column length.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Window capacity.
    pub fn memory(&self) -> usize {
        self.memory
    }

    /// Number of columns currently in the window.
    pub fn num_cols(&self) -> usize {
        self.cols
    }

    /// Entry `Q[i, j]`.
    pub fn q_entry(&self, i: usize, j: usize) -> F {
        self.q[j * self.n + i]
    }

    /// Entry `R[i, j]` (zero below the diagonal).
    pub fn r_entry(&self, i: usize, j: usize) -> F {
        self.r[i * self.memory + j]
    }

    fn q_col(&self, j: usize) -> &[F] {
        &self.q[j * self.n..(j + 1) * self.n]
    }

    /// Drop all columns.
    pub fn reset(&mut self) {
        self.cols = 0;
    }

    /// Append a column to the window. The window must not be full.
    pub fn add_column(&mut self, v: &[F]) {
        debug_assert_eq!(v.len(), self.n);
        debug_assert!(self.cols < self.memory, "window full, remove a column first");
        let k = self.cols;
        self.work.copy_from_slice(v);
        // Modified Gram-Schmidt against the stored orthonormal columns.
        for j in 0..k {
            let mut rjk = F::zero();
            for i in 0..self.n {
                rjk = rjk + self.q[j * self.n + i] * self.work[i];
            }
            self.r[j * self.memory + k] = rjk;
            for i in 0..self.n {
                self.work[i] = self.work[i] - rjk * self.q[j * self.n + i];
            }
        }
        let rkk = linalg::norm(&self.work);
        self.r[k * self.memory + k] = rkk;
        let col = &mut self.q[k * self.n..(k + 1) * self.n];
        if rkk > F::zero() {
            for i in 0..self.n {
                col[i] = self.work[i] / rkk;
            }
        } else {
            // Exactly dependent column; keep Q well-defined. The zero
            // diagonal entry makes solve() report rank deficiency.
            for c in col.iter_mut() {
                *c = F::zero();
            }
        }
        self.cols = k + 1;
    }

    /// Remove the oldest column from the window.
    ///
    /// Deletes the first column of `R` (shifting the rest left), which
    /// leaves an upper-Hessenberg factor, then chases the subdiagonal away
    /// with Givens rotations applied to the rows of `R` and the columns of
    /// `Q`, restoring a valid thin QR of the remaining window.
    pub fn remove_column(&mut self) {
        debug_assert!(self.cols > 0);
        let k = self.cols;
        // Shift R one column to the left.
        for i in 0..k {
            for j in 0..k - 1 {
                self.r[i * self.memory + j] = self.r[i * self.memory + j + 1];
            }
            self.r[i * self.memory + k - 1] = F::zero();
        }
        // Re-triangularize: zero R[i+1, i] with a rotation of rows i, i+1.
        for i in 0..k - 1 {
            let a = self.r[i * self.memory + i];
            let b = self.r[(i + 1) * self.memory + i];
            let (c, s) = givens(a, b);
            for j in i..k - 1 {
                let ri = self.r[i * self.memory + j];
                let rn = self.r[(i + 1) * self.memory + j];
                self.r[i * self.memory + j] = c * ri + s * rn;
                self.r[(i + 1) * self.memory + j] = -s * ri + c * rn;
            }
            for row in 0..self.n {
                let qi = self.q[i * self.n + row];
                let qn = self.q[(i + 1) * self.n + row];
                self.q[i * self.n + row] = c * qi + s * qn;
                self.q[(i + 1) * self.n + row] = -s * qi + c * qn;
            }
        }
        self.cols = k - 1;
    }

    /// Solve the least-squares problem `min ‖window · coef − b‖₂` through
    /// the factorization: `coef = R⁻¹ Qᵀ b`.
    ///
    /// Returns `false` without touching `coef` beyond scratch use if any
    /// diagonal entry of `R` has magnitude below `min_diag` (the system is
    /// rank-deficient to working precision).
    pub fn solve(&self, b: &[F], coef: &mut [F], min_diag: F) -> bool {
        debug_assert_eq!(b.len(), self.n);
        debug_assert!(coef.len() >= self.cols);
        let k = self.cols;
        for i in 0..k {
            if self.r[i * self.memory + i].abs() < min_diag {
                return false;
            }
        }
        // coef ← Qᵀ b
        for j in 0..k {
            coef[j] = linalg::dot(self.q_col(j), b);
        }
        // Back substitution.
        for i in (0..k).rev() {
            let mut s = coef[i];
            for j in i + 1..k {
                s = s - self.r[i * self.memory + j] * coef[j];
            }
            coef[i] = s / self.r[i * self.memory + i];
        }
        true
    }
}

/// Givens rotation `(c, s)` with `c·a + s·b = r ≥ 0`, `-s·a + c·b = 0`.
fn givens<F: Float>(a: F, b: F) -> (F, F) {
    let r = a.hypot(b);
    if r == F::zero() {
        (F::one(), F::zero())
    } else {
        (a / r, b / r)
    }
}
