//! Limited-memory BFGS acceleration.

use crate::direction::Direction;
use crate::error::SolverError;
use crate::float::Float;
use crate::linalg;

/// Parameters of the cautious BFGS update condition
/// `yᵀs / sᵀs ≥ ϵ ‖p‖^α`. Setting `epsilon = 0` disables it, leaving only
/// the plain positive-curvature check.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CbfgsParams<F> {
    /// Exponent α of the residual norm.
    pub alpha: F,
    /// Threshold factor ϵ; zero disables the cautious condition.
    pub epsilon: F,
}

impl Default for CbfgsParams<f64> {
    fn default() -> Self {
        CbfgsParams {
            alpha: 1.0,
            epsilon: 0.0,
        }
    }
}

impl Default for CbfgsParams<f32> {
    fn default() -> Self {
        CbfgsParams {
            alpha: 1.0,
            epsilon: 0.0,
        }
    }
}

/// Parameters for the L-BFGS accelerator.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LbfgsParams<F> {
    /// Number of (s, y) pairs kept in the history.
    pub memory: usize,
    /// Cautious update safeguard.
    pub cbfgs: CbfgsParams<F>,
    /// On a step-size change, rescale the stored `y` vectors by
    /// `γ_new/γ_old` instead of flushing the history.
    pub rescale_on_gamma_change: bool,
}

impl Default for LbfgsParams<f64> {
    fn default() -> Self {
        LbfgsParams {
            memory: 10,
            cbfgs: CbfgsParams::default(),
            rescale_on_gamma_change: false,
        }
    }
}

impl Default for LbfgsParams<f32> {
    fn default() -> Self {
        LbfgsParams {
            memory: 10,
            cbfgs: CbfgsParams::default(),
            rescale_on_gamma_change: false,
        }
    }
}

impl<F: Float> LbfgsParams<F> {
    pub(crate) fn validate(&self) -> Result<(), SolverError> {
        if self.memory == 0 {
            return Err(SolverError::InvalidParameter {
                name: "lbfgs.memory",
                message: "must be at least 1",
            });
        }
        if self.cbfgs.epsilon < F::zero() {
            return Err(SolverError::InvalidParameter {
                name: "lbfgs.cbfgs.epsilon",
                message: "must be nonnegative",
            });
        }
        Ok(())
    }
}

/// Limited-memory BFGS approximation of the inverse Hessian, stored as a
/// circular buffer of curvature pairs.
#[derive(Clone, Debug)]
pub struct Lbfgs<F> {
    params: LbfgsParams<F>,
    s: Vec<F>,
    y: Vec<F>,
    rho: Vec<F>,
    alpha: Vec<F>,
    idx: usize,
    full: bool,
    n: usize,
}

impl<F: Float> Lbfgs<F> {
    /// Create an accelerator with empty storage; call [`Lbfgs::resize`]
    /// before use.
    pub fn new(params: LbfgsParams<F>) -> Result<Self, SolverError> {
        params.validate()?;
        Ok(Lbfgs {
            params,
            s: Vec::new(),
            y: Vec::new(),
            rho: Vec::new(),
            alpha: Vec::new(),
            idx: 0,
            full: false,
            n: 0,
        })
    }

    /// Allocate storage for dimension `n` and clear the history.
    pub fn resize(&mut self, n: usize) {
        let m = self.params.memory;
        self.s.resize(n * m, F::zero());
        self.y.resize(n * m, F::zero());
        self.rho.resize(m, F::zero());
        self.alpha.resize(m, F::zero());
        self.n = n;
        self.reset();
    }

    /// Forget all stored pairs.
    pub fn reset(&mut self) {
        self.idx = 0;
        self.full = false;
    }

    /// Number of pairs currently stored.
    pub fn history(&self) -> usize {
        if self.full {
            self.params.memory
        } else {
            self.idx
        }
    }

    fn s_col(&self, i: usize) -> &[F] {
        &self.s[i * self.n..(i + 1) * self.n]
    }

    fn y_col(&self, i: usize) -> &[F] {
        &self.y[i * self.n..(i + 1) * self.n]
    }

    /// Check whether a candidate pair keeps the implicit inverse-Hessian
    /// approximation positive definite and well conditioned.
    fn update_valid(&self, sty: F, sts: F, ptp: F) -> bool {
        // Smallest value we are willing to divide by.
        let min_divisor = F::min_positive_value().sqrt();
        if !sty.is_finite() || sts < min_divisor || sty < min_divisor {
            return false;
        }
        // Cautious BFGS condition: yᵀs / sᵀs ≥ ϵ ‖p‖^α.
        let eps = self.params.cbfgs.epsilon;
        if eps > F::zero() {
            let alpha = self.params.cbfgs.alpha;
            if sty / sts < eps * ptp.powf(alpha / (F::one() + F::one())) {
                return false;
            }
        }
        true
    }

    /// Offer a new pair `s = x_next - x`, `y = p - p_next`. Returns whether
    /// the pair was stored.
    pub fn update(&mut self, x: &[F], x_next: &[F], p: &[F], p_next: &[F]) -> bool {
        debug_assert_eq!(x.len(), self.n);
        let mut sty = F::zero();
        let mut sts = F::zero();
        for i in 0..self.n {
            let si = x_next[i] - x[i];
            let yi = p[i] - p_next[i];
            sty = sty + si * yi;
            sts = sts + si * si;
        }
        let ptp = linalg::norm_sq(p_next);
        if !self.update_valid(sty, sts, ptp) {
            return false;
        }
        let k = self.idx;
        for i in 0..self.n {
            self.s[k * self.n + i] = x_next[i] - x[i];
            self.y[k * self.n + i] = p[i] - p_next[i];
        }
        self.rho[k] = F::one() / sty;
        self.idx = if k + 1 < self.params.memory { k + 1 } else { 0 };
        self.full |= self.idx == 0;
        true
    }

    /// Apply the inverse-Hessian approximation to `q` in place using the
    /// two-loop recursion, seeding the diagonal with `gamma`. A negative
    /// `gamma` requests the curvature-based seed `sᵀy/yᵀy` from the most
    /// recent pair. Returns `false` when the history is empty.
    pub fn apply(&mut self, q: &mut [F], gamma: F) -> bool {
        let hist = self.history();
        if hist == 0 {
            return false;
        }
        let m = self.params.memory;
        let newest = if self.idx > 0 { self.idx - 1 } else { m - 1 };
        let gamma = if gamma < F::zero() {
            let yty = linalg::norm_sq(self.y_col(newest));
            F::one() / (self.rho[newest] * yty)
        } else {
            gamma
        };

        // Newest to oldest.
        let mut i = newest;
        for _ in 0..hist {
            let a = self.rho[i] * linalg::dot(self.s_col(i), q);
            self.alpha[i] = a;
            for j in 0..self.n {
                q[j] = q[j] - a * self.y[i * self.n + j];
            }
            i = if i > 0 { i - 1 } else { m - 1 };
        }

        for qi in q.iter_mut() {
            *qi = *qi * gamma;
        }

        // Oldest to newest.
        let oldest = if self.full { self.idx } else { 0 };
        let mut i = oldest;
        for _ in 0..hist {
            let beta = self.rho[i] * linalg::dot(self.y_col(i), q);
            let a = self.alpha[i];
            for j in 0..self.n {
                q[j] = q[j] + (a - beta) * self.s[i * self.n + j];
            }
            i = if i + 1 < m { i + 1 } else { 0 };
        }
        true
    }

    /// Scale the stored `y` vectors (and the matching `ρ`) by `factor`.
    pub fn scale_y(&mut self, factor: F) {
        let hist = self.history();
        let oldest = if self.full { self.idx } else { 0 };
        let m = self.params.memory;
        let mut i = oldest;
        for _ in 0..hist {
            for j in 0..self.n {
                self.y[i * self.n + j] = self.y[i * self.n + j] * factor;
            }
            self.rho[i] = self.rho[i] / factor;
            i = if i + 1 < m { i + 1 } else { 0 };
        }
    }
}

/// L-BFGS as an inner-solver direction provider.
///
/// Feeds the accelerator with forward-backward residual pairs and proposes
/// `q = H·p`, so a full accelerated step replaces the fixed-point step with
/// a quasi-Newton step on the residual.
#[derive(Clone, Debug)]
pub struct LbfgsDirection<F> {
    lbfgs: Lbfgs<F>,
    rescale_on_gamma_change: bool,
}

impl<F: Float> LbfgsDirection<F> {
    /// Create a direction provider with the given accelerator parameters.
    pub fn new(params: LbfgsParams<F>) -> Result<Self, SolverError> {
        let rescale = params.rescale_on_gamma_change;
        Ok(LbfgsDirection {
            lbfgs: Lbfgs::new(params)?,
            rescale_on_gamma_change: rescale,
        })
    }
}

impl<F: Float> Direction<F> for LbfgsDirection<F> {
    fn initialize(
        &mut self,
        _y: &[F],
        _sigma: &[F],
        _gamma: F,
        x: &[F],
        _x_hat: &[F],
        _p: &[F],
        _grad: &[F],
    ) {
        self.lbfgs.resize(x.len());
    }

    fn update(
        &mut self,
        _gamma: F,
        _gamma_next: F,
        x: &[F],
        x_next: &[F],
        p: &[F],
        p_next: &[F],
        _grad: &[F],
        _grad_next: &[F],
    ) -> bool {
        self.lbfgs.update(x, x_next, p, p_next)
    }

    fn apply(&mut self, gamma: F, _x: &[F], _x_hat: &[F], p: &[F], _grad: &[F], q: &mut [F]) -> bool {
        q.copy_from_slice(p);
        self.lbfgs.apply(q, gamma) && linalg::all_finite(q)
    }

    fn changed_gamma(&mut self, gamma_new: F, gamma_old: F) {
        if self.rescale_on_gamma_change {
            self.lbfgs.scale_y(gamma_new / gamma_old);
        } else {
            self.lbfgs.reset();
        }
    }

    fn reset(&mut self) {
        self.lbfgs.reset();
    }

    fn name(&self) -> &'static str {
        "lbfgs"
    }
}
