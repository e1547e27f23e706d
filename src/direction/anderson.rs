//! Anderson acceleration of the forward-backward fixed-point iteration.

use crate::direction::Direction;
use crate::error::SolverError;
use crate::float::Float;
use crate::linalg;
use crate::qr::LimitedMemoryQr;

/// Parameters for the Anderson accelerator.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AndersonParams<F> {
    /// Length of the residual window.
    pub memory: usize,
    /// Minimum acceptable magnitude of the R diagonal in the least-squares
    /// solve; smaller pivots mean the window is rank deficient and the
    /// extrapolation is skipped.
    pub min_div_fac: F,
}

impl Default for AndersonParams<f64> {
    fn default() -> Self {
        AndersonParams {
            memory: 10,
            min_div_fac: 1e2 * f64::EPSILON,
        }
    }
}

impl Default for AndersonParams<f32> {
    fn default() -> Self {
        AndersonParams {
            memory: 10,
            min_div_fac: 1e2 * f32::EPSILON,
        }
    }
}

impl<F: Float> AndersonParams<F> {
    pub(crate) fn validate(&self) -> Result<(), SolverError> {
        if self.memory == 0 {
            return Err(SolverError::InvalidParameter {
                name: "anderson.memory",
                message: "must be at least 1",
            });
        }
        if self.min_div_fac <= F::zero() {
            return Err(SolverError::InvalidParameter {
                name: "anderson.min_div_fac",
                message: "must be positive",
            });
        }
        Ok(())
    }
}

/// Anderson acceleration over a fixed-point map `g` with residual
/// `r(x) = g(x) - x`.
///
/// Keeps a sliding window of residual differences with an incrementally
/// updated QR factorization, and a matching ring buffer of past `g`
/// values. Each [`AndersonAccel::compute`] call solves
/// `γ = argmin ‖ΔR γ - rₖ‖₂` through the factorization and forms the
/// extrapolated iterate `Σ αᵢ gᵢ` with `α` the successive differences
/// of `γ`.
#[derive(Clone, Debug)]
pub struct AndersonAccel<F> {
    params: AndersonParams<F>,
    qr: LimitedMemoryQr<F>,
    /// Ring buffer of past g values, column-major `n × memory`.
    g: Vec<F>,
    /// Residual at the previous compute/initialize call.
    r_old: Vec<F>,
    /// Least-squares coefficients (scratch, length `memory`).
    gamma_ls: Vec<F>,
    /// Residual difference (scratch, length `n`).
    dr: Vec<F>,
    /// Index of the oldest g column in the ring.
    ring_start: usize,
    /// Number of stored g columns.
    ring_len: usize,
    n: usize,
}

impl<F: Float> AndersonAccel<F> {
    /// Create an accelerator with empty storage; call
    /// [`AndersonAccel::resize`] before use.
    pub fn new(params: AndersonParams<F>) -> Result<Self, SolverError> {
        params.validate()?;
        Ok(AndersonAccel {
            params,
            qr: LimitedMemoryQr::new(0, 0),
            g: Vec::new(),
            r_old: Vec::new(),
            gamma_ls: Vec::new(),
            dr: Vec::new(),
            ring_start: 0,
            ring_len: 0,
            n: 0,
        })
    }

    /// Allocate storage for dimension `n` and clear the window.
    pub fn resize(&mut self, n: usize) {
        let m = self.params.memory;
        self.qr = LimitedMemoryQr::new(n, m);
        self.g.resize(n * m, F::zero());
        self.r_old.resize(n, F::zero());
        self.gamma_ls.resize(m, F::zero());
        self.dr.resize(n, F::zero());
        self.n = n;
        self.reset();
    }

    /// Forget the stored window.
    pub fn reset(&mut self) {
        self.qr.reset();
        self.ring_start = 0;
        self.ring_len = 0;
    }

    /// Number of residual differences currently stored.
    pub fn history(&self) -> usize {
        self.qr.num_cols()
    }

    /// Start a new acceleration sequence from the fixed-point value `g0`
    /// and residual `r0`.
    pub fn initialize(&mut self, g0: &[F], r0: &[F]) {
        debug_assert_eq!(g0.len(), self.n);
        self.reset();
        self.g[..self.n].copy_from_slice(g0);
        self.ring_len = 1;
        self.r_old.copy_from_slice(r0);
    }

    /// Feed the current fixed-point value `g` and residual `r`, and write
    /// the extrapolated iterate to `x_out`.
    ///
    /// The window always advances; the return value is `false` when the
    /// least-squares system was rank deficient and `x_out` was left
    /// untouched (the caller should take the plain fixed-point step).
    pub fn compute(&mut self, g: &[F], r: &[F], x_out: &mut [F]) -> bool {
        debug_assert_eq!(g.len(), self.n);
        debug_assert!(self.ring_len > 0, "initialize must be called first");
        let m = self.params.memory;

        for i in 0..self.n {
            self.dr[i] = r[i] - self.r_old[i];
        }
        self.r_old.copy_from_slice(r);
        if self.qr.num_cols() == m {
            self.qr.remove_column();
        }
        self.qr.add_column(&self.dr);

        let k = self.qr.num_cols();
        let solved = self
            .qr
            .solve(r, &mut self.gamma_ls, self.params.min_div_fac);
        let ok = solved && self.gamma_ls[..k].iter().all(|c| c.is_finite());
        if ok {
            // α₀ = γ₀, αᵢ = γᵢ - γᵢ₋₁, α_k = 1 - γ_{k-1};
            // x = Σᵢ αᵢ gᵢ over the window (oldest first), g current last.
            for i in 0..self.n {
                x_out[i] = F::zero();
            }
            let mut prev = F::zero();
            for j in 0..k {
                let alpha = self.gamma_ls[j] - prev;
                prev = self.gamma_ls[j];
                let col = (self.ring_start + j) % m;
                for i in 0..self.n {
                    x_out[i] = x_out[i] + alpha * self.g[col * self.n + i];
                }
            }
            let alpha_last = F::one() - prev;
            for i in 0..self.n {
                x_out[i] = x_out[i] + alpha_last * g[i];
            }
        }

        // Store g in the ring, evicting the oldest column when full.
        if self.ring_len == m {
            let col = self.ring_start;
            self.g[col * self.n..(col + 1) * self.n].copy_from_slice(g);
            self.ring_start = (self.ring_start + 1) % m;
        } else {
            let col = (self.ring_start + self.ring_len) % m;
            self.g[col * self.n..(col + 1) * self.n].copy_from_slice(g);
            self.ring_len += 1;
        }
        ok
    }
}

/// Anderson acceleration as an inner-solver direction provider.
///
/// The fixed-point map is the forward-backward operator, so `g = x̂` and
/// `r = p`; the proposed correction is `q = x_aa - x`, making a full
/// accelerated step land on the extrapolated iterate.
#[derive(Clone, Debug)]
pub struct AndersonDirection<F> {
    accel: AndersonAccel<F>,
    x_aa: Vec<F>,
    ready: bool,
}

impl<F: Float> AndersonDirection<F> {
    /// Create a direction provider with the given accelerator parameters.
    pub fn new(params: AndersonParams<F>) -> Result<Self, SolverError> {
        Ok(AndersonDirection {
            accel: AndersonAccel::new(params)?,
            x_aa: Vec::new(),
            ready: false,
        })
    }
}

impl<F: Float> Direction<F> for AndersonDirection<F> {
    fn initialize(
        &mut self,
        _y: &[F],
        _sigma: &[F],
        _gamma: F,
        x: &[F],
        x_hat: &[F],
        p: &[F],
        _grad: &[F],
    ) {
        self.accel.resize(x.len());
        self.x_aa.resize(x.len(), F::zero());
        self.accel.initialize(x_hat, p);
        self.ready = true;
    }

    fn update(
        &mut self,
        _gamma: F,
        _gamma_next: F,
        _x: &[F],
        _x_next: &[F],
        _p: &[F],
        _p_next: &[F],
        _grad: &[F],
        _grad_next: &[F],
    ) -> bool {
        // The window is maintained inside apply; nothing to store here.
        true
    }

    fn apply(&mut self, _gamma: F, x: &[F], x_hat: &[F], p: &[F], _grad: &[F], q: &mut [F]) -> bool {
        if !self.ready {
            self.accel.initialize(x_hat, p);
            self.ready = true;
            return false;
        }
        if !self.accel.compute(x_hat, p, &mut self.x_aa) {
            return false;
        }
        for i in 0..x.len() {
            q[i] = self.x_aa[i] - x[i];
        }
        linalg::all_finite(q)
    }

    fn changed_gamma(&mut self, _gamma_new: F, _gamma_old: F) {
        // The residual window is scale dependent; start over.
        self.accel.reset();
        self.ready = false;
    }

    fn reset(&mut self) {
        self.accel.reset();
        self.ready = false;
    }

    fn name(&self) -> &'static str {
        "anderson"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 2×2 affine fixed-point problem g(x) = A x - b with solution (1, 1).
    fn g(x: &[f64]) -> [f64; 2] {
        [
            20.0 * x[0] - 10.0 * x[1] - 9.0,
            -10.0 * x[0] + 30.0 * x[1] - 19.0,
        ]
    }

    fn r(x: &[f64]) -> [f64; 2] {
        let gx = g(x);
        [gx[0] - x[0], gx[1] - x[1]]
    }

    #[test]
    fn solves_affine_fixed_point_exactly() {
        // The plain iteration diverges (the map is expansive), but with a
        // window of two residuals the extrapolation solves the underlying
        // linear system.
        let mut aa = AndersonAccel::new(AndersonParams {
            memory: 2,
            ..AndersonParams::default()
        })
        .unwrap();
        aa.resize(2);

        let mut x = [-9.0, -19.0];
        aa.initialize(&g(&x), &r(&x));
        x = g(&x);
        for _ in 1..5 {
            let mut x_next = [0.0; 2];
            assert!(aa.compute(&g(&x), &r(&x), &mut x_next));
            x = x_next;
        }
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn window_is_bounded() {
        let mut aa = AndersonAccel::new(AndersonParams {
            memory: 3,
            ..AndersonParams::default()
        })
        .unwrap();
        aa.resize(2);
        let mut x = [5.0, -3.0];
        aa.initialize(&g(&x), &r(&x));
        x = g(&x);
        for _ in 0..10 {
            let mut x_next = [0.0; 2];
            aa.compute(&g(&x), &r(&x), &mut x_next);
            x = x_next;
            assert!(aa.history() <= 3);
        }
    }

    #[test]
    fn stationary_window_reports_rank_deficiency() {
        let mut aa = AndersonAccel::new(AndersonParams::<f64>::default()).unwrap();
        aa.resize(2);
        let g0 = [1.0, 2.0];
        let r0 = [0.5, 0.5];
        aa.initialize(&g0, &r0);
        // Identical residual: Δr = 0, the window has no usable column.
        let mut out = [0.0; 2];
        assert!(!aa.compute(&g0, &r0, &mut out));
    }

    #[test]
    fn direction_declines_first_call_after_reset() {
        let mut d = AndersonDirection::<f64>::new(AndersonParams::default()).unwrap();
        let x = [0.0, 0.0];
        let x_hat = [1.0, 1.0];
        let p = [1.0, 1.0];
        d.initialize(&[], &[], 0.5, &x, &x_hat, &p, &p);
        d.changed_gamma(0.25, 0.5);
        let mut q = [0.0; 2];
        // After the flush the provider re-seeds and declines once.
        assert!(!d.apply(0.25, &x, &x_hat, &p, &p, &mut q));
    }
}
