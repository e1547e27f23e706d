//! Initial Lipschitz-constant estimation for the smooth cost term.
//!
//! The inner solver needs a bound `L` on the local smoothness of ψ to pick
//! a safe step size `γ = α/L`. When the caller has no estimate, a single
//! finite-difference probe of the gradient provides one; the backtracking
//! safeguard in the solver corrects it whenever the quadratic upper bound
//! is violated, so the probe only has to be in the right ballpark.

use crate::error::SolverError;
use crate::float::Float;

/// Parameters for the estimation of the Lipschitz constant of ∇ψ and the
/// derivation of the forward-backward step size γ.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LipschitzParams<F> {
    /// Initial estimate of the Lipschitz constant of ∇ψ. If zero, it is
    /// approximated by a finite-difference probe at the starting point.
    pub l_0: F,
    /// Relative step size for the finite-difference probe.
    pub epsilon: F,
    /// Minimum step size for the finite-difference probe.
    pub delta: F,
    /// Factor α relating the step size and the Lipschitz constant,
    /// `γ = α / L` with `0 < α < 1`.
    pub l_gamma_factor: F,
}

impl Default for LipschitzParams<f64> {
    fn default() -> Self {
        LipschitzParams {
            l_0: 0.0,
            epsilon: 1e-6,
            delta: 1e-12,
            l_gamma_factor: 0.95,
        }
    }
}

impl Default for LipschitzParams<f32> {
    fn default() -> Self {
        LipschitzParams {
            l_0: 0.0,
            epsilon: 1e-4,
            delta: 1e-8,
            l_gamma_factor: 0.95,
        }
    }
}

impl<F: Float> LipschitzParams<F> {
    pub(crate) fn validate(&self) -> Result<(), SolverError> {
        if self.l_0 < F::zero() || !self.l_0.is_finite() {
            return Err(SolverError::InvalidParameter {
                name: "lipschitz.l_0",
                message: "must be finite and nonnegative",
            });
        }
        if self.epsilon <= F::zero() {
            return Err(SolverError::InvalidParameter {
                name: "lipschitz.epsilon",
                message: "must be positive",
            });
        }
        if self.delta <= F::zero() {
            return Err(SolverError::InvalidParameter {
                name: "lipschitz.delta",
                message: "must be positive",
            });
        }
        if self.l_gamma_factor <= F::zero() || self.l_gamma_factor >= F::one() {
            return Err(SolverError::InvalidParameter {
                name: "lipschitz.l_gamma_factor",
                message: "must lie strictly between 0 and 1",
            });
        }
        Ok(())
    }
}

/// Build the probe point `x + h` with `hᵢ = max(ε |xᵢ|, δ) sign(xᵢ)` (sign
/// taken as +1 at zero), writing it to `out` and returning `‖h‖`.
pub fn probe_point<F: Float>(params: &LipschitzParams<F>, x: &[F], out: &mut [F]) -> F {
    debug_assert_eq!(x.len(), out.len());
    let mut norm_h_sq = F::zero();
    for i in 0..x.len() {
        let sign = if x[i] < F::zero() { -F::one() } else { F::one() };
        let h = (params.epsilon * x[i].abs()).max(params.delta) * sign;
        out[i] = x[i] + h;
        norm_h_sq = norm_h_sq + h * h;
    }
    norm_h_sq.sqrt()
}

/// Difference-quotient estimate `L = ‖∇ψ(x+h) − ∇ψ(x)‖ / ‖h‖`.
pub fn estimate<F: Float>(norm_h: F, grad_x: &[F], grad_probe: &[F]) -> F {
    debug_assert_eq!(grad_x.len(), grad_probe.len());
    let mut diff_sq = F::zero();
    for i in 0..grad_x.len() {
        let d = grad_probe[i] - grad_x[i];
        diff_sq = diff_sq + d * d;
    }
    diff_sq.sqrt() / norm_h
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn validation_rejects_bad_factor() {
        let mut p = LipschitzParams::<f64>::default();
        p.l_gamma_factor = 1.0;
        assert!(p.validate().is_err());
        p.l_gamma_factor = 0.95;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn quadratic_probe_recovers_curvature() {
        // ψ(x) = ½ a x², so ∇ψ is a·x and the difference quotient is exact.
        let a = 7.5;
        let params = LipschitzParams::<f64>::default();
        let x = [2.0, -1.0];
        let mut probe = [0.0; 2];
        let norm_h = probe_point(&params, &x, &mut probe);
        let grad_x = [a * x[0], a * x[1]];
        let grad_p = [a * probe[0], a * probe[1]];
        let l = estimate(norm_h, &grad_x, &grad_p);
        assert_relative_eq!(l, a, max_relative = 1e-9);
    }

    #[test]
    fn probe_moves_away_from_zero() {
        let params = LipschitzParams::<f64>::default();
        let x = [0.0];
        let mut probe = [0.0];
        let norm_h = probe_point(&params, &x, &mut probe);
        // The minimum step δ applies where the relative step vanishes.
        assert_relative_eq!(norm_h, params.delta);
        assert!(probe[0] > 0.0);
    }

    #[test]
    fn probe_norm_matches_offset() {
        let params = LipschitzParams::<f64>::default();
        let x = [1.0, -2.0, 0.5];
        let mut probe = [0.0; 3];
        let norm_h = probe_point(&params, &x, &mut probe);
        let h: Vec<f64> = probe.iter().zip(&x).map(|(p, x)| p - x).collect();
        assert_relative_eq!(norm_h, crate::linalg::norm(&h), epsilon = 1e-15);
    }
}
