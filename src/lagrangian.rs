//! Augmented-Lagrangian evaluations shared by the inner and outer solvers.
//!
//! For multiplier estimate `y` and penalty weights `Σ`, the inner solver
//! minimizes the smooth function
//!
//! ```text
//! ψ(x) = f(x) + ½ dᵀ Σ d,    ζ = g(x) + Σ⁻¹ y,   d = ζ − Π_D(ζ),
//! ```
//!
//! whose gradient is `∇ψ(x) = ∇f(x) + ∇g(x)ᵀ ŷ` with the candidate
//! multipliers `ŷ = Σ ⊙ d`. At an inner solution, `ŷ` is exactly the ALM
//! multiplier update `y + Σ ⊙ (g(x) − Π_D(ζ))`, and the update error
//! `e = Π_D(ζ) − g(x) = (y − ŷ) ⊘ Σ` measures both constraint violation
//! and multiplier change.

use crate::float::Float;
use crate::problem::Problem;

/// Evaluate `ψ(x)`, writing the candidate multipliers `ŷ` and using
/// `work_g` for the constraint values. For `m = 0` this is just `f(x)`.
pub fn eval_psi_yhat<F: Float, P: Problem<F> + ?Sized>(
    problem: &P,
    x: &[F],
    y: &[F],
    sigma: &[F],
    y_hat: &mut [F],
    work_g: &mut [F],
) -> F {
    let f = problem.cost(x);
    let m = problem.m();
    if m == 0 {
        return f;
    }
    problem.constraints(x, work_g);
    let d_box = problem.box_d();
    let mut penalty = F::zero();
    for i in 0..m {
        let zeta = work_g[i] + y[i] / sigma[i];
        let d = zeta - d_box.clamp_component(i, zeta);
        y_hat[i] = sigma[i] * d;
        penalty = penalty + sigma[i] * d * d;
    }
    f + penalty / (F::one() + F::one())
}

/// Evaluate `∇ψ(x) = ∇f(x) + ∇g(x)ᵀ ŷ` given the candidate multipliers
/// from [`eval_psi_yhat`]: the Lagrangian gradient taken at `ŷ`.
/// `work_n` holds the Jacobian product.
pub fn eval_grad_psi_from_yhat<F: Float, P: Problem<F> + ?Sized>(
    problem: &P,
    x: &[F],
    y_hat: &[F],
    grad: &mut [F],
    work_n: &mut [F],
) {
    problem.grad_lagrangian(x, y_hat, grad, work_n);
}

/// The multiplier-update error `e = (y − ŷ) ⊘ Σ`, written to `err`.
pub fn eval_update_error<F: Float>(y: &[F], y_hat: &[F], sigma: &[F], err: &mut [F]) {
    for i in 0..y.len() {
        err[i] = (y[i] - y_hat[i]) / sigma[i];
    }
}
