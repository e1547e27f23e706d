//! Proximal operators for the nonsmooth terms handled by the solvers.
//!
//! A [`Proximable`] function knows how to evaluate its own proximal mapping
//! `prox_{γh}(v) = argmin_z h(z) + ‖z - v‖²/(2γ)` exactly. The solvers only
//! ever touch the nonsmooth term through this interface (or through the
//! fused step on [`Problem`](crate::problem::Problem)).

mod l1;
mod nuclear;

pub use l1::{L1Norm, L1NormWeighted};
pub use nuclear::NuclearNorm;

use crate::bounds::Bounds;
use crate::float::Float;

/// A function with an exactly computable proximal mapping.
pub trait Proximable<F: Float> {
    /// Compute `out = prox_{γ·self}(input)` and return the function value at
    /// `out`.
    ///
    /// `step` is the proximal step size γ > 0. `input` and `out` must have
    /// the function's dimension.
    fn prox(&mut self, input: &[F], out: &mut [F], step: F) -> F;
}

/// Generalized forward-backward step through an arbitrary proximal operator.
///
/// Computes `out = prox_{γh}(input + fwd_scale · fwd_step)` and the
/// forward-backward step `fb_step = out - input`, returning `h(out)`.
/// With `fwd_step = ∇ψ(input)` and `fwd_scale = -γ` this is one proximal
/// gradient step, and `fb_step` is the fixed-point residual used by the
/// solvers.
pub fn prox_step<F: Float, H: Proximable<F> + ?Sized>(
    h: &mut H,
    input: &[F],
    fwd_step: &[F],
    out: &mut [F],
    fb_step: &mut [F],
    step: F,
    fwd_scale: F,
) -> F {
    debug_assert_eq!(input.len(), fwd_step.len());
    debug_assert_eq!(input.len(), out.len());
    debug_assert_eq!(input.len(), fb_step.len());
    for i in 0..input.len() {
        fb_step[i] = input[i] + fwd_scale * fwd_step[i];
    }
    let value = h.prox(fb_step, out, step);
    for i in 0..input.len() {
        fb_step[i] = out[i] - input[i];
    }
    value
}

/// The indicator of a box is proximable: its prox is the projection.
impl<F: Float> Proximable<F> for Bounds<F> {
    fn prox(&mut self, input: &[F], out: &mut [F], _step: F) -> F {
        self.project(input, out);
        F::zero()
    }
}

/// Fused proximal gradient step for `h(x) = λ‖x‖₁ + δ_C(x)` with a box `C`
/// and a scalar weight `λ ≥ 0`.
///
/// Closed form combining soft-thresholding with the box clamp; returns
/// `λ‖x̂‖₁`.
pub fn box_l1_step<F: Float>(
    c: &Bounds<F>,
    lambda: F,
    gamma: F,
    x: &[F],
    grad: &[F],
    x_hat: &mut [F],
    p: &mut [F],
) -> F {
    let (lb, ub) = (c.lowerbound(), c.upperbound());
    let mut h_val = F::zero();
    for i in 0..x.len() {
        // p = -max(x - ub, min(x - lb, min(γ(∇ψ + λ), max(γ(∇ψ - λ), x))))
        let step = x[i]
            .max(gamma * (grad[i] - lambda))
            .min(gamma * (grad[i] + lambda))
            .min(x[i] - lb[i])
            .max(x[i] - ub[i]);
        p[i] = -step;
        x_hat[i] = x[i] + p[i];
        h_val = h_val + x_hat[i].abs();
    }
    lambda * h_val
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn box_prox_is_projection() {
        let mut b = Bounds::new(vec![-1.0_f64, 0.0], vec![1.0, 2.0]).unwrap();
        let mut out = [0.0; 2];
        let v = b.prox(&[3.0, -1.0], &mut out, 0.7);
        assert_eq!(v, 0.0);
        assert_eq!(out, [1.0, 0.0]);
    }

    #[test]
    fn prox_step_computes_residual() {
        let mut b = Bounds::new(vec![-1.0_f64], vec![1.0]).unwrap();
        let x = [0.5];
        let grad = [2.0];
        let mut out = [0.0];
        let mut fb = [0.0];
        // gamma = 0.5: forward point 0.5 - 1.0 = -0.5, inside the box.
        prox_step(&mut b, &x, &grad, &mut out, &mut fb, 0.5, -0.5);
        assert_relative_eq!(out[0], -0.5);
        assert_relative_eq!(fb[0], -1.0);
    }

    #[test]
    fn box_l1_step_matches_split_computation() {
        let c = Bounds::new(vec![-10.0_f64; 3], vec![10.0; 3]).unwrap();
        let lambda = 0.3;
        let gamma = 0.2;
        let x = [1.0, -0.04, 0.5];
        let grad = [0.5, 0.0, -1.0];
        let (mut x_hat, mut p) = ([0.0; 3], [0.0; 3]);
        let h = box_l1_step(&c, lambda, gamma, &x, &grad, &mut x_hat, &mut p);

        // Reference: soft-threshold the forward point, then clamp.
        let mut expected_h = 0.0;
        for i in 0..3 {
            let fwd = x[i] - gamma * grad[i];
            let t = lambda * gamma;
            let soft = 0.0_f64.max(fwd - t).min(fwd + t);
            let clamped = soft.clamp(-10.0, 10.0);
            assert_relative_eq!(x_hat[i], clamped, epsilon = 1e-14);
            assert_relative_eq!(p[i], clamped - x[i], epsilon = 1e-14);
            expected_h += lambda * clamped.abs();
        }
        assert_relative_eq!(h, expected_h, epsilon = 1e-14);
    }

    #[test]
    fn box_l1_step_respects_bounds() {
        let c = Bounds::new(vec![0.1_f64], vec![0.2]).unwrap();
        let x = [0.15];
        let grad = [-100.0];
        let (mut x_hat, mut p) = ([0.0], [0.0]);
        box_l1_step(&c, 0.5, 1.0, &x, &grad, &mut x_hat, &mut p);
        assert_relative_eq!(x_hat[0], 0.2);
    }
}
