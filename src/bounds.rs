//! Rectangular box sets and their projection primitives.

use crate::error::SolverError;
use crate::float::Float;

/// A rectangular box `{ v : lowerbound ≤ v ≤ upperbound }` (componentwise).
///
/// Used both for the decision-variable set `C` and for the constraint set
/// `D`. Components may be unbounded on either side (`-inf` / `+inf`).
/// The invariant `lowerbound[i] ≤ upperbound[i]` is checked at construction
/// and never silently repaired afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Bounds<F> {
    lowerbound: Vec<F>,
    upperbound: Vec<F>,
}

impl<F: Float> Bounds<F> {
    /// Create a box from lower and upper bound vectors.
    ///
    /// Fails if the lengths differ, any bound is NaN, or some component has
    /// `lowerbound[i] > upperbound[i]`.
    pub fn new(lowerbound: Vec<F>, upperbound: Vec<F>) -> Result<Self, SolverError> {
        if lowerbound.len() != upperbound.len() {
            return Err(SolverError::DimensionMismatch {
                name: "upperbound",
                expected: lowerbound.len(),
                actual: upperbound.len(),
            });
        }
        for i in 0..lowerbound.len() {
            let (lb, ub) = (lowerbound[i], upperbound[i]);
            if lb.is_nan() || ub.is_nan() || lb > ub {
                return Err(SolverError::InvalidParameter {
                    name: "bounds",
                    message: "requires lowerbound <= upperbound componentwise",
                });
            }
        }
        Ok(Bounds {
            lowerbound,
            upperbound,
        })
    }

    /// The unbounded box `(-inf, +inf)^n`.
    pub fn unbounded(n: usize) -> Self {
        Bounds {
            lowerbound: vec![F::neg_infinity(); n],
            upperbound: vec![F::infinity(); n],
        }
    }

    /// The singleton box `{0}^n` (equality constraints `g(x) = 0`).
    pub fn zero(n: usize) -> Self {
        Bounds {
            lowerbound: vec![F::zero(); n],
            upperbound: vec![F::zero(); n],
        }
    }

    /// Dimension of the box.
    pub fn len(&self) -> usize {
        self.lowerbound.len()
    }

    /// `true` iff the box is zero-dimensional.
    pub fn is_empty(&self) -> bool {
        self.lowerbound.is_empty()
    }

    /// Lower bound vector.
    pub fn lowerbound(&self) -> &[F] {
        &self.lowerbound
    }

    /// Upper bound vector.
    pub fn upperbound(&self) -> &[F] {
        &self.upperbound
    }

    /// Componentwise projection of a single value onto component `i`.
    #[inline]
    pub fn clamp_component(&self, i: usize, v: F) -> F {
        v.max(self.lowerbound[i]).min(self.upperbound[i])
    }

    /// Project `v` onto the box, writing the result to `out`.
    pub fn project(&self, v: &[F], out: &mut [F]) {
        debug_assert_eq!(v.len(), self.len());
        debug_assert_eq!(out.len(), self.len());
        for i in 0..v.len() {
            out[i] = self.clamp_component(i, v[i]);
        }
    }

    /// The projecting difference `v - Π(v)`, written to `out`.
    ///
    /// Zero exactly on the components where `v` already lies in the box;
    /// its norm is the distance of `v` from the box.
    pub fn projecting_difference(&self, v: &[F], out: &mut [F]) {
        debug_assert_eq!(v.len(), self.len());
        for i in 0..v.len() {
            out[i] = v[i] - self.clamp_component(i, v[i]);
        }
    }

    /// `true` iff `v` lies inside the box.
    pub fn contains(&self, v: &[F]) -> bool {
        v.iter()
            .enumerate()
            .all(|(i, &vi)| self.lowerbound[i] <= vi && vi <= self.upperbound[i])
    }

    /// Fused projected gradient step onto the box:
    ///
    /// `p = max(lb - x, min(-γ ∇ψ(x), ub - x))`, `x̂ = x + p`.
    ///
    /// Returns the indicator value at `x̂`, which is zero by construction.
    pub fn proj_grad_step(
        &self,
        gamma: F,
        x: &[F],
        grad: &[F],
        x_hat: &mut [F],
        p: &mut [F],
    ) -> F {
        debug_assert_eq!(x.len(), self.len());
        for i in 0..x.len() {
            let step = -gamma * grad[i];
            p[i] = step
                .max(self.lowerbound[i] - x[i])
                .min(self.upperbound[i] - x[i]);
            x_hat[i] = x[i] + p[i];
        }
        F::zero()
    }

    /// Project a multiplier estimate onto the dual box implied by this
    /// constraint set, clamping magnitudes to `max`.
    ///
    /// A component with no finite lower bound can only have its upper bound
    /// active, so its multiplier is clamped to `[0, max]`; one with no finite
    /// upper bound to `[-max, 0]`; a two-sided component to `[-max, max]`.
    pub fn proj_multipliers(&self, y: &mut [F], max: F) {
        debug_assert_eq!(y.len(), self.len());
        for i in 0..y.len() {
            let lo = if self.lowerbound[i] == F::neg_infinity() {
                F::zero()
            } else {
                -max
            };
            let hi = if self.upperbound[i] == F::infinity() {
                F::zero()
            } else {
                max
            };
            y[i] = y[i].max(lo).min(hi);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(n: usize) -> Bounds<f64> {
        Bounds::new(vec![-1.0; n], vec![1.0; n]).unwrap()
    }

    #[test]
    fn rejects_inverted_bounds() {
        let r = Bounds::new(vec![1.0_f64], vec![-1.0]);
        assert!(matches!(r, Err(SolverError::InvalidParameter { .. })));
    }

    #[test]
    fn rejects_nan_bounds() {
        let r = Bounds::new(vec![f64::NAN], vec![1.0]);
        assert!(r.is_err());
    }

    #[test]
    fn rejects_length_mismatch() {
        let r = Bounds::new(vec![0.0_f64; 2], vec![1.0; 3]);
        assert!(matches!(r, Err(SolverError::DimensionMismatch { .. })));
    }

    #[test]
    fn projection_clamps_and_fixes_interior_points() {
        let b = unit_box(3);
        let v = [-2.0, 0.25, 7.0];
        let mut out = [0.0; 3];
        b.project(&v, &mut out);
        assert_eq!(out, [-1.0, 0.25, 1.0]);
        assert!(b.contains(&out));

        // Interior points are fixed points of the projection.
        let v = [0.1, -0.9, 0.0];
        b.project(&v, &mut out);
        assert_eq!(out, v);
    }

    #[test]
    fn projecting_difference_vanishes_inside() {
        let b = unit_box(2);
        let mut d = [0.0; 2];
        b.projecting_difference(&[0.5, -3.0], &mut d);
        assert_eq!(d, [0.0, -2.0]);
    }

    #[test]
    fn proj_grad_step_stays_in_box() {
        let b = unit_box(2);
        let x = [0.9, -0.5];
        let grad = [-10.0, 1.0];
        let (mut x_hat, mut p) = ([0.0; 2], [0.0; 2]);
        b.proj_grad_step(0.5, &x, &grad, &mut x_hat, &mut p);
        // First component would step to 5.9, clamped to the bound.
        assert_eq!(x_hat, [1.0, -1.0]);
        assert_eq!(p, [0.1, -0.5]);
    }

    #[test]
    fn multiplier_projection_respects_one_sided_bounds() {
        let b = Bounds::new(vec![0.0, f64::NEG_INFINITY, -1.0], vec![f64::INFINITY, 0.0, 1.0])
            .unwrap();
        let mut y = [5.0, 5.0, 1e12];
        b.proj_multipliers(&mut y, 1e9);
        // No upper bound: multiplier can only be negative.
        assert_eq!(y[0], 0.0);
        // No lower bound: positive multipliers allowed.
        assert_eq!(y[1], 5.0);
        // Two-sided: clamped in magnitude.
        assert_eq!(y[2], 1e9);
    }
}
