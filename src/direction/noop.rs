//! The trivial direction provider.

use crate::direction::Direction;
use crate::float::Float;

/// A direction provider that never proposes anything, yielding the plain
/// forward-backward method. Useful as a baseline and for debugging
/// acceleration-related issues.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDirection;

impl<F: Float> Direction<F> for NoDirection {
    fn initialize(
        &mut self,
        _y: &[F],
        _sigma: &[F],
        _gamma: F,
        _x: &[F],
        _x_hat: &[F],
        _p: &[F],
        _grad: &[F],
    ) {
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
        true
    }

    fn apply(
        &mut self,
        _gamma: F,
        _x: &[F],
        _x_hat: &[F],
        _p: &[F],
        _grad: &[F],
        _q: &mut [F],
    ) -> bool {
        false
    }

    fn changed_gamma(&mut self, _gamma_new: F, _gamma_old: F) {}

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "noop"
    }
}
