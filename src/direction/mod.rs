//! Pluggable acceleration strategies for the inner solver.
//!
//! The forward-backward iteration is a fixed-point map; a direction
//! provider watches its iterates and proposes a correction step `q` meant
//! to reach the fixed point faster. One provider is active per solver. A
//! provider is free to decline — on any "not applicable" outcome the
//! solver falls back to the plain forward-backward step for that
//! iteration, so acceleration can never abort a solve.

mod anderson;
mod lbfgs;
mod noop;

pub use anderson::{AndersonAccel, AndersonDirection, AndersonParams};
pub use lbfgs::{CbfgsParams, Lbfgs, LbfgsDirection, LbfgsParams};
pub use noop::NoDirection;

use crate::float::Float;

/// Acceleration strategy consulted by the inner solver.
///
/// All slice arguments have the problem dimension `n`, except `y` and
/// `sigma` which have the constraint dimension and are provided for
/// providers that precondition on the outer-loop state (the built-in
/// providers ignore them).
pub trait Direction<F: Float> {
    /// Called once per solve, after the first forward-backward step.
    /// Providers (re)allocate their bounded history here.
    #[allow(clippy::too_many_arguments)]
    fn initialize(&mut self, y: &[F], sigma: &[F], gamma: F, x: &[F], x_hat: &[F], p: &[F], grad: &[F]);

    /// Offer the transition from the accepted iterate `x` to `x_next`.
    /// Returns `false` if the pair was rejected by a safeguard (and hence
    /// not stored).
    #[allow(clippy::too_many_arguments)]
    fn update(
        &mut self,
        gamma: F,
        gamma_next: F,
        x: &[F],
        x_next: &[F],
        p: &[F],
        p_next: &[F],
        grad: &[F],
        grad_next: &[F],
    ) -> bool;

    /// Propose a correction step `q` at the current iterate. Returns
    /// `false` if no usable direction is available; `q` is then ignored.
    fn apply(&mut self, gamma: F, x: &[F], x_hat: &[F], p: &[F], grad: &[F], q: &mut [F]) -> bool;

    /// The step size changed; scale-dependent state must be rescaled or
    /// invalidated.
    fn changed_gamma(&mut self, gamma_new: F, gamma_old: F);

    /// Throw away all history.
    fn reset(&mut self);

    /// Short name for diagnostics.
    fn name(&self) -> &'static str;
}
