//! Termination statuses, stopping criteria, and external cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Why a solver stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SolverStatus {
    /// The solver is still running (only ever visible through progress
    /// callbacks).
    Busy,
    /// Converged and reached the requested tolerance.
    Converged,
    /// Maximum allowed execution time exceeded.
    MaxTime,
    /// Maximum number of iterations exceeded.
    MaxIter,
    /// Intermediate results were infinite or not-a-number.
    NotFinite,
    /// No progress was made over several consecutive iterations.
    NoProgress,
    /// The solver was interrupted from outside.
    Interrupted,
}

impl SolverStatus {
    /// `true` only for [`SolverStatus::Converged`].
    pub fn is_converged(self) -> bool {
        self == SolverStatus::Converged
    }
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverStatus::Busy => write!(f, "busy"),
            SolverStatus::Converged => write!(f, "converged"),
            SolverStatus::MaxTime => write!(f, "maximum time exceeded"),
            SolverStatus::MaxIter => write!(f, "maximum iterations exceeded"),
            SolverStatus::NotFinite => write!(f, "non-finite intermediate result"),
            SolverStatus::NoProgress => write!(f, "no progress"),
            SolverStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Which measure of approximate stationarity the inner solver compares
/// against its tolerance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopCrit {
    /// ∞-norm of the approximate KKT residual at the proximal point,
    /// `‖(x - x̂)/γ - ∇ψ(x) + ∇ψ(x̂)‖∞`.
    #[default]
    ApproxKkt,
    /// Norm of the projected/proximal gradient step, `‖x̂ - x‖`.
    ProjGradNorm,
    /// Norm of the step recomputed with unit step size.
    ProjGradUnitNorm,
    /// Fixed-point residual norm `‖x̂ - x‖/γ`; invariant under γ rescaling.
    FprNorm,
}

/// Cloneable cancellation handle shared between a solver and its
/// supervisors.
///
/// `stop` may be called from another thread or from a signal handler; the
/// solvers poll the flag once per (inner and outer) iteration and wind
/// down at the next checkpoint with [`SolverStatus::Interrupted`].
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    /// Create a fresh, unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination at the next safe checkpoint.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether termination has been requested.
    pub fn stop_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Clear the flag so the owning solver can be reused.
    pub(crate) fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_is_shared_between_clones() {
        let a = StopSignal::new();
        let b = a.clone();
        assert!(!a.stop_requested());
        b.stop();
        assert!(a.stop_requested());
        a.clear();
        assert!(!b.stop_requested());
    }

    #[test]
    fn status_display_is_informative() {
        assert_eq!(SolverStatus::Converged.to_string(), "converged");
        assert_eq!(SolverStatus::Interrupted.to_string(), "interrupted");
        assert!(SolverStatus::Converged.is_converged());
        assert!(!SolverStatus::MaxIter.is_converged());
    }
}
