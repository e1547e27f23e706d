//! Outer solver: safeguarded augmented Lagrangian method.
//!
//! Repeatedly drives the inner solver on the penalized subproblem, updates
//! the multiplier estimates from the inner solution, and grows the penalty
//! weights only on constraints whose violation stalled. The inner
//! tolerance starts loose and tightens geometrically, so early outer
//! iterations stay cheap while the final ones deliver the requested
//! accuracy.

use std::time::{Duration, Instant};

use log::debug;

use crate::direction::Direction;
use crate::error::SolverError;
use crate::float::Float;
use crate::guard::{identity_of, InUseGuard, Kind};
use crate::linalg;
use crate::panoc::{InnerSolveOptions, PanocSolver, PanocStats};
use crate::problem::Problem;
use crate::stop::SolverStatus;

/// Tuning parameters for the augmented Lagrangian solver.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlmParams<F> {
    /// Primal tolerance, used as the final stopping tolerance of the inner
    /// solver.
    pub tolerance: F,
    /// Dual tolerance on the constraint violation / multiplier-update
    /// error.
    pub dual_tolerance: F,
    /// Factor by which stalled penalty weights grow.
    pub penalty_update_factor: F,
    /// Initial penalty weight. Zero derives it from the constraint
    /// violation at the starting point via `initial_penalty_factor`.
    pub initial_penalty: F,
    /// Scale factor for the automatic initial penalty.
    pub initial_penalty_factor: F,
    /// Inner tolerance used on the first outer iteration.
    pub initial_tolerance: F,
    /// Geometric update factor for the inner tolerance.
    pub tolerance_update_factor: F,
    /// A constraint's violation must shrink below this fraction of the
    /// previous violation to be spared a penalty increase.
    pub rel_penalty_increase_threshold: F,
    /// Bound on the magnitude of the Lagrange multiplier estimates.
    pub max_multiplier: F,
    /// Upper bound on the penalty weights.
    pub max_penalty: F,
    /// Lower bound on the (automatic) initial penalty weights.
    pub min_penalty: F,
    /// Maximum number of outer iterations.
    pub max_iter: usize,
    /// Maximum total duration.
    pub max_time: Duration,
    /// Log a progress line every N outer iterations (0 disables).
    pub print_interval: usize,
    /// Number of significant digits in logged values.
    pub print_precision: usize,
    /// Share a single penalty factor across all constraints.
    pub single_penalty_factor: bool,
}

impl Default for AlmParams<f64> {
    fn default() -> Self {
        AlmParams {
            tolerance: 1e-5,
            dual_tolerance: 1e-5,
            penalty_update_factor: 10.0,
            initial_penalty: 1.0,
            initial_penalty_factor: 20.0,
            initial_tolerance: 1.0,
            tolerance_update_factor: 1e-1,
            rel_penalty_increase_threshold: 0.1,
            max_multiplier: 1e9,
            max_penalty: 1e9,
            min_penalty: 1e-9,
            max_iter: 100,
            max_time: Duration::from_secs(5 * 60),
            print_interval: 0,
            print_precision: 8,
            single_penalty_factor: false,
        }
    }
}

impl Default for AlmParams<f32> {
    fn default() -> Self {
        AlmParams {
            tolerance: 1e-4,
            dual_tolerance: 1e-4,
            penalty_update_factor: 10.0,
            initial_penalty: 1.0,
            initial_penalty_factor: 20.0,
            initial_tolerance: 1.0,
            tolerance_update_factor: 1e-1,
            rel_penalty_increase_threshold: 0.1,
            max_multiplier: 1e9,
            max_penalty: 1e9,
            min_penalty: 1e-6,
            max_iter: 100,
            max_time: Duration::from_secs(5 * 60),
            print_interval: 0,
            print_precision: 4,
            single_penalty_factor: false,
        }
    }
}

impl<F: Float> AlmParams<F> {
    pub(crate) fn validate(&self) -> Result<(), SolverError> {
        if self.tolerance <= F::zero() {
            return Err(SolverError::InvalidParameter {
                name: "tolerance",
                message: "must be positive",
            });
        }
        if self.dual_tolerance <= F::zero() {
            return Err(SolverError::InvalidParameter {
                name: "dual_tolerance",
                message: "must be positive",
            });
        }
        if self.penalty_update_factor <= F::one() {
            return Err(SolverError::InvalidParameter {
                name: "penalty_update_factor",
                message: "must be greater than 1",
            });
        }
        if self.initial_penalty < F::zero() {
            return Err(SolverError::InvalidParameter {
                name: "initial_penalty",
                message: "must be nonnegative (zero selects automatic initialization)",
            });
        }
        if self.initial_penalty_factor <= F::zero() {
            return Err(SolverError::InvalidParameter {
                name: "initial_penalty_factor",
                message: "must be positive",
            });
        }
        if self.initial_tolerance <= F::zero() {
            return Err(SolverError::InvalidParameter {
                name: "initial_tolerance",
                message: "must be positive",
            });
        }
        if self.tolerance_update_factor <= F::zero() || self.tolerance_update_factor >= F::one() {
            return Err(SolverError::InvalidParameter {
                name: "tolerance_update_factor",
                message: "must lie strictly between 0 and 1",
            });
        }
        if self.rel_penalty_increase_threshold <= F::zero()
            || self.rel_penalty_increase_threshold >= F::one()
        {
            return Err(SolverError::InvalidParameter {
                name: "rel_penalty_increase_threshold",
                message: "must lie strictly between 0 and 1",
            });
        }
        if self.max_multiplier <= F::zero() {
            return Err(SolverError::InvalidParameter {
                name: "max_multiplier",
                message: "must be positive",
            });
        }
        if self.min_penalty <= F::zero() || self.max_penalty < self.min_penalty {
            return Err(SolverError::InvalidParameter {
                name: "min_penalty",
                message: "requires 0 < min_penalty <= max_penalty",
            });
        }
        if self.max_iter == 0 {
            return Err(SolverError::InvalidParameter {
                name: "max_iter",
                message: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Inner-solver statistics accumulated over all outer iterations.
#[derive(Clone, Debug, Default)]
pub struct InnerStatsSum<F> {
    /// Total inner iterations.
    pub iterations: usize,
    /// Total step-size backtracks.
    pub stepsize_backtracks: usize,
    /// Total line-search fallbacks to the plain step.
    pub linesearch_failures: usize,
    /// Total line-search halvings.
    pub linesearch_backtracks: usize,
    /// Total not-applicable direction attempts.
    pub direction_failures: usize,
    /// Total rejected direction updates.
    pub direction_update_rejected: usize,
    /// Total time spent inside the inner solver.
    pub elapsed: Duration,
    /// Final step size of the last inner solve.
    pub final_gamma: F,
    /// Final smooth cost of the last inner solve.
    pub final_psi: F,
    /// Final nonsmooth cost of the last inner solve.
    pub final_h: F,
}

impl<F: Float> InnerStatsSum<F> {
    fn accumulate(&mut self, s: &PanocStats<F>) {
        self.iterations += s.iterations;
        self.stepsize_backtracks += s.stepsize_backtracks;
        self.linesearch_failures += s.linesearch_failures;
        self.linesearch_backtracks += s.linesearch_backtracks;
        self.direction_failures += s.direction_failures;
        self.direction_update_rejected += s.direction_update_rejected;
        self.elapsed += s.elapsed;
        self.final_gamma = s.final_gamma;
        self.final_psi = s.final_psi;
        self.final_h = s.final_h;
    }
}

/// Statistics of one outer solve.
#[derive(Clone, Debug)]
pub struct AlmStats<F> {
    /// Why the solve stopped.
    pub status: SolverStatus,
    /// Number of outer iterations (inner-solver invocations).
    pub outer_iterations: usize,
    /// Total wall-clock duration.
    pub elapsed: Duration,
    /// Number of inner solves that stopped without converging.
    pub inner_convergence_failures: usize,
    /// Final primal (stationarity) tolerance reached by the inner solver.
    pub eps: F,
    /// Final constraint violation / multiplier-update error (∞-norm).
    pub delta: F,
    /// 2-norm of the final penalty weights.
    pub norm_penalty: F,
    /// Accumulated inner-solver statistics.
    pub inner: InnerStatsSum<F>,
}

impl<F: Float> AlmStats<F> {
    fn new() -> Self {
        AlmStats {
            status: SolverStatus::Busy,
            outer_iterations: 0,
            elapsed: Duration::ZERO,
            inner_convergence_failures: 0,
            eps: F::infinity(),
            delta: F::infinity(),
            norm_penalty: F::zero(),
            inner: InnerStatsSum::default(),
        }
    }
}

/// Augmented Lagrangian solver wrapping an inner [`PanocSolver`].
pub struct AlmSolver<F: Float, D> {
    params: AlmParams<F>,
    /// The inner solver; public so callers can install a progress callback
    /// or tweak its parameters between solves.
    pub inner: PanocSolver<F, D>,
}

impl<F: Float, D: Direction<F>> AlmSolver<F, D> {
    /// Create a solver from validated parameters and an inner solver.
    pub fn new(params: AlmParams<F>, inner: PanocSolver<F, D>) -> Result<Self, SolverError> {
        params.validate()?;
        Ok(AlmSolver { params, inner })
    }

    /// The solver's parameters.
    pub fn params(&self) -> &AlmParams<F> {
        &self.params
    }

    /// Short diagnostic name, e.g. `"alm<panoc+lbfgs>"`.
    pub fn name(&self) -> String {
        format!("alm<{}>", self.inner.name())
    }

    /// Request termination at the next inner or outer checkpoint. Can be
    /// called from other threads or signal handlers.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Minimize `f` over `x ∈ C` subject to `g(x) ∈ D`, starting from the
    /// primal iterate in `x` and the multiplier estimate in `y` (both
    /// updated in place, also on non-converged exits).
    pub fn solve<P: Problem<F> + ?Sized>(
        &mut self,
        problem: &P,
        x: &mut [F],
        y: &mut [F],
    ) -> Result<AlmStats<F>, SolverError> {
        let n = problem.n();
        let m = problem.m();
        if x.len() != n {
            return Err(SolverError::DimensionMismatch {
                name: "x",
                expected: n,
                actual: x.len(),
            });
        }
        if y.len() != m {
            return Err(SolverError::DimensionMismatch {
                name: "y",
                expected: m,
                actual: y.len(),
            });
        }
        let _self_guard = InUseGuard::acquire(Kind::OuterSolver, identity_of(self))?;
        let _problem_guard = InUseGuard::acquire(Kind::Problem, identity_of(problem))?;

        // One clear per outer solve; a stop arriving anywhere inside the
        // loop (also between inner solves) then sticks until observed.
        let stop = self.inner.stop_signal();
        stop.clear();
        let start = Instant::now();
        let params = self.params.clone();
        let mut stats = AlmStats::new();

        // Unconstrained case: a single inner solve at the final tolerance.
        if m == 0 {
            let opts = InnerSolveOptions {
                tolerance: params.tolerance,
                max_time: Some(params.max_time),
                always_overwrite_results: true,
            };
            let istats = self
                .inner
                .solve_for_outer(problem, &opts, x, y, &[], &mut [])?;
            stats.status = istats.status;
            stats.outer_iterations = 1;
            stats.eps = istats.eps;
            stats.delta = F::zero();
            if !istats.status.is_converged() {
                stats.inner_convergence_failures = 1;
            }
            stats.inner.accumulate(&istats);
            stats.elapsed = start.elapsed();
            return Ok(stats);
        }

        let mut sigma = vec![F::zero(); m];
        initialize_penalty(problem, &params, x, &mut sigma);
        let mut err_z = vec![F::zero(); m];
        let mut eps = params.initial_tolerance.max(params.tolerance);
        let mut delta_old = F::infinity();

        let status = 'outer: loop {
            let k = stats.outer_iterations;
            if stop.stop_requested() {
                break 'outer SolverStatus::Interrupted;
            }
            if k >= params.max_iter {
                break 'outer SolverStatus::MaxIter;
            }
            let elapsed = start.elapsed();
            if elapsed >= params.max_time {
                break 'outer SolverStatus::MaxTime;
            }

            let opts = InnerSolveOptions {
                tolerance: eps,
                max_time: Some(params.max_time - elapsed),
                always_overwrite_results: true,
            };
            let istats = self
                .inner
                .solve_for_outer(problem, &opts, x, y, &sigma, &mut err_z)?;
            stats.outer_iterations += 1;
            stats.eps = istats.eps;
            stats.inner.accumulate(&istats);

            match istats.status {
                SolverStatus::Converged => {}
                SolverStatus::Interrupted => break 'outer SolverStatus::Interrupted,
                SolverStatus::NotFinite => break 'outer SolverStatus::NotFinite,
                _ => stats.inner_convergence_failures += 1,
            }

            let delta = linalg::norm_inf(&err_z);
            stats.delta = delta;

            // The inner solve already returned the updated multiplier
            // candidates in y; keep them inside the dual box.
            problem.proj_multipliers(y, params.max_multiplier);

            if params.print_interval != 0 && k % params.print_interval == 0 {
                debug!(
                    "alm {:>4}: ε = {:.prec$e}, δ = {:.prec$e}, ‖Σ‖ = {:.prec$e}, inner: {} its ({})",
                    k,
                    istats.eps,
                    delta,
                    linalg::norm(&sigma),
                    istats.iterations,
                    istats.status,
                    prec = params.print_precision,
                );
            }

            if istats.status.is_converged()
                && eps <= params.tolerance
                && delta <= params.dual_tolerance
            {
                break 'outer SolverStatus::Converged;
            }

            // Grow the penalty on constraints whose violation stalled.
            if k > 0 {
                update_penalty(&params, &mut sigma, &err_z, delta, delta_old);
            }
            delta_old = delta;
            eps = (eps * params.tolerance_update_factor).max(params.tolerance);
        };

        stats.status = status;
        stats.norm_penalty = linalg::norm(&sigma);
        stats.elapsed = start.elapsed();
        Ok(stats)
    }
}

/// Choose the initial penalty weights: the configured value, or an
/// automatic one balancing the cost magnitude against the constraint
/// violation at the starting point.
fn initialize_penalty<F: Float, P: Problem<F> + ?Sized>(
    problem: &P,
    params: &AlmParams<F>,
    x: &[F],
    sigma: &mut [F],
) {
    if params.initial_penalty > F::zero() {
        for s in sigma.iter_mut() {
            *s = params.initial_penalty.min(params.max_penalty);
        }
        return;
    }
    let m = problem.m();
    let f0 = problem.cost(x);
    let mut g0 = vec![F::zero(); m];
    let mut d0 = vec![F::zero(); m];
    problem.constraints(x, &mut g0);
    problem.box_d().projecting_difference(&g0, &mut d0);
    let two = F::one() + F::one();
    let violation = linalg::norm_sq(&d0) / two;
    let s0 = params.initial_penalty_factor * F::one().max(f0.abs()) / F::one().max(violation);
    let s0 = s0.max(params.min_penalty).min(params.max_penalty);
    for s in sigma.iter_mut() {
        *s = s0;
    }
}

/// Safeguarded penalty update: components whose error did not shrink below
/// `rel_penalty_increase_threshold · δ_old` are multiplied by the update
/// factor, clamped to `max_penalty`. With `single_penalty_factor` the
/// aggregate violation decides for all components at once.
fn update_penalty<F: Float>(params: &AlmParams<F>, sigma: &mut [F], err_z: &[F], delta: F, delta_old: F) {
    if delta_old == F::infinity() {
        return;
    }
    let threshold = params.rel_penalty_increase_threshold * delta_old;
    if params.single_penalty_factor {
        if delta > threshold {
            for s in sigma.iter_mut() {
                *s = (*s * params.penalty_update_factor).min(params.max_penalty);
            }
        }
    } else {
        for (s, e) in sigma.iter_mut().zip(err_z.iter()) {
            if e.abs() > threshold {
                *s = (*s * params.penalty_update_factor).min(params.max_penalty);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Bounds;
    use crate::direction::NoDirection;
    use crate::panoc::PanocParams;
    use crate::problem::FunctionalProblem;

    fn inner() -> PanocSolver<f64, NoDirection> {
        PanocSolver::new(PanocParams::default(), NoDirection::default()).unwrap()
    }

    #[test]
    fn invalid_params_are_rejected() {
        let params = AlmParams::<f64> {
            penalty_update_factor: 1.0,
            ..AlmParams::default()
        };
        assert!(AlmSolver::new(params, inner()).is_err());
    }

    #[test]
    fn penalty_update_grows_only_stalled_components() {
        let params = AlmParams::<f64> {
            penalty_update_factor: 10.0,
            rel_penalty_increase_threshold: 0.25,
            max_penalty: 1e3,
            ..AlmParams::default()
        };
        let mut sigma = [1.0, 1.0, 500.0];
        // Previous violation 1.0: component 0 improved enough, the others
        // did not; the third saturates at max_penalty.
        update_penalty(&params, &mut sigma, &[0.1, 0.5, 0.5], 0.5, 1.0);
        assert_eq!(sigma, [1.0, 10.0, 1e3]);
    }

    #[test]
    fn single_penalty_factor_moves_all_components() {
        let params = AlmParams::<f64> {
            penalty_update_factor: 5.0,
            rel_penalty_increase_threshold: 0.5,
            single_penalty_factor: true,
            ..AlmParams::default()
        };
        let mut sigma = [1.0, 2.0];
        update_penalty(&params, &mut sigma, &[0.0, 0.9], 0.9, 1.0);
        assert_eq!(sigma, [5.0, 10.0]);
    }

    #[test]
    fn automatic_initial_penalty_is_clamped() {
        let mut p = FunctionalProblem::new(Bounds::unbounded(1), Bounds::zero(1));
        p.cost = Box::new(|_| 0.0);
        p.constraints = Box::new(|_, g| g[0] = 0.0);
        let params = AlmParams::<f64> {
            initial_penalty: 0.0,
            initial_penalty_factor: 20.0,
            ..AlmParams::default()
        };
        let mut sigma = [0.0];
        initialize_penalty(&p, &params, &[0.0], &mut sigma);
        // Zero cost, zero violation: σ = 20·1/1 = 20.
        assert_eq!(sigma, [20.0]);
    }

    #[test]
    fn problem_reuse_during_solve_is_rejected() {
        let p = FunctionalProblem::<f64>::new(Bounds::unbounded(1), Bounds::zero(0));
        let _g = InUseGuard::acquire(Kind::Problem, identity_of(&p)).unwrap();
        let mut solver = AlmSolver::new(AlmParams::default(), inner()).unwrap();
        let mut x = [0.0];
        let err = solver.solve(&p, &mut x, &mut []).unwrap_err();
        assert_eq!(err, SolverError::InstanceInUse);
    }
}
