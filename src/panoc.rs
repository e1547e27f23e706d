//! Inner solver: proximal-gradient iteration with a safeguarded line
//! search and pluggable acceleration (the PANOC scheme).
//!
//! Minimizes `ψ(x) + h(x)` where ψ is the (augmented-Lagrangian) smooth
//! part and `h` the nonsmooth part exposed through
//! [`Problem::prox_grad_step`]. Each iteration takes a forward-backward
//! step, asks the direction provider for a correction, and accepts the
//! accelerated candidate only when the forward-backward envelope decreases
//! enough; otherwise it backtracks toward the plain step, which keeps the
//! convergence guarantees of the unaccelerated method.

use std::time::{Duration, Instant};

use log::debug;

use crate::direction::Direction;
use crate::error::SolverError;
use crate::float::Float;
use crate::guard::{identity_of, InUseGuard, Kind};
use crate::lagrangian::{eval_grad_psi_from_yhat, eval_psi_yhat, eval_update_error};
use crate::linalg;
use crate::lipschitz::{self, LipschitzParams};
use crate::problem::Problem;
use crate::stop::{SolverStatus, StopCrit, StopSignal};

/// Tuning parameters for the inner solver.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PanocParams<F> {
    /// Parameters for the Lipschitz estimate and the step size γ.
    pub lipschitz: LipschitzParams<F>,
    /// Maximum number of inner iterations.
    pub max_iter: usize,
    /// Maximum duration of one inner solve.
    pub max_time: Duration,
    /// Minimum Lipschitz constant estimate.
    pub l_min: F,
    /// Maximum Lipschitz constant estimate.
    pub l_max: F,
    /// Stopping criterion compared against the tolerance.
    pub stop_crit: StopCrit,
    /// Consecutive identical iterates tolerated before giving up.
    pub max_no_progress: usize,
    /// Minimum line-search coefficient τ before the accelerated candidate
    /// is abandoned for the plain forward-backward step.
    pub min_linesearch_coefficient: F,
    /// Fraction of the theoretical envelope decrease the line search
    /// insists on.
    pub linesearch_strictness_factor: F,
    /// Relative tolerance absorbing rounding error in the line-search
    /// comparison.
    pub linesearch_tolerance_factor: F,
    /// Relative tolerance absorbing rounding error in the quadratic
    /// upper-bound condition that drives γ backtracking.
    pub quadratic_upperbound_tolerance_factor: F,
    /// Also check the quadratic upper bound at line-search candidates and
    /// restart the iteration with a halved γ when it fails there.
    pub update_lipschitz_in_linesearch: bool,
    /// Log a progress line every N iterations (0 disables).
    pub print_interval: usize,
    /// Number of significant digits in logged values.
    pub print_precision: usize,
}

impl Default for PanocParams<f64> {
    fn default() -> Self {
        PanocParams {
            lipschitz: LipschitzParams::default(),
            max_iter: 100,
            max_time: Duration::from_secs(5 * 60),
            l_min: 1e-5,
            l_max: 1e20,
            stop_crit: StopCrit::default(),
            max_no_progress: 10,
            min_linesearch_coefficient: 1.0 / 256.0,
            linesearch_strictness_factor: 0.95,
            linesearch_tolerance_factor: 10.0 * f64::EPSILON,
            quadratic_upperbound_tolerance_factor: 10.0 * f64::EPSILON,
            update_lipschitz_in_linesearch: true,
            print_interval: 0,
            print_precision: 8,
        }
    }
}

impl Default for PanocParams<f32> {
    fn default() -> Self {
        PanocParams {
            lipschitz: LipschitzParams::default(),
            max_iter: 100,
            max_time: Duration::from_secs(5 * 60),
            l_min: 1e-5,
            l_max: 1e20,
            stop_crit: StopCrit::default(),
            max_no_progress: 10,
            min_linesearch_coefficient: 1.0 / 256.0,
            linesearch_strictness_factor: 0.95,
            linesearch_tolerance_factor: 10.0 * f32::EPSILON,
            quadratic_upperbound_tolerance_factor: 10.0 * f32::EPSILON,
            update_lipschitz_in_linesearch: true,
            print_interval: 0,
            print_precision: 4,
        }
    }
}

impl<F: Float> PanocParams<F> {
    pub(crate) fn validate(&self) -> Result<(), SolverError> {
        self.lipschitz.validate()?;
        if self.max_iter == 0 {
            return Err(SolverError::InvalidParameter {
                name: "max_iter",
                message: "must be at least 1",
            });
        }
        if self.l_min <= F::zero() || !self.l_min.is_finite() {
            return Err(SolverError::InvalidParameter {
                name: "l_min",
                message: "must be positive and finite",
            });
        }
        if self.l_max < self.l_min {
            return Err(SolverError::InvalidParameter {
                name: "l_max",
                message: "must be at least l_min",
            });
        }
        if self.min_linesearch_coefficient <= F::zero()
            || self.min_linesearch_coefficient >= F::one()
        {
            return Err(SolverError::InvalidParameter {
                name: "min_linesearch_coefficient",
                message: "must lie strictly between 0 and 1",
            });
        }
        if self.linesearch_strictness_factor <= F::zero()
            || self.linesearch_strictness_factor > F::one()
        {
            return Err(SolverError::InvalidParameter {
                name: "linesearch_strictness_factor",
                message: "must lie in (0, 1]",
            });
        }
        if self.linesearch_tolerance_factor < F::zero() {
            return Err(SolverError::InvalidParameter {
                name: "linesearch_tolerance_factor",
                message: "must be nonnegative",
            });
        }
        if self.quadratic_upperbound_tolerance_factor < F::zero() {
            return Err(SolverError::InvalidParameter {
                name: "quadratic_upperbound_tolerance_factor",
                message: "must be nonnegative",
            });
        }
        Ok(())
    }
}

/// Options for one invocation of the inner solver; the outer loop tightens
/// these between invocations.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InnerSolveOptions<F> {
    /// Requested stationarity tolerance.
    pub tolerance: F,
    /// Remaining time budget, on top of the solver's own `max_time`.
    pub max_time: Option<Duration>,
    /// Write the best iterate back even when the solve did not converge.
    pub always_overwrite_results: bool,
}

impl Default for InnerSolveOptions<f64> {
    fn default() -> Self {
        InnerSolveOptions {
            tolerance: 1e-8,
            max_time: None,
            always_overwrite_results: true,
        }
    }
}

impl Default for InnerSolveOptions<f32> {
    fn default() -> Self {
        InnerSolveOptions {
            tolerance: 1e-5,
            max_time: None,
            always_overwrite_results: true,
        }
    }
}

/// Statistics of one inner solve. Write-once output, never read back by
/// the algorithm.
#[derive(Clone, Debug)]
pub struct PanocStats<F> {
    /// Why the solve stopped.
    pub status: SolverStatus,
    /// Last value of the stopping measure.
    pub eps: F,
    /// Wall-clock duration of the solve.
    pub elapsed: Duration,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Times the step size γ was halved after a failed quadratic upper
    /// bound.
    pub stepsize_backtracks: usize,
    /// Times the line search fell all the way back to the plain step
    /// without reaching sufficient decrease.
    pub linesearch_failures: usize,
    /// Total number of line-search halvings of τ.
    pub linesearch_backtracks: usize,
    /// Times the direction provider had no applicable direction.
    pub direction_failures: usize,
    /// Times the direction provider rejected an offered update pair.
    pub direction_update_rejected: usize,
    /// Final step size γ.
    pub final_gamma: F,
    /// Final smooth cost ψ(x̂).
    pub final_psi: F,
    /// Final nonsmooth cost h(x̂).
    pub final_h: F,
}

impl<F: Float> PanocStats<F> {
    fn new() -> Self {
        PanocStats {
            status: SolverStatus::Busy,
            eps: F::infinity(),
            elapsed: Duration::ZERO,
            iterations: 0,
            stepsize_backtracks: 0,
            linesearch_failures: 0,
            linesearch_backtracks: 0,
            direction_failures: 0,
            direction_update_rejected: 0,
            final_gamma: F::zero(),
            final_psi: F::zero(),
            final_h: F::zero(),
        }
    }
}

/// Intermediate values handed to the progress callback each iteration.
///
/// The callback must not mutate solver state; request an early stop
/// through the solver's [`StopSignal`] instead.
pub struct ProgressInfo<'a, F> {
    /// Iteration index.
    pub k: usize,
    /// Current iterate.
    pub x: &'a [F],
    /// Forward-backward step `x̂ - x`.
    pub p: &'a [F],
    /// Squared norm of `p`.
    pub norm_sq_p: F,
    /// Proximal point `x̂`.
    pub x_hat: &'a [F],
    /// Smooth cost at `x`.
    pub psi: F,
    /// Gradient of the smooth cost at `x`.
    pub grad_psi: &'a [F],
    /// Smooth cost at `x̂`.
    pub psi_hat: F,
    /// Current Lipschitz estimate.
    pub l: F,
    /// Current step size.
    pub gamma: F,
    /// Current value of the stopping measure.
    pub eps: F,
    /// Penalty weights of the enclosing outer iteration (empty when
    /// solving an unconstrained problem).
    pub sigma: &'a [F],
    /// Multiplier estimates of the enclosing outer iteration.
    pub y: &'a [F],
}

/// Progress callback type.
pub type ProgressCallback<F> = Box<dyn FnMut(&ProgressInfo<'_, F>)>;

/// The inner forward-backward solver.
pub struct PanocSolver<F: Float, D> {
    params: PanocParams<F>,
    direction: D,
    stop_signal: StopSignal,
    progress_cb: Option<ProgressCallback<F>>,
}

impl<F: Float, D: Direction<F>> PanocSolver<F, D> {
    /// Create a solver from validated parameters and a direction provider.
    pub fn new(params: PanocParams<F>, direction: D) -> Result<Self, SolverError> {
        params.validate()?;
        Ok(PanocSolver {
            params,
            direction,
            stop_signal: StopSignal::new(),
            progress_cb: None,
        })
    }

    /// The solver's parameters.
    pub fn params(&self) -> &PanocParams<F> {
        &self.params
    }

    /// Short diagnostic name, e.g. `"panoc+lbfgs"`.
    pub fn name(&self) -> String {
        format!("panoc+{}", self.direction.name())
    }

    /// Cloneable handle for requesting an early stop from another thread
    /// or a signal handler.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop_signal.clone()
    }

    /// Request termination at the next checkpoint.
    pub fn stop(&self) {
        self.stop_signal.stop();
    }

    /// Install a callback invoked synchronously once per iteration.
    pub fn set_progress_callback(&mut self, cb: ProgressCallback<F>) -> &mut Self {
        self.progress_cb = Some(cb);
        self
    }

    /// Remove the progress callback.
    pub fn clear_progress_callback(&mut self) -> &mut Self {
        self.progress_cb = None;
        self
    }

    /// Minimize `f + h` over the box `C` for a problem without general
    /// constraints (`m = 0`).
    pub fn minimize<P: Problem<F> + ?Sized>(
        &mut self,
        problem: &P,
        opts: &InnerSolveOptions<F>,
        x: &mut [F],
    ) -> Result<PanocStats<F>, SolverError> {
        if problem.m() != 0 {
            return Err(SolverError::DimensionMismatch {
                name: "y",
                expected: problem.m(),
                actual: 0,
            });
        }
        self.solve(problem, opts, x, &mut [], &[], &mut [])
    }

    /// Drive the augmented-Lagrangian subproblem for multipliers `y` and
    /// penalties `sigma` to approximate stationarity.
    ///
    /// On success (or when `opts.always_overwrite_results` is set) `x`
    /// receives the proximal point, `y` the candidate multipliers, and
    /// `err_z` the multiplier-update error used by the outer loop.
    pub fn solve<P: Problem<F> + ?Sized>(
        &mut self,
        problem: &P,
        opts: &InnerSolveOptions<F>,
        x: &mut [F],
        y: &mut [F],
        sigma: &[F],
        err_z: &mut [F],
    ) -> Result<PanocStats<F>, SolverError> {
        // A fresh top-level solve starts with a clear stop flag.
        self.stop_signal.clear();
        self.solve_impl(problem, opts, x, y, sigma, err_z)
    }

    /// Like [`PanocSolver::solve`], but keeps a pending stop request, so an
    /// outer loop invoking this repeatedly cannot lose a stop that arrives
    /// between two invocations.
    pub(crate) fn solve_for_outer<P: Problem<F> + ?Sized>(
        &mut self,
        problem: &P,
        opts: &InnerSolveOptions<F>,
        x: &mut [F],
        y: &mut [F],
        sigma: &[F],
        err_z: &mut [F],
    ) -> Result<PanocStats<F>, SolverError> {
        self.solve_impl(problem, opts, x, y, sigma, err_z)
    }

    fn solve_impl<P: Problem<F> + ?Sized>(
        &mut self,
        problem: &P,
        opts: &InnerSolveOptions<F>,
        x: &mut [F],
        y: &mut [F],
        sigma: &[F],
        err_z: &mut [F],
    ) -> Result<PanocStats<F>, SolverError> {
        let n = problem.n();
        let m = problem.m();
        check_dim("x", x.len(), n)?;
        check_dim("y", y.len(), m)?;
        check_dim("sigma", sigma.len(), m)?;
        check_dim("err_z", err_z.len(), m)?;
        if opts.tolerance <= F::zero() {
            return Err(SolverError::InvalidParameter {
                name: "tolerance",
                message: "must be positive",
            });
        }
        if sigma.iter().any(|s| !(*s > F::zero())) {
            return Err(SolverError::InvalidParameter {
                name: "sigma",
                message: "penalty weights must be positive",
            });
        }
        let _guard = InUseGuard::acquire(Kind::InnerSolver, identity_of(self))?;

        let start = Instant::now();
        let time_budget = opts
            .max_time
            .map_or(self.params.max_time, |t| t.min(self.params.max_time));

        let two = F::one() + F::one();
        let params = self.params.clone();
        let mut stats = PanocStats::new();

        // Working storage for the whole solve; the iteration loop below
        // allocates nothing.
        let mut x_hat = vec![F::zero(); n];
        let mut p = vec![F::zero(); n];
        let mut grad = vec![F::zero(); n];
        let mut x_next = vec![F::zero(); n];
        let mut x_hat_next = vec![F::zero(); n];
        let mut p_next = vec![F::zero(); n];
        let mut grad_next = vec![F::zero(); n];
        let mut q = vec![F::zero(); n];
        let mut work_n = vec![F::zero(); n];
        let mut s1 = vec![F::zero(); n];
        let mut s2 = vec![F::zero(); n];
        let mut yh_x = vec![F::zero(); m];
        let mut yh_xhat = vec![F::zero(); m];
        let mut yh_xnext = vec![F::zero(); m];
        let mut yh_xhat_next = vec![F::zero(); m];
        let mut work_g = vec![F::zero(); m];

        // ψ(x₀), ∇ψ(x₀).
        let mut psi = eval_psi_yhat(problem, x, y, sigma, &mut yh_x, &mut work_g);
        eval_grad_psi_from_yhat(problem, x, &yh_x, &mut grad, &mut work_n);
        if !psi.is_finite() || !linalg::all_finite(&grad) {
            stats.status = SolverStatus::NotFinite;
            stats.elapsed = start.elapsed();
            return Ok(stats);
        }

        // Step size from the user estimate or a finite-difference probe.
        let mut l = if params.lipschitz.l_0 > F::zero() {
            params.lipschitz.l_0
        } else {
            let norm_h = lipschitz::probe_point(&params.lipschitz, x, &mut s1);
            let _ = eval_psi_yhat(problem, &s1, y, sigma, &mut yh_xnext, &mut work_g);
            eval_grad_psi_from_yhat(problem, &s1, &yh_xnext, &mut grad_next, &mut work_n);
            lipschitz::estimate(norm_h, &grad, &grad_next)
        };
        if l.is_nan() {
            stats.status = SolverStatus::NotFinite;
            stats.elapsed = start.elapsed();
            return Ok(stats);
        }
        l = l.max(params.l_min).min(params.l_max);
        let mut gamma = params.lipschitz.l_gamma_factor / l;

        // First forward-backward step.
        let mut h_val = problem.prox_grad_step(gamma, x, &grad, &mut x_hat, &mut p);
        let mut psi_hat = eval_psi_yhat(problem, &x_hat, y, sigma, &mut yh_xhat, &mut work_g);
        let mut norm_sq_p = linalg::norm_sq(&p);

        self.direction
            .initialize(y, sigma, gamma, x, &x_hat, &p, &grad);

        let mut psi_next;
        let mut psi_hat_next;
        let mut h_next;
        let mut norm_sq_p_next;
        let mut no_progress = 0usize;
        let mut eps_k = F::infinity();
        let mut k = 0usize;

        let status = 'main: loop {
            // Backtrack γ until the quadratic upper bound holds at x; the
            // direction provider is told about every change.
            loop {
                let margin =
                    (F::one() + psi.abs()) * params.quadratic_upperbound_tolerance_factor;
                let upper = psi + linalg::dot(&grad, &p) + norm_sq_p / (two * gamma);
                if psi_hat <= upper + margin || l >= params.l_max {
                    break;
                }
                let old_gamma = gamma;
                l = l * two;
                gamma = gamma / two;
                stats.stepsize_backtracks += 1;
                self.direction.changed_gamma(gamma, old_gamma);
                h_val = problem.prox_grad_step(gamma, x, &grad, &mut x_hat, &mut p);
                psi_hat = eval_psi_yhat(problem, &x_hat, y, sigma, &mut yh_xhat, &mut work_g);
                norm_sq_p = linalg::norm_sq(&p);
            }

            if !psi.is_finite() || !psi_hat.is_finite() || !norm_sq_p.is_finite() {
                break 'main SolverStatus::NotFinite;
            }

            eps_k = stop_measure(
                params.stop_crit,
                problem,
                x,
                &x_hat,
                norm_sq_p,
                &grad,
                &yh_xhat,
                gamma,
                &mut s1,
                &mut s2,
                &mut work_n,
            );

            if let Some(cb) = self.progress_cb.as_mut() {
                cb(&ProgressInfo {
                    k,
                    x: &*x,
                    p: &p,
                    norm_sq_p,
                    x_hat: &x_hat,
                    psi,
                    grad_psi: &grad,
                    psi_hat,
                    l,
                    gamma,
                    eps: eps_k,
                    sigma,
                    y: &*y,
                });
            }
            if params.print_interval != 0 && k % params.print_interval == 0 {
                debug!(
                    "{:>6}: ψ = {:.prec$e}, ‖p‖ = {:.prec$e}, γ = {:.prec$e}, ε = {:.prec$e}",
                    k,
                    psi,
                    norm_sq_p.sqrt(),
                    gamma,
                    eps_k,
                    prec = params.print_precision,
                );
            }

            if self.stop_signal.stop_requested() {
                break 'main SolverStatus::Interrupted;
            }
            if eps_k <= opts.tolerance {
                break 'main SolverStatus::Converged;
            }
            if start.elapsed() >= time_budget {
                break 'main SolverStatus::MaxTime;
            }
            if k >= params.max_iter {
                break 'main SolverStatus::MaxIter;
            }

            // Ask the active provider for an accelerated candidate.
            let have_q = if k > 0 {
                let ok = self.direction.apply(gamma, x, &x_hat, &p, &grad, &mut q);
                if !ok {
                    stats.direction_failures += 1;
                }
                ok
            } else {
                false
            };

            // Line search on the forward-backward envelope
            // φγ(x) = ψ(x) + h(x̂) + ⟨∇ψ(x), p⟩ + ‖p‖²/(2γ).
            let phi = psi + h_val + linalg::dot(&grad, &p) + norm_sq_p / (two * gamma);
            let sigma_ls =
                params.linesearch_strictness_factor * (F::one() - gamma * l) / (two * gamma);
            let decrease_target = sigma_ls * norm_sq_p;
            let ls_margin = (F::one() + phi.abs()) * params.linesearch_tolerance_factor;
            let mut tau = if have_q { F::one() } else { F::zero() };
            let mut restart = false;

            loop {
                if tau < params.min_linesearch_coefficient {
                    tau = F::zero();
                }
                if tau == F::zero() {
                    x_next.copy_from_slice(&x_hat);
                } else {
                    for i in 0..n {
                        x_next[i] = x[i] + (F::one() - tau) * p[i] + tau * q[i];
                    }
                }
                psi_next = eval_psi_yhat(problem, &x_next, y, sigma, &mut yh_xnext, &mut work_g);
                eval_grad_psi_from_yhat(problem, &x_next, &yh_xnext, &mut grad_next, &mut work_n);
                h_next =
                    problem.prox_grad_step(gamma, &x_next, &grad_next, &mut x_hat_next, &mut p_next);
                psi_hat_next =
                    eval_psi_yhat(problem, &x_hat_next, y, sigma, &mut yh_xhat_next, &mut work_g);
                norm_sq_p_next = linalg::norm_sq(&p_next);

                // The candidate may expose a Lipschitz violation before the
                // next iteration would: restart this one without advancing.
                if params.update_lipschitz_in_linesearch && l < params.l_max {
                    let qub_margin = (F::one() + psi_next.abs())
                        * params.quadratic_upperbound_tolerance_factor;
                    let upper = psi_next
                        + linalg::dot(&grad_next, &p_next)
                        + norm_sq_p_next / (two * gamma);
                    if psi_hat_next > upper + qub_margin {
                        let old_gamma = gamma;
                        l = l * two;
                        gamma = gamma / two;
                        stats.stepsize_backtracks += 1;
                        self.direction.changed_gamma(gamma, old_gamma);
                        h_val = problem.prox_grad_step(gamma, x, &grad, &mut x_hat, &mut p);
                        psi_hat =
                            eval_psi_yhat(problem, &x_hat, y, sigma, &mut yh_xhat, &mut work_g);
                        norm_sq_p = linalg::norm_sq(&p);
                        restart = true;
                        break;
                    }
                }

                let phi_next = psi_next
                    + h_next
                    + linalg::dot(&grad_next, &p_next)
                    + norm_sq_p_next / (two * gamma);
                if phi_next <= phi - decrease_target + ls_margin {
                    break;
                }
                if tau == F::zero() {
                    // The plain step is kept even without sufficient
                    // decrease; the γ safeguard above deals with the cause.
                    stats.linesearch_failures += 1;
                    break;
                }
                tau = tau / two;
                stats.linesearch_backtracks += 1;
            }
            if restart {
                k += 1;
                stats.iterations = k;
                continue 'main;
            }

            if !self
                .direction
                .update(gamma, gamma, x, &x_next, &p, &p_next, &grad, &grad_next)
            {
                stats.direction_update_rejected += 1;
            }

            let unchanged = x.iter().zip(x_next.iter()).all(|(a, b)| a == b);
            no_progress = if unchanged { no_progress + 1 } else { 0 };
            if no_progress > params.max_no_progress {
                break 'main SolverStatus::NoProgress;
            }

            x.copy_from_slice(&x_next);
            std::mem::swap(&mut x_hat, &mut x_hat_next);
            std::mem::swap(&mut p, &mut p_next);
            std::mem::swap(&mut grad, &mut grad_next);
            std::mem::swap(&mut yh_x, &mut yh_xnext);
            std::mem::swap(&mut yh_xhat, &mut yh_xhat_next);
            psi = psi_next;
            psi_hat = psi_hat_next;
            h_val = h_next;
            norm_sq_p = norm_sq_p_next;
            k += 1;
            stats.iterations = k;
        };

        stats.status = status;
        stats.eps = eps_k;
        stats.final_gamma = gamma;
        stats.final_psi = psi_hat;
        stats.final_h = h_val;
        stats.elapsed = start.elapsed();

        if status == SolverStatus::Converged || opts.always_overwrite_results {
            x.copy_from_slice(&x_hat);
            if m > 0 {
                eval_update_error(y, &yh_xhat, sigma, err_z);
                y.copy_from_slice(&yh_xhat);
            }
        }
        Ok(stats)
    }
}

fn check_dim(name: &'static str, actual: usize, expected: usize) -> Result<(), SolverError> {
    if actual != expected {
        return Err(SolverError::DimensionMismatch {
            name,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Evaluate the configured stopping measure.
#[allow(clippy::too_many_arguments)]
fn stop_measure<F: Float, P: Problem<F> + ?Sized>(
    crit: StopCrit,
    problem: &P,
    x: &[F],
    x_hat: &[F],
    norm_sq_p: F,
    grad: &[F],
    yh_xhat: &[F],
    gamma: F,
    s1: &mut [F],
    s2: &mut [F],
    work_n: &mut [F],
) -> F {
    match crit {
        StopCrit::FprNorm => norm_sq_p.sqrt() / gamma,
        StopCrit::ProjGradNorm => norm_sq_p.sqrt(),
        StopCrit::ProjGradUnitNorm => {
            problem.prox_grad_step(F::one(), x, grad, s1, s2);
            linalg::norm(s2)
        }
        StopCrit::ApproxKkt => {
            // ‖(x - x̂)/γ - ∇ψ(x) + ∇ψ(x̂)‖∞
            eval_grad_psi_from_yhat(problem, x_hat, yh_xhat, s1, work_n);
            let mut err = F::zero();
            for i in 0..x.len() {
                let r = (x[i] - x_hat[i]) / gamma - grad[i] + s1[i];
                let a = r.abs();
                if a > err {
                    err = a;
                }
            }
            err
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Bounds;
    use crate::direction::{LbfgsDirection, LbfgsParams, NoDirection};
    use crate::problem::FunctionalProblem;
    use approx::assert_relative_eq;

    /// min ½‖x - c‖² over a box.
    fn shifted_quadratic(c: [f64; 2], bounds: Bounds<f64>) -> FunctionalProblem<f64> {
        let mut p = FunctionalProblem::new(bounds, Bounds::zero(0));
        p.cost = Box::new(move |x| {
            0.5 * ((x[0] - c[0]).powi(2) + (x[1] - c[1]).powi(2))
        });
        p.grad = Box::new(move |x, g| {
            g[0] = x[0] - c[0];
            g[1] = x[1] - c[1];
        });
        p
    }

    #[test]
    fn invalid_params_are_rejected_at_construction() {
        let params = PanocParams::<f64> {
            l_min: -1.0,
            ..PanocParams::default()
        };
        assert!(PanocSolver::new(params, NoDirection::default()).is_err());
    }

    #[test]
    fn unconstrained_quadratic_converges_to_center() {
        let p = shifted_quadratic([3.0, -2.0], Bounds::unbounded(2));
        let mut solver =
            PanocSolver::new(PanocParams::default(), NoDirection::default()).unwrap();
        let mut x = [0.0, 0.0];
        let opts = InnerSolveOptions {
            tolerance: 1e-10,
            ..InnerSolveOptions::default()
        };
        let stats = solver.minimize(&p, &opts, &mut x).unwrap();
        assert_eq!(stats.status, SolverStatus::Converged);
        assert_relative_eq!(x[0], 3.0, epsilon = 1e-8);
        assert_relative_eq!(x[1], -2.0, epsilon = 1e-8);
    }

    #[test]
    fn box_constrained_minimum_lands_on_boundary() {
        let bounds = Bounds::new(vec![-1.0, -1.0], vec![1.0, 1.0]).unwrap();
        let p = shifted_quadratic([3.0, 0.5], bounds);
        let mut solver =
            PanocSolver::new(PanocParams::default(), NoDirection::default()).unwrap();
        let mut x = [0.0, 0.0];
        let stats = solver
            .minimize(&p, &InnerSolveOptions::default(), &mut x)
            .unwrap();
        assert_eq!(stats.status, SolverStatus::Converged);
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-7);
        assert_relative_eq!(x[1], 0.5, epsilon = 1e-7);
    }

    #[test]
    fn lbfgs_accelerates_the_fixed_point_iteration() {
        // Badly scaled quadratic: plain forward-backward needs many more
        // iterations than the accelerated method.
        let mut p = FunctionalProblem::new(Bounds::unbounded(2), Bounds::zero(0));
        p.cost = Box::new(|x| 0.5 * (20.0 * x[0] * x[0] + x[1] * x[1]));
        p.grad = Box::new(|x, g| {
            g[0] = 20.0 * x[0];
            g[1] = x[1];
        });

        let opts = InnerSolveOptions {
            tolerance: 1e-9,
            ..InnerSolveOptions::default()
        };
        let params = PanocParams {
            max_iter: 5000,
            ..PanocParams::default()
        };

        let mut plain = PanocSolver::new(params.clone(), NoDirection::default()).unwrap();
        let mut x_plain = [1.0, 1.0];
        let stats_plain = plain.minimize(&p, &opts, &mut x_plain).unwrap();
        assert_eq!(stats_plain.status, SolverStatus::Converged);

        let mut accel =
            PanocSolver::new(params, LbfgsDirection::new(LbfgsParams::default()).unwrap())
                .unwrap();
        let mut x_accel = [1.0, 1.0];
        let stats_accel = accel.minimize(&p, &opts, &mut x_accel).unwrap();
        assert_eq!(stats_accel.status, SolverStatus::Converged);

        assert!(
            stats_accel.iterations < stats_plain.iterations,
            "accelerated {} >= plain {}",
            stats_accel.iterations,
            stats_plain.iterations
        );
        assert_relative_eq!(x_accel[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(x_accel[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn linear_cost_over_box_hits_corner() {
        // Linear cost: the gradient probe sees zero curvature and the
        // residual vanishes at the active corner, so the accelerator has
        // nothing useful to offer and the plain steps must carry the solve.
        let bounds = Bounds::new(vec![-1.0, -1.0], vec![1.0, 1.0]).unwrap();
        let mut p = FunctionalProblem::new(bounds, Bounds::zero(0));
        p.cost = Box::new(|x| 2.0 * x[0] - 3.0 * x[1]);
        p.grad = Box::new(|_, g| {
            g[0] = 2.0;
            g[1] = -3.0;
        });
        let mut solver = PanocSolver::new(
            PanocParams {
                max_iter: 500,
                ..PanocParams::default()
            },
            LbfgsDirection::new(LbfgsParams::default()).unwrap(),
        )
        .unwrap();
        let mut x = [0.0, 0.0];
        let stats = solver
            .minimize(&p, &InnerSolveOptions::default(), &mut x)
            .unwrap();
        assert_eq!(stats.status, SolverStatus::Converged);
        assert_relative_eq!(x[0], -1.0, epsilon = 1e-8);
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-8);
    }

    #[test]
    fn non_finite_cost_reports_not_finite() {
        let mut p = FunctionalProblem::new(Bounds::unbounded(1), Bounds::zero(0));
        p.cost = Box::new(|_| f64::NAN);
        p.grad = Box::new(|_, g| g[0] = f64::NAN);
        let mut solver =
            PanocSolver::new(PanocParams::default(), NoDirection::default()).unwrap();
        let mut x = [1.0];
        let stats = solver
            .minimize(&p, &InnerSolveOptions::default(), &mut x)
            .unwrap();
        assert_eq!(stats.status, SolverStatus::NotFinite);
        // The offending iterate is retained for diagnosis.
        assert_eq!(x[0], 1.0);
    }

    #[test]
    fn stop_signal_interrupts_within_one_iteration() {
        let p = shifted_quadratic([1e6, -1e6], Bounds::unbounded(2));
        let mut solver =
            PanocSolver::new(PanocParams::default(), NoDirection::default()).unwrap();
        let signal = solver.stop_signal();
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen_cb = seen.clone();
        solver.set_progress_callback(Box::new(move |info| {
            seen_cb.store(info.k + 1, std::sync::atomic::Ordering::SeqCst);
            if info.k == 2 {
                signal.stop();
            }
        }));
        let mut x = [0.0, 0.0];
        let opts = InnerSolveOptions {
            tolerance: 1e-14,
            ..InnerSolveOptions::default()
        };
        let stats = solver.solve(&p, &opts, &mut x, &mut [], &[], &mut []).unwrap();
        assert_eq!(stats.status, SolverStatus::Interrupted);
        // Observed the flag on the very next poll.
        assert!(stats.iterations <= 4);
        assert!(seen.load(std::sync::atomic::Ordering::SeqCst) >= 3);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let p = shifted_quadratic([0.0, 0.0], Bounds::unbounded(2));
        let mut solver =
            PanocSolver::new(PanocParams::default(), NoDirection::default()).unwrap();
        let mut x = [0.0; 3];
        let err = solver
            .minimize(&p, &InnerSolveOptions::default(), &mut x)
            .unwrap_err();
        assert!(matches!(err, SolverError::DimensionMismatch { .. }));
    }
}
