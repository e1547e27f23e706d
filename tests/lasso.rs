//! Forward-backward splitting and the accelerated inner solver on a small
//! LASSO problem: minimize ½‖Ax − b‖² + λ‖x‖₁ in five dimensions.

use approx::assert_relative_eq;
use pangolin::{
    prox_step, Bounds, FunctionalProblem, InnerSolveOptions, L1Norm, LbfgsDirection, LbfgsParams,
    LipschitzParams, NoDirection, PanocParams, PanocSolver, SolverStatus, StopCrit,
};

const N: usize = 5;
const LAMBDA: f64 = 1e-2;
const GAMMA: f64 = 0.38;

/// Row-major, diagonally dominant so the least-squares term is well
/// conditioned and `GAMMA < 1/‖AᵀA‖₂` holds with a wide margin.
const A: [[f64; N]; N] = [
    [0.90, 0.10, -0.05, 0.00, 0.10],
    [-0.10, 0.80, 0.10, 0.05, 0.00],
    [0.05, -0.10, 0.85, 0.10, -0.05],
    [0.00, 0.05, -0.10, 0.90, 0.10],
    [0.10, 0.00, 0.05, -0.10, 0.80],
];

const X_EXACT: [f64; N] = [0.5, 0.0, -0.3, 0.0, 0.8];

fn rhs() -> [f64; N] {
    // b = A x_exact + a small fixed perturbation.
    let noise = [0.004, -0.007, 0.002, 0.009, -0.003];
    let mut b = [0.0; N];
    for i in 0..N {
        for j in 0..N {
            b[i] += A[i][j] * X_EXACT[j];
        }
        b[i] += noise[i];
    }
    b
}

fn least_squares_grad(x: &[f64], b: &[f64], grad: &mut [f64]) -> f64 {
    let mut r = [0.0; N];
    for i in 0..N {
        for j in 0..N {
            r[i] += A[i][j] * x[j];
        }
        r[i] -= b[i];
    }
    for j in 0..N {
        grad[j] = 0.0;
        for i in 0..N {
            grad[j] += A[i][j] * r[i];
        }
    }
    0.5 * r.iter().map(|v| v * v).sum::<f64>()
}

/// Plain forward-backward splitting; returns the iterate, the residual
/// history, and the iteration count.
fn run_fbs(tolerance: f64, max_iter: usize) -> (Vec<f64>, Vec<f64>, usize) {
    let b = rhs();
    let mut h = L1Norm::new(LAMBDA).unwrap();
    let mut x = vec![0.0; N];
    let mut x_next = vec![0.0; N];
    let mut grad = vec![0.0; N];
    let mut step = vec![0.0; N];
    let mut residuals = Vec::new();
    let mut iters = max_iter;
    for k in 0..max_iter {
        least_squares_grad(&x, &b, &mut grad);
        prox_step(&mut h, &x, &grad, &mut x_next, &mut step, GAMMA, -GAMMA);
        x.copy_from_slice(&x_next);
        let residual = step.iter().map(|v| v * v).sum::<f64>().sqrt() / GAMMA;
        residuals.push(residual);
        if residual < tolerance {
            iters = k + 1;
            break;
        }
    }
    (x, residuals, iters)
}

#[test]
fn step_size_is_safe_for_this_matrix() {
    // ‖A‖₂² ≤ ‖A‖₁·‖A‖∞, so γ‖AᵀA‖₂ < 1 follows from the row/column sums.
    let max_row: f64 = A
        .iter()
        .map(|r| r.iter().map(|v| v.abs()).sum())
        .fold(0.0, f64::max);
    let max_col: f64 = (0..N)
        .map(|j| A.iter().map(|r| r[j].abs()).sum())
        .fold(0.0, f64::max);
    let bound = max_row * max_col;
    assert!(GAMMA * bound < 1.0, "γ·‖A‖₁‖A‖∞ = {}", GAMMA * bound);
}

#[test]
fn forward_backward_reaches_tight_tolerance() {
    let (x, residuals, iters) = run_fbs(1e-10, 1000);
    assert!(
        iters < 1000,
        "no convergence within 1000 iterations (last residual {:e})",
        residuals.last().unwrap()
    );
    assert!(*residuals.last().unwrap() < 1e-10);
    // λ is small, so the solution stays near the sparse generator.
    for j in 0..N {
        assert!(
            (x[j] - X_EXACT[j]).abs() < 0.1,
            "x[{}] = {} vs {}",
            j,
            x[j],
            X_EXACT[j]
        );
    }
}

#[test]
fn fixed_point_residual_is_monotone_without_acceleration() {
    let (_, residuals, _) = run_fbs(1e-10, 1000);
    for w in residuals.windows(2) {
        assert!(
            w[1] <= w[0] * (1.0 + 1e-12) + 1e-16,
            "residual increased: {:e} -> {:e}",
            w[0],
            w[1]
        );
    }
}

fn lasso_problem() -> FunctionalProblem<f64> {
    let b = rhs();
    let mut p = FunctionalProblem::new(Bounds::unbounded(N), Bounds::zero(0));
    p.l1_reg = LAMBDA;
    p.cost = Box::new(move |x| {
        let mut g = [0.0; N];
        least_squares_grad(x, &b, &mut g)
    });
    p.grad = Box::new(move |x, g| {
        least_squares_grad(x, &b, g);
    });
    p
}

fn solver_params() -> PanocParams<f64> {
    PanocParams {
        // Pin the initial step size to the hand-picked γ of the plain loop.
        lipschitz: LipschitzParams {
            l_0: 0.95 / GAMMA,
            ..LipschitzParams::default()
        },
        stop_crit: StopCrit::FprNorm,
        max_iter: 1000,
        ..PanocParams::default()
    }
}

#[test]
fn panoc_matches_forward_backward_solution() {
    let p = lasso_problem();
    let opts = InnerSolveOptions {
        tolerance: 1e-10,
        ..InnerSolveOptions::default()
    };

    let mut plain = PanocSolver::new(solver_params(), NoDirection::default()).unwrap();
    let mut x_plain = vec![0.0; N];
    let stats_plain = plain.minimize(&p, &opts, &mut x_plain).unwrap();
    assert_eq!(stats_plain.status, SolverStatus::Converged);

    let (x_fbs, _, _) = run_fbs(1e-10, 1000);
    for j in 0..N {
        assert_relative_eq!(x_plain[j], x_fbs[j], epsilon = 1e-8);
    }
}

#[test]
fn lbfgs_needs_fewer_iterations_than_plain_fbs() {
    let p = lasso_problem();
    let opts = InnerSolveOptions {
        tolerance: 1e-10,
        ..InnerSolveOptions::default()
    };

    let (_, _, fbs_iters) = run_fbs(1e-10, 1000);

    let direction = LbfgsDirection::new(LbfgsParams::default()).unwrap();
    let mut accel = PanocSolver::new(solver_params(), direction).unwrap();
    let mut x = vec![0.0; N];
    let stats = accel.minimize(&p, &opts, &mut x).unwrap();
    assert_eq!(stats.status, SolverStatus::Converged);
    assert!(
        stats.iterations < fbs_iters,
        "accelerated {} >= plain {}",
        stats.iterations,
        fbs_iters
    );

    let (x_fbs, _, _) = run_fbs(1e-10, 1000);
    for j in 0..N {
        assert_relative_eq!(x[j], x_fbs[j], epsilon = 1e-7);
    }
}
