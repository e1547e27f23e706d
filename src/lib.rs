//! Nonconvex constrained optimization built from two coupled loops: an
//! augmented Lagrangian outer loop ([`AlmSolver`]) handling general
//! equality/inequality constraints, wrapped around an accelerated
//! proximal-gradient inner solver ([`PanocSolver`]) handling box
//! constraints and driving the smooth part to stationarity.
//!
//! Problems implement the [`Problem`] trait (cost, gradient, constraints,
//! Jacobian products, and the boxes `C` and `D`); the solvers never see
//! anything else, so the derivative backend is entirely the caller's
//! business. Acceleration is pluggable through the [`Direction`] trait,
//! with L-BFGS, Anderson acceleration, and a plain fallback provided.
//!
//! ```
//! use pangolin::{AlmParams, AlmSolver, Bounds, FunctionalProblem,
//!                LbfgsDirection, LbfgsParams, PanocParams, PanocSolver};
//!
//! // minimize ½‖x‖²  s.t.  x₀ + x₁ = 1,  x ∈ [-1, 1]²
//! let mut problem = FunctionalProblem::new(
//!     Bounds::new(vec![-1.0, -1.0], vec![1.0, 1.0]).unwrap(),
//!     Bounds::zero(1),
//! );
//! problem.cost = Box::new(|x| 0.5 * (x[0] * x[0] + x[1] * x[1]));
//! problem.grad = Box::new(|x, g| g.copy_from_slice(x));
//! problem.constraints = Box::new(|x, g| g[0] = x[0] + x[1] - 1.0);
//! problem.constraints_jac_tvec = Box::new(|_, v, out| {
//!     out[0] = v[0];
//!     out[1] = v[0];
//! });
//!
//! let direction = LbfgsDirection::new(LbfgsParams::default()).unwrap();
//! let inner = PanocSolver::new(PanocParams::default(), direction).unwrap();
//! let mut solver = AlmSolver::new(AlmParams::default(), inner).unwrap();
//!
//! let mut x = [0.0, 0.0];
//! let mut y = [0.0];
//! let stats = solver.solve(&problem, &mut x, &mut y).unwrap();
//! assert!(stats.status.is_converged());
//! assert!((x[0] - 0.5).abs() < 1e-4 && (x[1] - 0.5).abs() < 1e-4);
//! ```

pub mod alm;
pub mod bounds;
pub mod direction;
pub mod error;
pub mod float;
mod guard;
pub mod lagrangian;
pub mod linalg;
pub mod lipschitz;
pub mod panoc;
pub mod problem;
pub mod prox;
pub mod qr;
pub mod stop;

pub use alm::{AlmParams, AlmSolver, AlmStats, InnerStatsSum};
pub use bounds::Bounds;
pub use direction::{
    AndersonAccel, AndersonDirection, AndersonParams, CbfgsParams, Direction, Lbfgs,
    LbfgsDirection, LbfgsParams, NoDirection,
};
pub use error::SolverError;
pub use float::Float;
pub use lipschitz::LipschitzParams;
pub use panoc::{
    InnerSolveOptions, PanocParams, PanocSolver, PanocStats, ProgressCallback, ProgressInfo,
};
pub use problem::{FunctionalProblem, Problem};
pub use prox::{prox_step, L1Norm, L1NormWeighted, NuclearNorm, Proximable};
pub use qr::LimitedMemoryQr;
pub use stop::{SolverStatus, StopCrit, StopSignal};
