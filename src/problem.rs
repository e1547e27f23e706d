//! The problem abstraction consumed by the solvers.

use crate::bounds::Bounds;
use crate::float::Float;
use crate::prox;

/// A smooth minimization problem with box and general constraints:
///
/// ```text
/// minimize    f(x)
/// subject to  x ∈ C,  g(x) ∈ D
/// ```
///
/// with `x ∈ ℝⁿ`, `g : ℝⁿ → ℝᵐ`, and rectangular boxes `C`, `D`. The
/// solver holds a non-owning reference for the duration of one solve and
/// only ever calls `&self` methods, so a problem can be shared between
/// sequential solves. All outputs must be finite for feasible inputs;
/// non-finite values terminate the solve with
/// [`SolverStatus::NotFinite`](crate::SolverStatus::NotFinite).
///
/// The trait is object safe, so `&dyn Problem<F>` works where a concrete
/// type is inconvenient.
pub trait Problem<F: Float> {
    /// Number of decision variables.
    fn n(&self) -> usize;

    /// Number of general constraints (dimension of `g`).
    fn m(&self) -> usize;

    /// Cost `f(x)`.
    fn cost(&self, x: &[F]) -> F;

    /// Cost and gradient: writes `∇f(x)` to `grad` and returns `f(x)`.
    fn cost_grad(&self, x: &[F], grad: &mut [F]) -> F;

    /// Constraint values: writes `g(x)` to `g`.
    fn constraints(&self, x: &[F], g: &mut [F]);

    /// Constraint-Jacobian–transpose–vector product: writes `∇g(x)ᵀ v`
    /// to `out`.
    fn constraints_jac_tvec(&self, x: &[F], v: &[F], out: &mut [F]);

    /// The box `C` containing the decision variables.
    fn box_c(&self) -> &Bounds<F>;

    /// The box `D` containing the constraint values.
    fn box_d(&self) -> &Bounds<F>;

    /// One proximal gradient step on the nonsmooth part of the problem:
    /// `x̂ = prox_{γh}(x - γ·grad)`, `p = x̂ - x`, returning `h(x̂)`.
    ///
    /// The default handles `h = δ_C`; override to add structure such as an
    /// ℓ₁ term on top of the box.
    fn prox_grad_step(&self, gamma: F, x: &[F], grad: &[F], x_hat: &mut [F], p: &mut [F]) -> F {
        self.box_c().proj_grad_step(gamma, x, grad, x_hat, p)
    }

    /// Project a multiplier estimate onto the dual box implied by `D`,
    /// clamping magnitudes to `max`.
    fn proj_multipliers(&self, y: &mut [F], max: F) {
        self.box_d().proj_multipliers(y, max)
    }

    /// Gradient of the Lagrangian, `∇f(x) + ∇g(x)ᵀ y`, written to `grad`
    /// with `work_n` as scratch for the Jacobian product.
    fn grad_lagrangian(&self, x: &[F], y: &[F], grad: &mut [F], work_n: &mut [F]) {
        let _ = self.cost_grad(x, grad);
        if self.m() > 0 {
            self.constraints_jac_tvec(x, y, work_n);
            for i in 0..grad.len() {
                grad[i] = grad[i] + work_n[i];
            }
        }
    }
}

impl<F: Float, P: Problem<F> + ?Sized> Problem<F> for &P {
    fn n(&self) -> usize {
        (**self).n()
    }
    fn m(&self) -> usize {
        (**self).m()
    }
    fn cost(&self, x: &[F]) -> F {
        (**self).cost(x)
    }
    fn cost_grad(&self, x: &[F], grad: &mut [F]) -> F {
        (**self).cost_grad(x, grad)
    }
    fn constraints(&self, x: &[F], g: &mut [F]) {
        (**self).constraints(x, g)
    }
    fn constraints_jac_tvec(&self, x: &[F], v: &[F], out: &mut [F]) {
        (**self).constraints_jac_tvec(x, v, out)
    }
    fn box_c(&self) -> &Bounds<F> {
        (**self).box_c()
    }
    fn box_d(&self) -> &Bounds<F> {
        (**self).box_d()
    }
    fn prox_grad_step(&self, gamma: F, x: &[F], grad: &[F], x_hat: &mut [F], p: &mut [F]) -> F {
        (**self).prox_grad_step(gamma, x, grad, x_hat, p)
    }
    fn proj_multipliers(&self, y: &mut [F], max: F) {
        (**self).proj_multipliers(y, max)
    }
    fn grad_lagrangian(&self, x: &[F], y: &[F], grad: &mut [F], work_n: &mut [F]) {
        (**self).grad_lagrangian(x, y, grad, work_n)
    }
}

/// Closure type for the cost.
pub type CostFn<F> = Box<dyn Fn(&[F]) -> F>;
/// Closure type for the cost gradient.
pub type GradFn<F> = Box<dyn Fn(&[F], &mut [F])>;
/// Closure type for the constraint values.
pub type ConstrFn<F> = Box<dyn Fn(&[F], &mut [F])>;
/// Closure type for the constraint-Jacobian–transpose–vector product.
pub type ConstrJacTvecFn<F> = Box<dyn Fn(&[F], &[F], &mut [F])>;

/// A [`Problem`] assembled from closures, convenient for small problems
/// and tests.
///
/// Constraint callbacks default to no-ops for `m = 0`. An optional scalar
/// ℓ₁ weight adds `λ‖x‖₁` to the nonsmooth term through the fused
/// box-plus-soft-threshold step.
pub struct FunctionalProblem<F: Float> {
    /// Decision-variable box `C`.
    pub c: Bounds<F>,
    /// Constraint box `D`.
    pub d: Bounds<F>,
    /// Cost `f(x)`.
    pub cost: CostFn<F>,
    /// Gradient `∇f(x)`.
    pub grad: GradFn<F>,
    /// Constraints `g(x)`.
    pub constraints: ConstrFn<F>,
    /// Product `∇g(x)ᵀ v`.
    pub constraints_jac_tvec: ConstrJacTvecFn<F>,
    /// Scalar ℓ₁ regularization weight (zero disables).
    pub l1_reg: F,
}

impl<F: Float> FunctionalProblem<F> {
    /// Create a problem over the boxes `c` and `d` with zero cost and
    /// no-op constraints; fill in the closure fields afterwards.
    pub fn new(c: Bounds<F>, d: Bounds<F>) -> Self {
        FunctionalProblem {
            c,
            d,
            cost: Box::new(|_| F::zero()),
            grad: Box::new(|_, g| g.iter_mut().for_each(|v| *v = F::zero())),
            constraints: Box::new(|_, _| {}),
            constraints_jac_tvec: Box::new(|_, _, _| {}),
            l1_reg: F::zero(),
        }
    }
}

impl<F: Float> Problem<F> for FunctionalProblem<F> {
    fn n(&self) -> usize {
        self.c.len()
    }

    fn m(&self) -> usize {
        self.d.len()
    }

    fn cost(&self, x: &[F]) -> F {
        (self.cost)(x)
    }

    fn cost_grad(&self, x: &[F], grad: &mut [F]) -> F {
        (self.grad)(x, grad);
        (self.cost)(x)
    }

    fn constraints(&self, x: &[F], g: &mut [F]) {
        (self.constraints)(x, g)
    }

    fn constraints_jac_tvec(&self, x: &[F], v: &[F], out: &mut [F]) {
        (self.constraints_jac_tvec)(x, v, out)
    }

    fn box_c(&self) -> &Bounds<F> {
        &self.c
    }

    fn box_d(&self) -> &Bounds<F> {
        &self.d
    }

    fn prox_grad_step(&self, gamma: F, x: &[F], grad: &[F], x_hat: &mut [F], p: &mut [F]) -> F {
        if self.l1_reg > F::zero() {
            prox::box_l1_step(&self.c, self.l1_reg, gamma, x, grad, x_hat, p)
        } else {
            self.c.proj_grad_step(gamma, x, grad, x_hat, p)
        }
    }
}
