//! Linear-solver abstraction bridging dense factorisation and iterative
//! Krylov methods.
//!
//! Every solver in this module is driven through a single action-only
//! calling convention: `solve(apply, b)`, where `apply` evaluates the
//! Jacobian's action on a vector. [`direct::DirectSolver`] assembles a
//! concrete dense matrix from that action (one column per unit vector)
//! before factorising, so it still satisfies the design "J must be a
//! concrete matrix" requirement while sharing one trait with the
//! matrix-free [`gmres::GmresSolver`].

pub mod direct;
pub mod gmres;

use crate::vector::VectorOps;

/// Result of one linear solve: the (possibly non-converged) iterate,
/// whether it met tolerance, and how many iterations/factorisations it took.
#[derive(Clone, Debug)]
pub struct LinearSolveOutcome<V> {
    pub x: V,
    pub converged: bool,
    pub iterations: usize,
}

/// `solve(J, b)` and `solve(J, b, sigma)` for shifted systems.
///
/// `J` is never passed explicitly; it is implicit in `apply`, the closure
/// evaluating `J · v` for any `v`. Implementors that need a concrete matrix
/// (direct factorisation) build it from `apply` themselves.
pub trait LinearSolver<V: VectorOps> {
    fn solve(&mut self, apply: &dyn Fn(&V) -> V, b: &V) -> LinearSolveOutcome<V>;

    /// Solve `(J + sigma*I) x = b`. The default implementation wraps `apply`
    /// in a shifted operator, matching the design "no matrix is formed" rule
    /// for iterative solvers. [`direct::DirectSolver`] overrides this to
    /// take the `sigma == 0` fast path and to add the shift directly to the
    /// assembled matrix's diagonal.
    fn solve_shifted(&mut self, apply: &dyn Fn(&V) -> V, b: &V, sigma: f64) -> LinearSolveOutcome<V> {
        if sigma == 0.0 {
            return self.solve(apply, b);
        }
        let shifted = |v: &V| {
            let mut y = apply(v);
            y.axpy(sigma, v);
            y
        };
        self.solve(&shifted, b)
    }
}
