//! Damped/undamped Newton iteration on a user-supplied residual + Jacobian
//! action, over an abstract vector space.

use crate::linear_solver::LinearSolver;
use crate::vector::VectorOps;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewtonOptions {
    pub tol: f64,
    pub max_iter: usize,
    pub linesearch: bool,
    pub verbose: bool,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self {
            tol: 1e-8,
            max_iter: 50,
            linesearch: true,
            verbose: false,
        }
    }
}

/// How a Newton run ended. `Converged` is the only non-fatal success;
/// `NonFinite` is the only variant the continuation loop treats as fatal
/// rather than a step rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NewtonStatus {
    Converged,
    MaxIterations,
    LinearSolveFailed,
    NonFinite,
}

#[derive(Clone, Debug)]
pub struct NewtonOutcome<V> {
    pub x: V,
    pub history: Vec<f64>,
    pub status: NewtonStatus,
    pub iterations: usize,
}

impl<V> NewtonOutcome<V> {
    pub fn converged(&self) -> bool {
        self.status == NewtonStatus::Converged
    }
}

const MAX_LINESEARCH_HALVINGS: usize = 10;

/// `newton(F, J, x0, opts, normFn?) -> (x*, history, flag)`.
///
/// `jacobian(x, v)` evaluates the action of the Jacobian of `residual` at
/// `x` on the vector `v`; this lets both dense (via [`crate::linear_solver::direct::DirectSolver`],
/// which assembles the matrix from this action) and Krylov solvers share one
/// signature.
pub fn newton<V, R, J, L>(
    residual: R,
    jacobian: J,
    x0: V,
    opts: &NewtonOptions,
    linear_solver: &mut L,
    norm: Option<&dyn Fn(&V) -> f64>,
) -> NewtonOutcome<V>
where
    V: VectorOps,
    R: Fn(&V) -> V,
    J: Fn(&V, &V) -> V,
    L: LinearSolver<V>,
{
    let norm_of = |r: &V| norm.map_or_else(|| r.norm2(), |f| f(r));

    let mut x = x0;
    let mut history = Vec::new();
    let mut iterations = 0usize;

    loop {
        let r = residual(&x);
        if !r.is_finite() {
            return NewtonOutcome {
                x,
                history,
                status: NewtonStatus::NonFinite,
                iterations,
            };
        }
        let n = norm_of(&r);
        history.push(n);
        if opts.verbose {
            eprintln!("newton: iter {iterations} |r| = {n:e}");
        }
        if n <= opts.tol {
            return NewtonOutcome {
                x,
                history,
                status: NewtonStatus::Converged,
                iterations,
            };
        }
        if iterations >= opts.max_iter {
            return NewtonOutcome {
                x,
                history,
                status: NewtonStatus::MaxIterations,
                iterations,
            };
        }

        let apply = |v: &V| jacobian(&x, v);
        let lin = linear_solver.solve(&apply, &r);
        if !lin.converged {
            return NewtonOutcome {
                x,
                history,
                status: NewtonStatus::LinearSolveFailed,
                iterations,
            };
        }
        let delta = lin.x;
        iterations += 1;

        if opts.linesearch {
            let mut alpha = 1.0;
            let mut halvings = 0;
            loop {
                let mut x_try = x.clone();
                x_try.axpy(-alpha, &delta);
                let r_try = residual(&x_try);
                let n_try = norm_of(&r_try);
                if n_try < n || halvings >= MAX_LINESEARCH_HALVINGS {
                    x = x_try;
                    break;
                }
                alpha *= 0.5;
                halvings += 1;
            }
        } else {
            x.axpy(-1.0, &delta);
        }
    }
}
