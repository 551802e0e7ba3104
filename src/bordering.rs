//! The bordering lemma: solves a bordered
//! `(N+1) x (N+1)` linear system as two plain `N x N` solves plus a scalar
//! back-substitution, instead of assembling the augmented matrix. This is
//! shared by the bordered tangent algorithm ([`crate::tangent`]) and the
//! continuation corrector ([`crate::continuation`]), and preserves whatever
//! preconditioner structure the caller's linear solver has on `J` — the
//! whole point of avoiding the augmented-matrix formulation.

use crate::linear_solver::LinearSolver;
use crate::vector::VectorOps;

/// Right-hand side of the bordered system `[J dFdp; theta*dxᵀ/N (1-theta)*dp][u; v] = [f; g]`.
pub struct BorderedRhs<'a, V> {
    pub f: &'a V,
    pub g: f64,
}

pub struct BorderedSolution<V> {
    pub dx: V,
    pub dp: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// Solve the bordered system via the bordering lemma: `J u = f`, `J v = dFdp`,
/// then `dp = (g - theta*<u,dx>/N) / ((1-theta)*dp_prev - theta*<v,dx>/N)`,
/// `dx = u - dp * v`.
#[allow(clippy::too_many_arguments)]
pub fn solve_bordered<V, JA, L>(
    jac_action: &JA,
    dfdp: &V,
    prev_dx: &V,
    prev_dp: f64,
    theta: f64,
    n_dim: usize,
    rhs: BorderedRhs<'_, V>,
    linear_solver: &mut L,
) -> BorderedSolution<V>
where
    V: VectorOps,
    JA: Fn(&V) -> V,
    L: LinearSolver<V>,
{
    let u_outcome = linear_solver.solve(jac_action, rhs.f);
    let v_outcome = linear_solver.solve(jac_action, dfdp);
    let iterations = u_outcome.iterations + v_outcome.iterations;
    if !u_outcome.converged || !v_outcome.converged {
        return BorderedSolution {
            dx: rhs.f.zeros_like(),
            dp: 0.0,
            converged: false,
            iterations,
        };
    }
    let u = u_outcome.x;
    let v = v_outcome.x;
    let n = n_dim as f64;
    let denom = (1.0 - theta) * prev_dp - theta * v.dot(prev_dx) / n;
    if denom.abs() < 1e-300 {
        return BorderedSolution {
            dx: rhs.f.zeros_like(),
            dp: 0.0,
            converged: false,
            iterations,
        };
    }
    let dp = (rhs.g - theta * u.dot(prev_dx) / n) / denom;
    let mut dx = u;
    dx.axpy(-dp, &v);
    BorderedSolution {
        dx,
        dp,
        converged: true,
        iterations,
    }
}
