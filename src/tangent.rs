//! Predictor producing a unit tangent in (x, p)-space.

use crate::bordering::{solve_bordered, BorderedRhs};
use crate::linear_solver::LinearSolver;
use crate::vector::VectorOps;
use serde::{Deserialize, Serialize};

/// `(dx, dp)` satisfying the arclength normalisation
/// `theta * ||dx||^2 / N + (1 - theta) * dp^2 = 1`.
#[derive(Clone, Debug)]
pub struct Tangent<V> {
    pub dx: V,
    pub dp: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TangentAlgorithm {
    Secant,
    Bordered,
}

/// Finite-difference step used for `dF/dp` throughout the crate.
/// Exposed here as a named constant rather than baked into call sites.
pub const DFDP_FD_STEP: f64 = 1e-9;

/// Weighted inner product the arclength normalisation and orientation rule
/// are both defined against: `theta * <a.dx, b.dx> / N + (1-theta) * a.dp * b.dp`.
pub fn weighted_inner<V: VectorOps>(a: &Tangent<V>, b: &Tangent<V>, theta: f64, n_dim: usize) -> f64 {
    theta * a.dx.dot(&b.dx) / (n_dim as f64) + (1.0 - theta) * a.dp * b.dp
}

fn normalise<V: VectorOps>(mut t: Tangent<V>, theta: f64, n_dim: usize) -> Tangent<V> {
    let norm = weighted_inner(&t, &t, theta, n_dim).sqrt();
    if norm > 0.0 {
        t.dx.scale(1.0 / norm);
        t.dp /= norm;
    }
    t
}

/// Flip the sign of `new` if it points against `prev` (no backtracking;
/// `<t_k, t_{k-1}> > 0`).
fn orient<V: VectorOps>(mut new: Tangent<V>, prev: &Tangent<V>, theta: f64, n_dim: usize) -> Tangent<V> {
    if weighted_inner(&new, prev, theta, n_dim) < 0.0 {
        new.dx.scale(-1.0);
        new.dp = -new.dp;
    }
    new
}

/// Secant predictor: `dx = (x_k - x_{k-1}) / ds`, `dp = (p_k - p_{k-1}) / ds`.
pub fn secant_tangent<V: VectorOps>(x_k: &V, p_k: f64, x_prev: &V, p_prev: f64, ds_prev: f64, prev: &Tangent<V>, theta: f64, n_dim: usize) -> Tangent<V> {
    let mut dx = x_k.clone();
    dx.axpby(1.0, x_prev, -1.0);
    dx.scale(-1.0 / ds_prev);
    let dp = (p_k - p_prev) / ds_prev;
    let t = Tangent { dx, dp };
    orient(normalise(t, theta, n_dim), prev, theta, n_dim)
}

/// Bordered predictor: solves the augmented system bordered around
/// the previous tangent `(dx0, dp0)` via the bordering lemma, with `dF/dp`
/// obtained by forward finite difference.
#[allow(clippy::too_many_arguments)]
pub fn bordered_tangent<V, JA, DFDP, L>(
    jac_action: &JA,
    f_at: &DFDP,
    x: &V,
    p: f64,
    prev: &Tangent<V>,
    theta: f64,
    n_dim: usize,
    linear_solver: &mut L,
) -> Tangent<V>
where
    V: VectorOps,
    JA: Fn(&V) -> V,
    DFDP: Fn(&V, f64) -> V,
    L: LinearSolver<V>,
{
    let f0 = f_at(x, p);
    let mut dfdp = f_at(x, p + DFDP_FD_STEP);
    dfdp.axpby(1.0 / DFDP_FD_STEP, &f0, -1.0 / DFDP_FD_STEP);

    let zero = f0.zeros_like();
    let sol = solve_bordered(jac_action, &dfdp, &prev.dx, prev.dp, theta, n_dim, BorderedRhs { f: &zero, g: 1.0 }, linear_solver);
    let t = Tangent { dx: sol.dx, dp: sol.dp };
    orient(normalise(t, theta, n_dim), prev, theta, n_dim)
}
