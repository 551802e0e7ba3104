//! Periodic-orbit collocation by the trapezoidal rule plus phase condition.
//!
//! Unlike the rest of the crate this driver is monomorphised over `f64`
//! rather than generic over [`crate::vector::VectorOps`]: the block layout
//! of the unknown (`M` time slices of length `N` plus the period `T`) is
//! assembled and sliced directly against `nalgebra::DVector`, and the sparse
//! Jacobian is built with `nalgebra_sparse`, matching the workspace's own
//! dependency on that crate.

use crate::tangent::DFDP_FD_STEP;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

/// The flat unknown `u = (U[:,1], ..., U[:,M], T)`, length `M*N + 1`.
/// Invariant: `N = (u.len() - 1) / M` exactly.
#[derive(Clone, Debug)]
pub struct PeriodicOrbitState {
    u: DVector<f64>,
    m: usize,
    n: usize,
}

impl PeriodicOrbitState {
    pub fn new(u: DVector<f64>, m: usize) -> Self {
        assert!((u.len() - 1) % m == 0, "state length minus one must divide evenly by m");
        let n = (u.len() - 1) / m;
        Self { u, m, n }
    }

    pub fn from_columns(columns: &[DVector<f64>], period: f64) -> Self {
        let m = columns.len();
        let n = columns[0].len();
        let mut u = DVector::zeros(m * n + 1);
        for (i, col) in columns.iter().enumerate() {
            u.rows_mut(i * n, n).copy_from(col);
        }
        u[m * n] = period;
        Self { u, m, n }
    }

    pub fn as_vector(&self) -> &DVector<f64> {
        &self.u
    }

    pub fn period(&self) -> f64 {
        self.u[self.m * self.n]
    }

    pub fn column(&self, i: usize) -> DVector<f64> {
        self.u.rows(i * self.n, self.n).clone_owned()
    }
}

/// Residual, matrix-free Jacobian action, and sparse Jacobian for a periodic
/// orbit of the autonomous system `xdot = f(x)`, discretised on `m` time
/// slices of dimension `n` with phase condition `<U[:,1] - x_pi, phi> = 0`.
pub struct PeriodicOrbitTrap<F, J> {
    f: F,
    jacobian: J,
    phi: DVector<f64>,
    x_pi: DVector<f64>,
    m: usize,
    n: usize,
    /// Shift on the periodicity block `(1, 1)`, defaults to `1.0`; exposed so
    /// shifted solves can reuse this
    /// assembly.
    pub gamma: f64,
}

impl<F, J> PeriodicOrbitTrap<F, J>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
    J: Fn(&DVector<f64>, &DVector<f64>) -> DVector<f64>,
{
    pub fn new(f: F, jacobian: J, phi: DVector<f64>, x_pi: DVector<f64>, m: usize) -> Self {
        let n = phi.len();
        Self {
            f,
            jacobian,
            phi,
            x_pi,
            m,
            n,
            gamma: 1.0,
        }
    }

    fn mesh_spacing(&self, state: &PeriodicOrbitState) -> f64 {
        state.period() / (self.m as f64)
    }

    /// Residual of length `m*n + 1`.
    pub fn residual(&self, state: &PeriodicOrbitState) -> DVector<f64> {
        let h = self.mesh_spacing(state);
        let mut r = DVector::zeros(self.m * self.n + 1);

        let periodicity = state.column(self.m - 1) - state.column(0);
        r.rows_mut(0, self.n).copy_from(&periodicity);

        for i in 1..self.m {
            let ui = state.column(i);
            let ui_prev = state.column(i - 1);
            let fi = (self.f)(&ui);
            let fi_prev = (self.f)(&ui_prev);
            let block = &ui - &ui_prev - (h / 2.0) * (&fi + &fi_prev);
            r.rows_mut(i * self.n, self.n).copy_from(&block);
        }

        let phase = (state.column(0) - &self.x_pi).dot(&self.phi);
        r[self.m * self.n] = phase;
        r
    }

    /// Matrix-free Jacobian action on `(delta_u, delta_t)`, `du` laid out
    /// identically to the state: block recurrence with
    /// `J(U[:,i]) du[:,i]` replacing `F` evaluations, plus a one-sided
    /// finite-difference column for `d(residual)/dT` (step `1e-9`, the same
    /// `DFDP_FD_STEP` used for `dF/dp` elsewhere in the crate).
    pub fn jacobian_action(&self, state: &PeriodicOrbitState, du: &DVector<f64>) -> DVector<f64> {
        let h = self.mesh_spacing(state);
        let delta_t = du[self.m * self.n];
        let d_col = |i: usize| du.rows(i * self.n, self.n).clone_owned();
        let mut out = DVector::zeros(self.m * self.n + 1);

        let d_periodicity = d_col(self.m - 1) - self.gamma * d_col(0);
        out.rows_mut(0, self.n).copy_from(&d_periodicity);

        let h_pert = (state.period() + DFDP_FD_STEP) / (self.m as f64);
        for i in 1..self.m {
            let ui = state.column(i);
            let ui_prev = state.column(i - 1);
            let dui = d_col(i);
            let dui_prev = d_col(i - 1);

            let jui = (self.jacobian)(&ui, &dui);
            let jui_prev = (self.jacobian)(&ui_prev, &dui_prev);
            let mut block = &dui - &dui_prev - (h / 2.0) * (&jui + &jui_prev);

            if delta_t != 0.0 {
                let fi = (self.f)(&ui);
                let fi_prev = (self.f)(&ui_prev);
                let base = &ui - &ui_prev - (h / 2.0) * (&fi + &fi_prev);
                let pert = &ui - &ui_prev - (h_pert / 2.0) * (&fi + &fi_prev);
                let d_dt = (&pert - &base) / DFDP_FD_STEP;
                block += delta_t * d_dt;
            }
            out.rows_mut(i * self.n, self.n).copy_from(&block);
        }

        out[self.m * self.n] = d_col(0).dot(&self.phi);
        out
    }

    /// Assemble the dense `n x n` Jacobian block of `f` at `x` from its
    /// action, one unit vector at a time (the same pattern
    /// [`crate::linear_solver::direct::DirectSolver`] uses to turn an
    /// action into a concrete matrix).
    fn dense_block(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let mut block = DMatrix::zeros(self.n, self.n);
        for k in 0..self.n {
            let mut e = DVector::zeros(self.n);
            e[k] = 1.0;
            let col = (self.jacobian)(x, &e);
            block.set_column(k, &col);
        }
        block
    }

    /// Block-sparse `(m*n + 1) x (m*n + 1)` Jacobian assembly: block
    /// `(1,1) = -gamma*I`, `(1,M) = I`, `(i,i) = I - (h/2) J_i`
    /// and `(i,i-1) = -I - (h/2) J_{i-1}` for `i >= 2`, a finite-difference
    /// last column, and `phi` in the last row.
    pub fn sparse_jacobian(&self, state: &PeriodicOrbitState) -> CsrMatrix<f64> {
        let size = self.m * self.n + 1;
        let h = self.mesh_spacing(state);
        let h_pert = (state.period() + DFDP_FD_STEP) / (self.m as f64);
        let mut coo = CooMatrix::new(size, size);

        for k in 0..self.n {
            coo.push(k, k, -self.gamma);
        }
        for k in 0..self.n {
            coo.push(k, (self.m - 1) * self.n + k, 1.0);
        }

        for i in 1..self.m {
            let ui = state.column(i);
            let ui_prev = state.column(i - 1);
            let ji = self.dense_block(&ui);
            let ji_prev = self.dense_block(&ui_prev);
            let row_base = i * self.n;

            for r in 0..self.n {
                for c in 0..self.n {
                    let mut val = -0.5 * h * ji[(r, c)];
                    if r == c {
                        val += 1.0;
                    }
                    if val != 0.0 {
                        coo.push(row_base + r, i * self.n + c, val);
                    }
                }
            }
            for r in 0..self.n {
                for c in 0..self.n {
                    let mut val = -0.5 * h * ji_prev[(r, c)];
                    if r == c {
                        val -= 1.0;
                    }
                    if val != 0.0 {
                        coo.push(row_base + r, (i - 1) * self.n + c, val);
                    }
                }
            }

            let fi = (self.f)(&ui);
            let fi_prev = (self.f)(&ui_prev);
            let base = &ui - &ui_prev - (h / 2.0) * (&fi + &fi_prev);
            let pert = &ui - &ui_prev - (h_pert / 2.0) * (&fi + &fi_prev);
            let d_dt = (&pert - &base) / DFDP_FD_STEP;
            for r in 0..self.n {
                if d_dt[r] != 0.0 {
                    coo.push(row_base + r, size - 1, d_dt[r]);
                }
            }
        }

        for k in 0..self.n {
            coo.push(size - 1, k, self.phi[k]);
        }
        coo.push(size - 1, size - 1, 0.0);

        CsrMatrix::from(&coo)
    }
}

/// Dense multiply of a [`CsrMatrix`] against a [`DVector`], used to cross
/// check [`PeriodicOrbitTrap::sparse_jacobian`] against
/// [`PeriodicOrbitTrap::jacobian_action`] for agreement between the two
/// assemblies.
pub fn spmv(csr: &CsrMatrix<f64>, v: &DVector<f64>) -> DVector<f64> {
    let mut out = DVector::zeros(csr.nrows());
    for (row_idx, row) in csr.row_iter().enumerate() {
        let mut acc = 0.0;
        for (&col, &val) in row.col_indices().iter().zip(row.values().iter()) {
            acc += val * v[col];
        }
        out[row_idx] = acc;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    // Harmonic oscillator xdot = y, ydot = -x; orbit x = cos(t), y = -sin(t),
    // period 2*pi.
    fn f(x: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![x[1], -x[0]])
    }
    fn jac(_x: &DVector<f64>, v: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![v[1], -v[0]])
    }

    fn exact_orbit(m: usize) -> PeriodicOrbitState {
        let period = 2.0 * PI;
        let columns: Vec<DVector<f64>> = (0..m)
            .map(|i| {
                let t = period * (i as f64) / (m as f64);
                DVector::from_vec(vec![t.cos(), -t.sin()])
            })
            .collect();
        PeriodicOrbitState::from_columns(&columns, period)
    }

    #[test]
    fn residual_is_small_near_the_exact_orbit() {
        let m = 40;
        let phi = DVector::from_vec(vec![0.0, 1.0]);
        let x_pi = DVector::from_vec(vec![1.0, 0.0]);
        let trap = PeriodicOrbitTrap::new(f, jac, phi, x_pi, m);
        let state = exact_orbit(m);
        let r = trap.residual(&state);
        assert!(r.amax() < 1e-2, "trapezoidal residual should be small near the exact orbit, got {}", r.amax());
        // phase condition is exact: U[:,1] == x_pi by construction
        assert_relative_eq!(r[m * 2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn matrix_free_and_sparse_jacobians_agree() {
        let m = 40;
        let phi = DVector::from_vec(vec![0.0, 1.0]);
        let x_pi = DVector::from_vec(vec![1.0, 0.0]);
        let trap = PeriodicOrbitTrap::new(f, jac, phi, x_pi, m);
        let state = exact_orbit(m);

        let size = m * 2 + 1;
        let mut du = DVector::zeros(size);
        for k in 0..size {
            du[k] = ((k + 1) as f64 * 0.37).sin();
        }

        let action = trap.jacobian_action(&state, &du);
        let sparse = trap.sparse_jacobian(&state);
        let via_sparse = spmv(&sparse, &du);

        for k in 0..size {
            assert_relative_eq!(action[k], via_sparse[k], epsilon = 1e-6);
        }
    }

    #[test]
    fn matrix_free_and_sparse_jacobians_agree_under_a_shifted_periodicity_block() {
        let m = 40;
        let phi = DVector::from_vec(vec![0.0, 1.0]);
        let x_pi = DVector::from_vec(vec![1.0, 0.0]);
        let mut trap = PeriodicOrbitTrap::new(f, jac, phi, x_pi, m);
        trap.gamma = 0.6;
        let state = exact_orbit(m);

        let size = m * 2 + 1;
        let mut du = DVector::zeros(size);
        for k in 0..size {
            du[k] = ((k + 1) as f64 * 0.37).sin();
        }

        let action = trap.jacobian_action(&state, &du);
        let sparse = trap.sparse_jacobian(&state);
        let via_sparse = spmv(&sparse, &du);

        for k in 0..size {
            assert_relative_eq!(action[k], via_sparse[k], epsilon = 1e-6);
        }
    }

    // End-to-end scenario: Newton on the full collocation problem, started
    // from a perturbed circle, must converge to the analytic orbit with a
    // tiny periodicity residual.
    #[test]
    fn periodic_orbit_toy_converges_to_the_analytic_circle() {
        use crate::linear_solver::direct::DirectSolver;
        use crate::newton::{newton, NewtonOptions};
        use crate::vector::DenseVector;

        let m = 40;
        let phi = DVector::from_vec(vec![0.0, 1.0]);
        let x_pi = DVector::from_vec(vec![1.0, 0.0]);
        let trap = PeriodicOrbitTrap::new(f, jac, phi, x_pi, m);

        // Slightly perturbed circle as the initial guess (amplitude 0.9
        // instead of 1.0), T = 6.28.
        let period_guess = 6.28;
        let columns: Vec<DVector<f64>> = (0..m)
            .map(|i| {
                let t = period_guess * (i as f64) / (m as f64);
                DVector::from_vec(vec![0.9 * t.cos(), -0.9 * t.sin()])
            })
            .collect();
        let initial = PeriodicOrbitState::from_columns(&columns, period_guess);

        let residual = |x: &DenseVector| DenseVector(trap.residual(&PeriodicOrbitState::new(x.0.clone(), m)));
        let jacobian = |x: &DenseVector, v: &DenseVector| DenseVector(trap.jacobian_action(&PeriodicOrbitState::new(x.0.clone(), m), &v.0));

        let opts = NewtonOptions {
            tol: 1e-8,
            max_iter: 50,
            linesearch: true,
            verbose: false,
        };
        let mut solver = DirectSolver::new();
        let out = newton(residual, jacobian, DenseVector(initial.as_vector().clone()), &opts, &mut solver, None);

        assert!(out.converged(), "periodic orbit Newton solve should converge, status was {:?}", out.status);

        let converged_state = PeriodicOrbitState::new(out.x.0.clone(), m);
        let period = converged_state.period();
        assert!((period - 2.0 * PI).abs() <= 1e-2, "converged period should be close to 2*pi, got {period}");

        let periodicity_gap = (converged_state.column(m - 1) - converged_state.column(0)).norm();
        assert!(periodicity_gap <= 1e-6, "periodicity residual should be tiny at convergence, got {periodicity_gap}");
    }
}
