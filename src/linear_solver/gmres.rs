//! Restarted GMRES: an iterative Krylov solver that only ever evaluates the
//! Jacobian's action, never assembling a matrix.
//!
//! Arnoldi process with modified Gram-Schmidt orthogonalisation, the
//! Hessenberg system kept triangular incrementally via Givens rotations, and
//! outer restarts once the Krylov basis reaches `krylov_dim`. Grounded on
//! the same Arnoldi + Givens-rotation + restart shape as
//! `ndarray-linalg`'s `krylov::gmres`, adapted to this crate's `VectorOps`.

use super::{LinearSolveOutcome, LinearSolver};
use crate::error::ContinuationError;
use crate::vector::VectorOps;
use serde::{Deserialize, Serialize};

/// Tolerances and restart/iteration budget for [`GmresSolver`].
#[derive(Clone, Serialize, Deserialize)]
pub struct GmresOptions {
    pub rtol: f64,
    pub atol: f64,
    pub krylov_dim: usize,
    pub max_iter: usize,
    pub restart: bool,
    pub verbose: bool,
}

impl Default for GmresOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-12,
            krylov_dim: 30,
            max_iter: 10,
            restart: true,
            verbose: false,
        }
    }
}

/// Restarted, optionally left/right preconditioned GMRES.
pub struct GmresSolver<V: VectorOps> {
    options: GmresOptions,
    left: Option<Box<dyn Fn(&V) -> V>>,
    right: Option<Box<dyn Fn(&V) -> V>>,
    last_converged: bool,
    last_iterations: usize,
}

impl<V: VectorOps> GmresSolver<V> {
    pub fn new(options: GmresOptions) -> Self {
        Self {
            options,
            left: None,
            right: None,
            last_converged: true,
            last_iterations: 0,
        }
    }

    /// [`ContinuationError::LinearSolveFailure`] if the last solve exceeded
    /// `max_iter` restarts without reaching tolerance, `None` otherwise.
    pub fn last_error(&self) -> Option<ContinuationError> {
        (!self.last_converged).then_some(ContinuationError::LinearSolveFailure {
            iterations: self.last_iterations,
        })
    }

    pub fn with_left_preconditioner(mut self, pc: impl Fn(&V) -> V + 'static) -> Self {
        self.left = Some(Box::new(pc));
        self
    }

    pub fn with_right_preconditioner(mut self, pc: impl Fn(&V) -> V + 'static) -> Self {
        self.right = Some(Box::new(pc));
        self
    }

    fn apply_left(&self, v: &V) -> V {
        match &self.left {
            Some(pc) => pc(v),
            None => v.clone(),
        }
    }

    fn apply_right(&self, v: &V) -> V {
        match &self.right {
            Some(pc) => pc(v),
            None => v.clone(),
        }
    }

    /// One restart cycle of Arnoldi + Givens-rotated least squares.
    /// Returns the updated iterate and the final (unpreconditioned, in the
    /// left-preconditioned sense) residual norm.
    fn cycle(&self, apply: &dyn Fn(&V) -> V, x0: &V, b: &V) -> (V, f64, usize) {
        let m = self.options.krylov_dim.min(b.len().max(1));
        let matvec = |v: &V| self.apply_left(&apply(&self.apply_right(v)));

        let ax0 = matvec(x0);
        let mut r0 = self.apply_left(b);
        r0.axpby(-1.0, &ax0, 1.0);
        let beta = r0.norm2();

        let mut basis: Vec<V> = Vec::with_capacity(m + 1);
        if beta > 0.0 {
            let mut v0 = r0.clone();
            v0.scale(1.0 / beta);
            basis.push(v0);
        } else {
            basis.push(r0.clone());
        }

        // Hessenberg matrix in dense column-major storage: h[j] is column j,
        // of length j + 2 (entries 0..=j+1).
        let mut h: Vec<Vec<f64>> = Vec::with_capacity(m);
        let mut cs: Vec<f64> = Vec::with_capacity(m);
        let mut sn: Vec<f64> = Vec::with_capacity(m);
        let mut g: Vec<f64> = vec![beta];

        let mut k_used = 0;
        for j in 0..m {
            k_used = j + 1;
            let mut w = matvec(&basis[j]);
            let mut col = vec![0.0; j + 2];
            for (i, vi) in basis.iter().enumerate().take(j + 1) {
                let hij = w.dot(vi);
                col[i] = hij;
                w.axpy(-hij, vi);
            }
            let hnext = w.norm2();
            col[j + 1] = hnext;

            // apply existing Givens rotations to the new column
            for i in 0..j {
                let (c, s) = (cs[i], sn[i]);
                let a = col[i];
                let b_ = col[i + 1];
                col[i] = c * a + s * b_;
                col[i + 1] = -s * a + c * b_;
            }
            // compute and apply the new rotation zeroing col[j+1]
            let (a, b_) = (col[j], col[j + 1]);
            let denom = (a * a + b_ * b_).sqrt();
            let (c, s) = if denom > 0.0 { (a / denom, b_ / denom) } else { (1.0, 0.0) };
            col[j] = c * a + s * b_;
            col[j + 1] = 0.0;
            cs.push(c);
            sn.push(s);

            let g_j = g[j];
            g.push(-s * g_j);
            g[j] = c * g_j;

            h.push(col);

            let residual = g[j + 1].abs();
            if residual <= self.options.atol + self.options.rtol * beta.max(1e-300) {
                break;
            }
            if hnext > 1e-14 {
                let mut v_next = w;
                v_next.scale(1.0 / hnext);
                basis.push(v_next);
            } else {
                // Krylov basis exhausted (happy breakdown): can't extend further
                break;
            }
        }

        // back-substitute the k_used x k_used upper-triangular system h*y = g
        let k = k_used;
        let mut y = vec![0.0; k];
        for i in (0..k).rev() {
            let mut sum = g[i];
            for j in (i + 1)..k {
                sum -= h[j][i] * y[j];
            }
            y[i] = if h[i][i].abs() > 1e-300 { sum / h[i][i] } else { 0.0 };
        }

        let mut z = x0.zeros_like();
        for (i, yi) in y.iter().enumerate() {
            z.axpy(*yi, &basis[i]);
        }
        let z = self.apply_right(&z);
        let mut x = x0.clone();
        x.axpby(1.0, &z, 1.0);

        let residual_norm = g[k].abs();
        (x, residual_norm, k)
    }
}

impl<V: VectorOps> LinearSolver<V> for GmresSolver<V> {
    fn solve(&mut self, apply: &dyn Fn(&V) -> V, b: &V) -> LinearSolveOutcome<V> {
        let mut x = b.zeros_like();
        let mut total_iters = 0usize;
        let beta0 = b.norm2();
        let outer_cycles = if self.options.restart { self.options.max_iter } else { 1 };

        for cycle_idx in 0..outer_cycles.max(1) {
            let (x_new, residual, iters) = self.cycle(apply, &x, b);
            x = x_new;
            total_iters += iters;
            if self.options.verbose {
                eprintln!("gmres: cycle {cycle_idx} residual {residual:e} (iters {iters})");
            }
            if residual <= self.options.atol + self.options.rtol * beta0.max(1e-300) {
                self.last_converged = true;
                self.last_iterations = total_iters;
                return LinearSolveOutcome {
                    x,
                    converged: true,
                    iterations: total_iters,
                };
            }
            if total_iters >= self.options.max_iter * self.options.krylov_dim {
                break;
            }
        }

        self.last_converged = false;
        self.last_iterations = total_iters;
        LinearSolveOutcome {
            x,
            converged: false,
            iterations: total_iters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear_solver::tests::check_solves_diagonal_system;
    use crate::vector::DenseVector;
    use approx::assert_relative_eq;

    #[test]
    fn solves_diagonal_system() {
        check_solves_diagonal_system(GmresSolver::<DenseVector>::new(GmresOptions::default()));
    }

    #[test]
    fn solves_larger_spd_system() {
        // J = tridiag(-1, 3, -1), size 20, b = ones
        let n = 20;
        let apply = move |v: &DenseVector| {
            let mut y = DenseVector::zeros(n);
            for i in 0..n {
                let mut val = 3.0 * v[i];
                if i > 0 {
                    val -= v[i - 1];
                }
                if i + 1 < n {
                    val -= v[i + 1];
                }
                y[i] = val;
            }
            y
        };
        let b = DenseVector::from_element(n, 1.0);
        let mut solver = GmresSolver::new(GmresOptions {
            krylov_dim: 20,
            max_iter: 5,
            rtol: 1e-10,
            atol: 1e-14,
            ..GmresOptions::default()
        });
        let outcome = solver.solve(&apply, &b);
        assert!(outcome.converged);
        let check = apply(&outcome.x);
        for i in 0..n {
            assert_relative_eq!(check[i], 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn shifted_matches_direct_diagonal_shift() {
        let mut solver = GmresSolver::<DenseVector>::new(GmresOptions::default());
        let outcome = solver.solve_shifted(&crate::linear_solver::tests::diag_apply, &DenseVector::from_vec(vec![10.0, 20.0]), 3.0);
        assert!(outcome.converged);
        assert_relative_eq!(outcome.x[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(outcome.x[1], 4.0, epsilon = 1e-6);
    }

    #[test]
    fn non_convergence_reports_flag_not_panic() {
        let mut solver = GmresSolver::<DenseVector>::new(GmresOptions {
            max_iter: 1,
            krylov_dim: 1,
            rtol: 1e-14,
            atol: 0.0,
            ..GmresOptions::default()
        });
        let n = 20;
        let apply = move |v: &DenseVector| {
            let mut y = DenseVector::zeros(n);
            for i in 0..n {
                let mut val = 3.0 * v[i];
                if i > 0 {
                    val -= v[i - 1];
                }
                if i + 1 < n {
                    val -= v[i + 1];
                }
                y[i] = val;
            }
            y
        };
        let b = DenseVector::from_element(n, 1.0);
        let outcome = solver.solve(&apply, &b);
        assert!(!outcome.converged);
        assert!(matches!(solver.last_error(), Some(ContinuationError::LinearSolveFailure { .. })));
    }

    #[test]
    fn last_error_is_none_after_a_converged_solve() {
        let mut solver = GmresSolver::<DenseVector>::new(GmresOptions::default());
        let _ = solver.solve(&crate::linear_solver::tests::diag_apply, &DenseVector::from_vec(vec![2.0, 4.0]));
        assert!(solver.last_error().is_none());
    }
}
