//! Direct linear solver: assembles a concrete dense matrix from the
//! Jacobian's action, one column per unit vector, then factorises with
//! `nalgebra`'s LU decomposition.

use super::{LinearSolveOutcome, LinearSolver};
use crate::error::ContinuationError;
use crate::vector::DenseVector;
use nalgebra::DMatrix;

/// Dense direct solver. Stateless between calls beyond its last assembled
/// matrix, kept only for diagnostics (`last_singular`).
#[derive(Default)]
pub struct DirectSolver {
    last_singular: bool,
}

impl DirectSolver {
    pub fn new() -> Self {
        Self { last_singular: false }
    }

    pub fn last_solve_singular(&self) -> bool {
        self.last_singular
    }

    /// [`ContinuationError::SingularMatrix`] if the last solve hit a singular
    /// pivot, `None` otherwise.
    pub fn last_error(&self) -> Option<ContinuationError> {
        self.last_singular.then_some(ContinuationError::SingularMatrix)
    }

    fn assemble(&self, apply: &dyn Fn(&DenseVector) -> DenseVector, n: usize) -> DMatrix<f64> {
        let mut jac = DMatrix::zeros(n, n);
        for j in 0..n {
            let mut e_j = DenseVector::zeros(n);
            e_j[j] = 1.0;
            let col = apply(&e_j);
            for i in 0..n {
                jac[(i, j)] = col[i];
            }
        }
        jac
    }

    fn factor_and_solve(&mut self, jac: DMatrix<f64>, b: &DenseVector) -> LinearSolveOutcome<DenseVector> {
        let rhs = nalgebra::DVector::from_column_slice(b.as_slice());
        match jac.lu().solve(&rhs) {
            Some(x) => {
                self.last_singular = false;
                LinearSolveOutcome {
                    x: DenseVector(x),
                    converged: true,
                    iterations: 1,
                }
            }
            None => {
                self.last_singular = true;
                LinearSolveOutcome {
                    x: b.clone(),
                    converged: false,
                    iterations: 1,
                }
            }
        }
    }
}

impl LinearSolver<DenseVector> for DirectSolver {
    fn solve(&mut self, apply: &dyn Fn(&DenseVector) -> DenseVector, b: &DenseVector) -> LinearSolveOutcome<DenseVector> {
        let jac = self.assemble(apply, b.len());
        self.factor_and_solve(jac, b)
    }

    fn solve_shifted(
        &mut self,
        apply: &dyn Fn(&DenseVector) -> DenseVector,
        b: &DenseVector,
        sigma: f64,
    ) -> LinearSolveOutcome<DenseVector> {
        if sigma == 0.0 {
            return self.solve(apply, b);
        }
        let n = b.len();
        let mut jac = self.assemble(apply, n);
        for i in 0..n {
            jac[(i, i)] += sigma;
        }
        self.factor_and_solve(jac, b)
    }
}
