//! `parc`: pseudo-arclength continuation for tracing solution branches of
//! parameterized nonlinear equations `F(x, p) = 0` past folds.
//!
//! The crate is built around an abstract [`vector::VectorOps`] capability
//! set rather than a concrete array type: [`newton::newton`] and
//! [`continuation::continuation`] are generic over any `V: VectorOps`, while
//! [`fold::newton_fold`] reuses the same machinery for the minimally
//! augmented fold system and [`periodic_orbit::PeriodicOrbitTrap`]
//! monomorphises directly over `nalgebra::DVector<f64>` for its
//! block-structured unknown.
//!
//! A single concrete implementor, [`vector::DenseVector`], backed by
//! `nalgebra::DVector<f64>`, ships for callers who don't need anything more
//! exotic than a dense state vector.

pub mod bordering;
pub mod continuation;
pub mod error;
pub mod fold;
pub mod linear_solver;
pub mod newton;
pub mod periodic_orbit;
pub mod tangent;
pub mod vector;

pub use bordering::{solve_bordered, BorderedRhs, BorderedSolution};
pub use continuation::{
    continuation as run_continuation, Branch, BifurcationKind, BifurcationMarker, ContinuationOptions, ContinuationOutcome, Point, TerminalReason,
};
pub use error::{ContinuationError, Result};
pub use fold::{newton_fold, FoldPoint, FoldVectors};
pub use linear_solver::direct::DirectSolver;
pub use linear_solver::gmres::{GmresOptions, GmresSolver};
pub use linear_solver::{LinearSolveOutcome, LinearSolver};
pub use newton::{newton, NewtonOptions, NewtonOutcome, NewtonStatus};
pub use periodic_orbit::{PeriodicOrbitState, PeriodicOrbitTrap};
pub use tangent::{Tangent, TangentAlgorithm};
pub use vector::{DenseVector, VectorOps};
