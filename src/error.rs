use thiserror::Error;

/// Errors surfaced by the numerical core.
///
/// Ordinary numerical trouble (a Newton iteration that didn't converge, a
/// linear solve that stalled) is *not* propagated as an error from
/// [`crate::continuation::continuation`] — it is folded into a step
/// rejection, and the run keeps going with a shrunk step. These variants are
/// for the cases the design calls fatal or clean termination:
/// [`crate::continuation::ContinuationOutcome::into_result`] converts a
/// finished run's [`crate::continuation::TerminalReason`] into one of these,
/// and [`crate::linear_solver::direct::DirectSolver::last_error`] /
/// [`crate::linear_solver::gmres::GmresSolver::last_error`] surface a failed
/// linear solve the same way.
#[derive(Error, Debug, Clone)]
pub enum ContinuationError {
    #[error("Newton iteration did not converge: residual {residual} after {iterations} iterations")]
    NonConvergence { residual: f64, iterations: usize },

    #[error("linear solve failed to converge after {iterations} iterations")]
    LinearSolveFailure { iterations: usize },

    #[error("direct linear solve failed: matrix is singular")]
    SingularMatrix,

    #[error("step size at floor {dsmin} after a rejected step; aborting")]
    StepSizeFloor { dsmin: f64 },

    #[error("parameter p = {p} left the domain [{pmin}, {pmax}]")]
    DomainExit { p: f64, pmin: f64, pmax: f64 },

    #[error("non-finite value encountered in residual or Jacobian at step {step}")]
    NonFinite { step: usize },

    #[error("run aborted by the finalise hook after step {step}")]
    UserAbort { step: usize },
}

pub type Result<T> = std::result::Result<T, ContinuationError>;
