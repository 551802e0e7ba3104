//! The outer pseudo-arclength continuation loop: predict, correct, accept or
//! reject, update the tangent, detect fold events.

use crate::error::ContinuationError;
use crate::linear_solver::LinearSolver;
use crate::newton::{self, NewtonOptions, NewtonStatus};
use crate::tangent::{bordered_tangent, Tangent, TangentAlgorithm, DFDP_FD_STEP};
use crate::vector::VectorOps;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContinuationOptions {
    pub dsmin: f64,
    pub dsmax: f64,
    pub ds0: f64,
    /// Step-size growth factor after a success, in (0, 1]: `ds <- ds / growth`.
    pub growth: f64,
    /// Step-size shrink factor after a failure, in (0, 1]: `ds <- ds * shrink`.
    /// Independent of `growth` rather than sharing a single overloaded
    /// parameter for both directions (see `DESIGN.md`, Open Questions).
    pub shrink: f64,
    pub theta: f64,
    pub pmin: f64,
    pub pmax: f64,
    pub max_steps: usize,
    /// Accept a corrector step only if Newton converged in at most this many
    /// iterations.
    pub desired_iter: usize,
    pub newton: NewtonOptions,
    pub detect_fold: bool,
    pub do_arc_length_scaling: bool,
    pub tangent_algorithm: TangentAlgorithm,
}

impl Default for ContinuationOptions {
    fn default() -> Self {
        Self {
            dsmin: 1e-4,
            dsmax: 0.1,
            ds0: 0.01,
            growth: 0.5,
            shrink: 0.5,
            theta: 0.5,
            pmin: f64::NEG_INFINITY,
            pmax: f64::INFINITY,
            max_steps: 1000,
            desired_iter: 4,
            newton: NewtonOptions::default(),
            detect_fold: true,
            do_arc_length_scaling: false,
            tangent_algorithm: TangentAlgorithm::Secant,
        }
    }
}

/// One accepted point on the branch. Immutable once appended.
#[derive(Clone, Debug)]
pub struct Point<V> {
    pub x: V,
    pub p: f64,
    pub ds: f64,
    pub norm_x: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BifurcationKind {
    Fold,
    Hopf,
    Unknown,
}

#[derive(Clone, Debug)]
pub struct BifurcationMarker {
    pub index_in_branch: usize,
    pub kind: BifurcationKind,
    pub bracketed_parameter: f64,
    pub eigen_data: Option<Vec<f64>>,
}

#[derive(Clone, Debug, Default)]
pub struct Branch<V> {
    pub points: Vec<Point<V>>,
    pub markers: Vec<BifurcationMarker>,
}

/// Why a continuation run stopped. A run never propagates an exception for
/// ordinary numerical trouble — it always returns the branch accumulated so
/// far, tagged with the reason. [`ContinuationOutcome::into_result`] converts
/// this into the [`ContinuationError`] taxonomy for callers that want a
/// `Result`-shaped answer instead of matching on the tag.
#[derive(Clone, Debug, PartialEq)]
pub enum TerminalReason {
    MaxStepsReached,
    DomainExit,
    StepSizeFloor { dsmin: f64 },
    NonFinite { step: usize },
    UserAbort { step: usize },
    InitialNewtonFailed { residual: f64, iterations: usize },
}

pub struct ContinuationOutcome<V> {
    pub last_solution: V,
    pub last_p: f64,
    pub reason: TerminalReason,
}

impl<V> ContinuationOutcome<V> {
    /// `MaxStepsReached` and `DomainExit` are clean termination, not errors
    /// (spec §7); every other reason converts to the matching
    /// [`ContinuationError`] variant.
    pub fn into_result(self) -> Result<Self, ContinuationError> {
        match self.reason {
            TerminalReason::MaxStepsReached | TerminalReason::DomainExit => Ok(self),
            TerminalReason::StepSizeFloor { dsmin } => Err(ContinuationError::StepSizeFloor { dsmin }),
            TerminalReason::NonFinite { step } => Err(ContinuationError::NonFinite { step }),
            TerminalReason::UserAbort { step } => Err(ContinuationError::UserAbort { step }),
            TerminalReason::InitialNewtonFailed { residual, iterations } => Err(ContinuationError::NonConvergence { residual, iterations }),
        }
    }
}

/// User-supplied `finalise` hook, invoked per accepted step; returning
/// `false` aborts the run cleanly after the step is appended.
pub type Finalise<'a, V> = dyn FnMut(&V, &Tangent<V>, usize, &Branch<V>) -> bool + 'a;

struct Corrector<V> {
    x: V,
    p: f64,
    status: NewtonStatus,
    iterations: usize,
}

/// Bordered-Newton corrector: iterates on the
/// augmented residual `(F(x,p); theta*<x-x_k,dx>/N + (1-theta)*(p-p_k)*dp - ds)`
/// using the bordering lemma at each iteration, with the tangent row
/// `(dx, dp)` held fixed at the predictor's value.
#[allow(clippy::too_many_arguments)]
fn correct<V, F, J, L>(
    f: &F,
    jacobian: &J,
    x_pred: V,
    p_pred: f64,
    x_k: &V,
    p_k: f64,
    tangent: &Tangent<V>,
    ds: f64,
    theta: f64,
    n_dim: usize,
    opts: &NewtonOptions,
    linear_solver: &mut L,
) -> Corrector<V>
where
    V: VectorOps,
    F: Fn(&V, f64) -> V,
    J: Fn(&V, f64, &V) -> V,
    L: LinearSolver<V>,
{
    use crate::bordering::{solve_bordered, BorderedRhs};

    let mut x = x_pred;
    let mut p = p_pred;
    let n = n_dim as f64;

    for iter in 0..=opts.max_iter {
        let r = f(&x, p);
        if !r.is_finite() {
            return Corrector {
                x,
                p,
                status: NewtonStatus::NonFinite,
                iterations: iter,
            };
        }
        let mut dxk = x.clone();
        dxk.axpby(-1.0, x_k, 1.0);
        let arclength_eq = theta * tangent.dx.dot(&dxk) / n + (1.0 - theta) * (p - p_k) * tangent.dp - ds;
        let combined = (r.dot(&r) + arclength_eq * arclength_eq).sqrt();
        if opts.verbose {
            eprintln!("continuation corrector: iter {iter} |R~| = {combined:e}");
        }
        if combined <= opts.tol {
            return Corrector {
                x,
                p,
                status: NewtonStatus::Converged,
                iterations: iter,
            };
        }
        if iter >= opts.max_iter {
            return Corrector {
                x,
                p,
                status: NewtonStatus::MaxIterations,
                iterations: iter,
            };
        }

        let jac_action = |v: &V| jacobian(&x, p, v);
        let f0 = f(&x, p);
        let mut dfdp = f(&x, p + DFDP_FD_STEP);
        dfdp.axpby(1.0 / DFDP_FD_STEP, &f0, -1.0 / DFDP_FD_STEP);

        let sol = solve_bordered(
            &jac_action,
            &dfdp,
            &tangent.dx,
            tangent.dp,
            theta,
            n_dim,
            BorderedRhs { f: &r, g: arclength_eq },
            linear_solver,
        );
        if !sol.converged {
            return Corrector {
                x,
                p,
                status: NewtonStatus::LinearSolveFailed,
                iterations: iter + 1,
            };
        }
        x.axpy(-1.0, &sol.dx);
        p -= sol.dp;
    }
    unreachable!("loop always returns by iter >= opts.max_iter")
}

/// `continuation(F, J, x0, p0, opts) -> (Branch, final_solution)`.
///
/// `jacobian(x, p, v)` evaluates the action of `dF/dx` at `(x, p)` on `v`.
#[allow(clippy::too_many_arguments)]
pub fn continuation<V, F, J, L>(
    f: F,
    jacobian: J,
    x0: V,
    p0: f64,
    opts: &ContinuationOptions,
    linear_solver: &mut L,
    mut finalise: Option<&mut Finalise<'_, V>>,
) -> (Branch<V>, ContinuationOutcome<V>)
where
    V: VectorOps,
    F: Fn(&V, f64) -> V,
    J: Fn(&V, f64, &V) -> V,
    L: LinearSolver<V>,
{
    let n_dim = x0.len();
    let mut branch = Branch::default();

    // Initialisation: Newton-solve F(., p0) from x0.
    let residual_p0 = |x: &V| f(x, p0);
    let jac_p0 = |x: &V, v: &V| jacobian(x, p0, v);
    let init = newton::newton(residual_p0, jac_p0, x0, &opts.newton, linear_solver, None);
    if !init.converged() {
        let residual = init.history.last().copied().unwrap_or(f64::INFINITY);
        let iterations = init.iterations;
        let x = init.x;
        return (
            branch,
            ContinuationOutcome {
                last_solution: x,
                last_p: p0,
                reason: TerminalReason::InitialNewtonFailed { residual, iterations },
            },
        );
    }
    let mut x = init.x;
    let mut p = p0;
    branch.points.push(Point {
        x: x.clone(),
        p,
        ds: 0.0,
        norm_x: x.norm2(),
    });

    // Initial tangent: bordered algorithm against the seed tangent (0, 1).
    let seed = Tangent { dx: x.zeros_like(), dp: 1.0 };
    let jac_at = |xx: &V, pp: f64, v: &V| jacobian(xx, pp, v);
    let f_at = |xx: &V, pp: f64| f(xx, pp);
    let mut tangent = {
        let jac_action = |v: &V| jac_at(&x, p, v);
        bordered_tangent(&jac_action, &f_at, &x, p, &seed, opts.theta, n_dim, linear_solver)
    };
    let mut prev_tau = tangent.dp;

    let mut ds = opts.ds0.clamp(opts.dsmin, opts.dsmax);
    let mut theta = opts.theta;
    let mut step = 0usize;

    while step < opts.max_steps {
        let mut x_pred = x.clone();
        x_pred.axpy(ds, &tangent.dx);
        let p_pred = p + ds * tangent.dp;

        let corr = correct(&f, &jacobian, x_pred, p_pred, &x, p, &tangent, ds, theta, n_dim, &opts.newton, linear_solver);

        if corr.status == NewtonStatus::NonFinite {
            return (
                branch,
                ContinuationOutcome {
                    last_solution: corr.x,
                    last_p: corr.p,
                    reason: TerminalReason::NonFinite { step },
                },
            );
        }

        let accepted = corr.status == NewtonStatus::Converged && corr.iterations <= opts.desired_iter;
        if accepted {
            ds = (ds / opts.growth).min(opts.dsmax);
        } else {
            let was_at_floor = ds <= opts.dsmin * (1.0 + 1e-12);
            ds = (ds * opts.shrink).max(opts.dsmin);
            if was_at_floor {
                return (
                    branch,
                    ContinuationOutcome {
                        last_solution: x,
                        last_p: p,
                        reason: TerminalReason::StepSizeFloor { dsmin: opts.dsmin },
                    },
                );
            }
            continue;
        }

        step += 1;
        x = corr.x;
        p = corr.p;

        if p < opts.pmin || p > opts.pmax {
            let clipped_p = p.clamp(opts.pmin, opts.pmax);
            if opts.newton.verbose {
                eprintln!("continuation: {}", ContinuationError::DomainExit { p, pmin: opts.pmin, pmax: opts.pmax });
            }
            branch.points.push(Point {
                x: x.clone(),
                p: clipped_p,
                ds,
                norm_x: x.norm2(),
            });
            return (
                branch,
                ContinuationOutcome {
                    last_solution: x,
                    last_p: clipped_p,
                    reason: TerminalReason::DomainExit,
                },
            );
        }

        let jac_action = |v: &V| jac_at(&x, p, v);
        let new_tangent = match opts.tangent_algorithm {
            TangentAlgorithm::Bordered => bordered_tangent(&jac_action, &f_at, &x, p, &tangent, theta, n_dim, linear_solver),
            TangentAlgorithm::Secant => {
                let prev_point = branch.points.last().unwrap();
                crate::tangent::secant_tangent(&x, p, &prev_point.x, prev_point.p, ds, &tangent, theta, n_dim)
            }
        };
        tangent = new_tangent;

        if opts.do_arc_length_scaling {
            // Rebalance theta so the x- and p-components of the tangent
            // contribute comparably to the arclength norm: when the
            // parameter component dominates (|dp| large), shrink theta so
            // the x term isn't swamped, and vice versa.
            let dx_term = tangent.dx.dot(&tangent.dx) / n_dim as f64;
            let dp_term = tangent.dp * tangent.dp;
            if dx_term + dp_term > 0.0 {
                theta = (dp_term / (dx_term + dp_term)).clamp(1e-3, 1.0 - 1e-3);
            }
        }

        if opts.detect_fold && prev_tau * tangent.dp < 0.0 {
            let prev_point = branch.points.last().unwrap();
            let p_prev = prev_point.p;
            let denom = tangent.dp - prev_tau;
            let bracketed = if denom.abs() > 1e-300 {
                p_prev - prev_tau * (p - p_prev) / denom
            } else {
                p_prev
            };
            branch.markers.push(BifurcationMarker {
                index_in_branch: branch.points.len(),
                kind: BifurcationKind::Fold,
                bracketed_parameter: bracketed,
                eigen_data: None,
            });
        }
        prev_tau = tangent.dp;

        branch.points.push(Point {
            x: x.clone(),
            p,
            ds,
            norm_x: x.norm2(),
        });

        if let Some(hook) = finalise.as_mut() {
            if !hook(&x, &tangent, step, &branch) {
                return (
                    branch,
                    ContinuationOutcome {
                        last_solution: x,
                        last_p: p,
                        reason: TerminalReason::UserAbort { step },
                    },
                );
            }
        }
    }

    (
        branch,
        ContinuationOutcome {
            last_solution: x,
            last_p: p,
            reason: TerminalReason::MaxStepsReached,
        },
    )
}
