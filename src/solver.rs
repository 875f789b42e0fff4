//! Preconditioned conjugate-gradient solver for symmetric positive-definite
//! operators, batched across right-hand sides.
//!
//! The solver only ever calls [`LinearOperator::matmul`]; all columns share
//! one operator product per iteration. Non-convergence within the iteration
//! cap is not fatal: the best iterate is returned with a warning, since the
//! whole point of the iterative path is to avoid direct factorization costs.

use crate::errors::{GpError, Result};
use crate::operator::LinearOperator;
use linfa::Float;
use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView2};

/// Conjugate-gradient solver settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CgSolver<F: Float> {
    /// Relative residual threshold per right-hand side
    pub tolerance: F,
    /// Iteration cap; bounds worst-case latency
    pub max_iter: usize,
    /// Apply the Jacobi (inverse diagonal) preconditioner
    pub precondition: bool,
}

/// Outcome of a CG solve. `converged` reports whether every column reached
/// the requested tolerance; when false the result is the best available
/// estimate and the caller is expected to treat it as approximate.
#[derive(Debug, Clone)]
pub struct CgSolution<F: Float> {
    /// Approximate solution block, one column per right-hand side
    pub x: Array2<F>,
    /// Iterations actually performed
    pub iterations: usize,
    /// Whether all columns converged within the cap
    pub converged: bool,
}

impl<F: Float> CgSolver<F> {
    /// Constructor with preconditioning enabled
    pub fn new(tolerance: F, max_iter: usize) -> Self {
        CgSolver {
            tolerance,
            max_iter,
            precondition: true,
        }
    }

    /// Solves `op x = rhs` for all columns of `rhs` simultaneously.
    ///
    /// Breakdown (non-positive curvature, meaning the operator is not
    /// positive definite to working precision) is a
    /// [`GpError::NumericalFailure`]; callers wanting automatic jitter
    /// stabilization go through [`with_jitter_escalation`].
    pub fn solve(&self, op: &LinearOperator<F>, rhs: &ArrayView2<F>) -> Result<CgSolution<F>> {
        let (n, k) = (rhs.nrows(), rhs.ncols());
        let m_inv = if self.precondition {
            Some(op.diagonal().mapv(|d| {
                if d > F::zero() {
                    F::one() / d
                } else {
                    F::one()
                }
            }))
        } else {
            None
        };
        let apply_precond = |r: &Array2<F>| -> Array2<F> {
            match &m_inv {
                Some(mi) => {
                    let mi_col = mi.view().insert_axis(ndarray::Axis(1));
                    r * &mi_col
                }
                None => r.to_owned(),
            }
        };

        let mut x = Array2::<F>::zeros((n, k));
        let mut r = rhs.to_owned();
        let mut z = apply_precond(&r);
        let mut p = z.to_owned();

        let b_norms: Vec<F> = (0..k).map(|j| norm(&rhs.column(j).to_owned())).collect();
        let mut done: Vec<bool> = b_norms.iter().map(|&b| b == F::zero()).collect();
        let mut rz: Vec<F> = (0..k)
            .map(|j| r.column(j).dot(&z.column(j)))
            .collect();

        let mut iterations = 0;
        while iterations < self.max_iter && done.iter().any(|d| !d) {
            iterations += 1;
            let ap = op.matmul(&p.view());
            for j in 0..k {
                if done[j] {
                    continue;
                }
                let pap = p.column(j).dot(&ap.column(j));
                if pap <= F::zero() {
                    return Err(GpError::NumericalFailure(format!(
                        "CG breakdown at iteration {iterations}: non-positive curvature {pap}"
                    )));
                }
                let alpha = rz[j] / pap;
                let (pj, apj) = (p.column(j).to_owned(), ap.column(j).to_owned());
                x.column_mut(j).scaled_add(alpha, &pj);
                r.column_mut(j).scaled_add(-alpha, &apj);
                if norm(&r.column(j).to_owned()) / b_norms[j] <= self.tolerance {
                    done[j] = true;
                }
            }
            if done.iter().all(|d| *d) {
                break;
            }
            z = apply_precond(&r);
            for j in 0..k {
                if done[j] {
                    continue;
                }
                let rz_new = r.column(j).dot(&z.column(j));
                let beta = rz_new / rz[j];
                rz[j] = rz_new;
                let zj = z.column(j).to_owned();
                let mut pj = p.column_mut(j);
                pj.mapv_inplace(|v| beta * v);
                pj.scaled_add(F::one(), &zj);
            }
        }

        let converged = done.iter().all(|d| *d);
        if !converged {
            warn!(
                "CG did not reach tolerance {} within {} iterations; returning best estimate",
                self.tolerance, self.max_iter
            );
        } else {
            debug!("CG converged in {iterations} iterations for {k} right-hand sides");
        }
        Ok(CgSolution {
            x,
            iterations,
            converged,
        })
    }

    /// Solve with bounded jitter escalation on numerical failure.
    pub fn solve_with_jitter(
        &self,
        op: &LinearOperator<F>,
        rhs: &ArrayView2<F>,
        jitter: F,
        attempts: usize,
    ) -> Result<CgSolution<F>> {
        with_jitter_escalation(op, jitter, attempts, |op| self.solve(op, rhs))
    }
}

fn norm<F: Float>(v: &Array1<F>) -> F {
    v.dot(v).sqrt()
}

/// Runs `f` against `op`, retrying with geometrically increasing diagonal
/// jitter when it reports a [`GpError::NumericalFailure`]. The jitter is
/// relative to the mean diagonal entry and escalates tenfold per attempt up
/// to `attempts` retries before the failure is surfaced.
pub fn with_jitter_escalation<F: Float, T>(
    op: &LinearOperator<F>,
    jitter: F,
    attempts: usize,
    f: impl Fn(&LinearOperator<F>) -> Result<T>,
) -> Result<T> {
    match f(op) {
        Err(GpError::NumericalFailure(msg)) => {
            debug!("operator numerically singular ({msg}); escalating jitter");
        }
        other => return other,
    }
    let diag_mean = op.diagonal().mapv(|v| v.abs()).mean().unwrap_or_else(F::one);
    let mut eps = jitter * diag_mean;
    for attempt in 1..=attempts {
        match f(&op.jittered(eps)) {
            Ok(t) => {
                warn!("operator stabilized with diagonal jitter {eps} (attempt {attempt})");
                return Ok(t);
            }
            Err(GpError::NumericalFailure(_)) => {
                eps = eps * F::cast(10.);
            }
            Err(e) => return Err(e),
        }
    }
    Err(GpError::NumericalFailure(format!(
        "operator still indefinite after {attempts} jitter escalations"
    )))
}
