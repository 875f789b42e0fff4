//! Symmetric Lanczos tridiagonalization and stochastic Lanczos quadrature.
//!
//! Lanczos builds an orthonormal basis Q and a small tridiagonal T capturing
//! the action of a large symmetric operator on a start vector. Quadrature on
//! the eigendecomposition of T then approximates z^t f(A) z for spectral
//! functions f; averaging over random Rademacher probes yields stochastic
//! estimates of log-det(A) and of the trace terms needed by the marginal
//! likelihood gradient, in roughly linear time instead of O(n^3).
//!
//! Orthogonality of the Lanczos basis degrades after a few dozen steps in
//! floating point, so every step re-orthogonalizes the new vector against
//! the full basis computed so far.

use crate::errors::{GpError, Result};
use crate::operator::LinearOperator;
use crate::solver::CgSolver;
use crate::utils::rademacher_probes;
use linfa::Float;
use linfa_linalg::eigh::*;
use log::debug;
use ndarray::{Array1, Array2, ArrayView1, s};
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

/// Orthonormal basis Q (n, k) and the scalar coefficients of the
/// tridiagonal matrix T produced by a Lanczos run. Transient: retained only
/// while the caller needs quadrature or the LOVE root built from it.
#[derive(Debug, Clone)]
pub struct LanczosDecomposition<F: Float> {
    /// Orthonormal Krylov basis, one column per step taken
    pub q: Array2<F>,
    /// Diagonal of T
    pub alphas: Array1<F>,
    /// Off-diagonal of T
    pub betas: Array1<F>,
}

impl<F: Float> LanczosDecomposition<F> {
    /// Number of Lanczos steps actually taken
    pub fn steps(&self) -> usize {
        self.alphas.len()
    }

    /// Densifies T, a (k, k) symmetric tridiagonal matrix. k is small.
    pub fn tridiagonal(&self) -> Array2<F> {
        let k = self.steps();
        let mut t = Array2::zeros((k, k));
        for i in 0..k {
            t[[i, i]] = self.alphas[i];
            if i + 1 < k {
                t[[i, i + 1]] = self.betas[i];
                t[[i + 1, i]] = self.betas[i];
            }
        }
        t
    }
}

/// Runs up to `k` steps of symmetric Lanczos on `op` starting from `q0`,
/// with full re-orthogonalization. Stops early on breakdown (invariant
/// Krylov subspace reached), returning the shorter decomposition.
pub fn lanczos<F: Float>(
    op: &LinearOperator<F>,
    q0: &ArrayView1<F>,
    k: usize,
) -> Result<LanczosDecomposition<F>> {
    let n = op.nrows();
    if k == 0 {
        return Err(GpError::InvalidParameter(
            "Lanczos step budget must be positive".to_string(),
        ));
    }
    let q0_norm = q0.dot(q0).sqrt();
    if q0_norm == F::zero() {
        return Err(GpError::NumericalFailure(
            "Lanczos started from a zero vector".to_string(),
        ));
    }
    let k = k.min(n);
    let breakdown_tol = F::epsilon().sqrt();

    let mut q = Array2::<F>::zeros((n, k));
    let mut alphas: Vec<F> = Vec::with_capacity(k);
    let mut betas: Vec<F> = Vec::with_capacity(k.saturating_sub(1));

    q.column_mut(0).assign(&q0.mapv(|v| v / q0_norm));
    let mut steps = 0;
    for i in 0..k {
        let qi = q.column(i).to_owned();
        let mut w = op.matvec(&qi.view());
        let alpha = qi.dot(&w);
        w.scaled_add(-alpha, &qi);
        if i > 0 {
            let qprev = q.column(i - 1).to_owned();
            w.scaled_add(-betas[i - 1], &qprev);
        }
        // full re-orthogonalization against the basis built so far
        let basis = q.slice(s![.., ..i + 1]);
        let coeffs = basis.t().dot(&w);
        w = w - basis.dot(&coeffs);

        alphas.push(alpha);
        steps += 1;

        let beta = w.dot(&w).sqrt();
        if beta <= breakdown_tol {
            debug!("Lanczos breakdown at step {steps}, invariant subspace reached");
            break;
        }
        if i + 1 < k {
            betas.push(beta);
            q.column_mut(i + 1).assign(&w.mapv(|v| v / beta));
        }
    }

    let q = if steps == k {
        q
    } else {
        q.slice(s![.., ..steps]).to_owned()
    };
    Ok(LanczosDecomposition {
        q,
        alphas: Array1::from_vec(alphas),
        betas: Array1::from_vec(betas),
    })
}

/// Stochastic Lanczos quadrature estimator for log-determinants and the
/// trace terms of the marginal-likelihood gradient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slq {
    /// Number of Rademacher probe vectors
    pub n_probes: usize,
    /// Lanczos step budget per probe
    pub rank: usize,
    /// Probe generation seed
    pub seed: u64,
}

impl Slq {
    /// Constructor
    pub fn new(n_probes: usize, rank: usize, seed: u64) -> Self {
        Slq {
            n_probes,
            rank,
            seed,
        }
    }

    /// Estimates log-det(op) for a symmetric positive-definite operator.
    ///
    /// Per probe z: k Lanczos steps give T; with T = U diag(l) U^t the
    /// Gauss-quadrature value is ||z||^2 sum_i U[0,i]^2 ln(l_i). Non-positive
    /// Ritz values mean the operator is not positive definite to working
    /// precision and are reported as [`GpError::NumericalFailure`].
    pub fn logdet<F: Float>(&self, op: &LinearOperator<F>) -> Result<F> {
        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed);
        let z = rademacher_probes::<F>(op.nrows(), self.n_probes, &mut rng);
        self.logdet_with_probes(op, &z)
    }

    fn logdet_with_probes<F: Float>(&self, op: &LinearOperator<F>, z: &Array2<F>) -> Result<F> {
        let n = op.nrows();
        let mut acc = F::zero();
        for zj in z.columns() {
            let decomp = lanczos(op, &zj, self.rank)?;
            let t = decomp.tridiagonal();
            let (vals, vecs) = t.eigh()?;
            let mut quad = F::zero();
            for (i, &l) in vals.iter().enumerate() {
                if l <= F::zero() {
                    return Err(GpError::NumericalFailure(format!(
                        "non-positive Ritz value {l} in log-determinant quadrature"
                    )));
                }
                let w0 = vecs[[0, i]];
                quad = quad + w0 * w0 * l.ln();
            }
            // Rademacher probes have squared norm exactly n
            acc = acc + F::cast(n as f64) * quad;
        }
        Ok(acc / F::cast(self.n_probes as f64))
    }

    /// Estimates log-det(op) together with the gradient traces
    /// tr(op^-1 d_op) for each operator in `grad_ops`.
    ///
    /// The probe solves op^-1 z are shared: one batched CG call serves every
    /// parameter. Returns the log-det estimate, the trace estimates, and
    /// whether the CG solves converged (when false the estimates are still
    /// usable but approximate).
    pub fn logdet_with_grads<F: Float>(
        &self,
        op: &LinearOperator<F>,
        grad_ops: &[LinearOperator<F>],
        solver: &CgSolver<F>,
    ) -> Result<(F, Array1<F>, bool)> {
        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed);
        let z = rademacher_probes::<F>(op.nrows(), self.n_probes, &mut rng);

        let logdet = self.logdet_with_probes(op, &z)?;
        let zinv = solver.solve(op, &z.view())?;

        let t = F::cast(self.n_probes as f64);
        let mut traces = Array1::zeros(grad_ops.len());
        for (gi, gop) in grad_ops.iter().enumerate() {
            let dz = gop.matmul(&z.view());
            let mut acc = F::zero();
            for j in 0..self.n_probes {
                acc = acc + zinv.x.column(j).dot(&dz.column(j));
            }
            traces[gi] = acc / t;
        }
        Ok((logdet, traces, zinv.converged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array;

    fn spd_operator(n: usize) -> (LinearOperator<f64>, Array2<f64>) {
        let m = Array2::from_shape_fn((n, n), |(i, j)| ((i * 13 + j * 29) % 11) as f64 / 11. - 0.5);
        let a = m.t().dot(&m) + Array2::<f64>::eye(n) * 2.;
        (LinearOperator::Dense(a.to_owned()), a)
    }

    #[test]
    fn test_lanczos_basis_orthonormal() {
        let (op, _) = spd_operator(30);
        let q0 = Array1::from_shape_fn(30, |i| if i % 2 == 0 { 1. } else { -1. });
        let decomp = lanczos(&op, &q0.view(), 12).unwrap();
        let qtq = decomp.q.t().dot(&decomp.q);
        assert_abs_diff_eq!(Array2::<f64>::eye(decomp.steps()), qtq, epsilon = 1e-8);
    }

    #[test]
    fn test_lanczos_three_term_relation() {
        // A Q_k = Q_k T_k + residual on the last column only
        let (op, a) = spd_operator(25);
        let q0 = Array1::ones(25);
        let decomp = lanczos(&op, &q0.view(), 10).unwrap();
        let aq = a.dot(&decomp.q);
        let qt = decomp.q.dot(&decomp.tridiagonal());
        let diff = &aq - &qt;
        // all but the last column must match
        for j in 0..decomp.steps() - 1 {
            let col_norm = diff.column(j).dot(&diff.column(j)).sqrt();
            assert!(col_norm < 1e-8, "column {j} residual {col_norm}");
        }
    }

    #[test]
    fn test_lanczos_breakdown_on_low_rank_start() {
        // operator with a 2-dimensional invariant subspace containing q0
        let op = LinearOperator::Diagonal(ndarray::array![1., 1., 1., 5.]);
        let q0 = ndarray::array![1., 1., 1., 0.];
        let decomp = lanczos(&op, &q0.view(), 4).unwrap();
        assert!(decomp.steps() <= 2);
    }

    #[test]
    fn test_lanczos_rejects_zero_step_budget() {
        let op = LinearOperator::Diagonal(ndarray::array![1., 2., 3.]);
        let q0 = Array1::ones(3);
        let err = lanczos(&op, &q0.view(), 0).unwrap_err();
        assert!(matches!(err, GpError::InvalidParameter(_)));
    }

    #[test]
    fn test_slq_logdet_converges_with_rank() {
        // diagonal operator: the Rademacher quadratic form is exact, so the
        // only error left is the quadrature error, which shrinks with rank
        let diag = Array::linspace(0.5, 5., 60);
        let exact: f64 = diag.mapv(f64::ln).sum();
        let op = LinearOperator::Diagonal(diag);

        let mut errs = vec![];
        for rank in [4usize, 10, 30] {
            let slq = Slq::new(8, rank, 42);
            let est = slq.logdet(&op).unwrap();
            errs.push((est - exact).abs());
        }
        assert!(
            errs[2] < errs[0],
            "SLQ error must shrink with rank: {errs:?}"
        );
        assert!(errs[2] < 1e-3 * exact.abs(), "rank-30 error too large: {errs:?}");
    }

    #[test]
    fn test_slq_rejects_indefinite_operator() {
        let op = LinearOperator::Diagonal(ndarray::array![1., -0.5, 2., 1.]);
        let slq = Slq::new(4, 4, 0);
        let err = slq.logdet(&op).unwrap_err();
        assert!(matches!(err, GpError::NumericalFailure(_)));
    }

    #[test]
    fn test_gradient_trace_identity() {
        // with d_op = op the trace estimator collapses to z^t z / t = n
        let (op, _) = spd_operator(20);
        let slq = Slq::new(6, 15, 7);
        let solver = CgSolver::new(1e-10, 200);
        let (_, traces, converged) = slq
            .logdet_with_grads(&op, &[op.clone()], &solver)
            .unwrap();
        assert!(converged);
        assert_abs_diff_eq!(20., traces[0], epsilon = 1e-6);
    }

    #[test]
    fn test_gradient_trace_inverse() {
        // d_op = I estimates tr(A^-1); loose stochastic tolerance
        let (op, a) = spd_operator(15);
        let chol = {
            use linfa_linalg::cholesky::*;
            a.cholesky().unwrap()
        };
        let exact: f64 = {
            use linfa_linalg::triangular::*;
            let eye = Array2::<f64>::eye(15);
            let l_inv = chol.solve_triangular(&eye, UPLO::Lower).unwrap();
            // A^-1 = L^-t L^-1, trace = ||L^-1||_F^2
            l_inv.iter().map(|v| v * v).sum()
        };
        let slq = Slq::new(200, 15, 3);
        let solver = CgSolver::new(1e-10, 300);
        let ident = LinearOperator::Diagonal(Array1::ones(15));
        let (_, traces, _) = slq.logdet_with_grads(&op, &[ident], &solver).unwrap();
        let rel = (traces[0] - exact).abs() / exact;
        assert!(rel < 0.2, "trace estimate off by {rel} (exact {exact})");
    }

    #[test]
    fn test_slq_logdet_dense_reference() {
        use linfa_linalg::cholesky::*;
        let (op, a) = spd_operator(40);
        let chol = a.cholesky().unwrap();
        let exact: f64 = chol.diag().mapv(|v| 2. * v.ln()).sum();
        let slq = Slq::new(30, 25, 11);
        let est = slq.logdet(&op).unwrap();
        let rel = (est - exact).abs() / exact.abs();
        assert!(rel < 0.2, "SLQ estimate off by {rel} (exact {exact}, est {est})");
    }
}
