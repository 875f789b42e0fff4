//! LOVE-style cached predictive variance.
//!
//! A block of Lanczos runs against the training operator A yields an
//! orthonormal basis Q whose Galerkin projection T = Q^t A Q gives a
//! low-rank root of A^-1: with T = L L^t, A^-1 ~ Q T^-1 Q^t =
//! (L^-1 Q^t)^t (L^-1 Q^t). The cache retains Q and L so that any later
//! quadratic form v^t A^-1 v costs one O(n r) projection and an O(r^2)
//! triangular solve, independent of how many variance queries follow.
//! Seeding with the training targets alone spans only their Krylov space,
//! which later cross-covariance queries need not lie in, so extra probe
//! seeds widen the basis. Accuracy improves with the per-seed Lanczos rank
//! and the seed count; callers needing exact covariances bypass the cache
//! entirely.
//!
//! The cache is only valid for the parameter state it was built under; the
//! inference engine drops it on every parameter mutation.

use crate::errors::Result;
use crate::lanczos::lanczos;
use crate::operator::LinearOperator;
use linfa::Float;
use linfa_linalg::cholesky::*;
use linfa_linalg::triangular::*;
use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Root decomposition retained between variance queries.
#[derive(Debug, Clone)]
pub struct LoveCache<F: Float> {
    /// Orthonormal projection basis, (n, r)
    q: Array2<F>,
    /// Lower Cholesky factor of Q^t A Q, (r, r)
    t_chol: Array2<F>,
}

impl<F: Float> LoveCache<F> {
    /// Builds the cache from one Lanczos run of `rank` steps per column of
    /// `seeds` (typically the training targets plus a few probe vectors).
    /// The per-run bases are merged into one orthonormal Q, capped at the
    /// operator size, and A is projected onto it.
    pub fn build(op: &LinearOperator<F>, seeds: &ArrayView2<F>, rank: usize) -> Result<Self> {
        let n = op.nrows();
        let drop_tol = F::cast(1e-8);
        let mut basis: Vec<Array1<F>> = Vec::with_capacity((seeds.ncols() * rank).min(n));
        'seeds: for seed in seeds.columns() {
            let decomp = lanczos(op, &seed, rank)?;
            for qcol in decomp.q.columns() {
                let mut w = qcol.to_owned();
                for b in &basis {
                    let c = b.dot(&w);
                    w.scaled_add(-c, b);
                }
                let norm = w.dot(&w).sqrt();
                if norm > drop_tol {
                    w /= norm;
                    basis.push(w);
                }
                if basis.len() == n {
                    break 'seeds;
                }
            }
        }
        let r = basis.len();
        let mut q = Array2::zeros((n, r));
        for (j, b) in basis.iter().enumerate() {
            q.column_mut(j).assign(b);
        }
        let mut t = q.t().dot(&op.matmul(&q.view()));
        // the projection is symmetric up to roundoff
        for i in 0..r {
            for j in 0..i {
                let m = (t[[i, j]] + t[[j, i]]) / F::cast(2.);
                t[[i, j]] = m;
                t[[j, i]] = m;
            }
        }
        // small diagonal lift keeps the factorization of T stable
        let nugget = F::cast(100.) * F::epsilon();
        for i in 0..r {
            t[[i, i]] = t[[i, i]] * (F::one() + nugget);
        }
        let t_chol = t.cholesky()?;
        debug!("LOVE cache built at rank {r} from {} seeds", seeds.ncols());
        Ok(LoveCache { q, t_chol })
    }

    /// Retained basis size (below `seeds * rank` on early breakdown or when
    /// the merged bases overlap)
    pub fn rank(&self) -> usize {
        self.t_chol.nrows()
    }

    /// Computes L^-1 Q^t V for a block of query vectors V (n, m). Column j
    /// of the result, dotted with itself, approximates v_j^t A^-1 v_j.
    pub fn project(&self, v: &ArrayView2<F>) -> Result<Array2<F>> {
        let p = self.q.t().dot(v);
        Ok(self.t_chol.solve_triangular(&p, UPLO::Lower)?)
    }

    /// Approximate quadratic form v^t A^-1 v for a single query vector.
    pub fn quad_form(&self, v: &ArrayView1<F>) -> Result<F> {
        let v2 = v.insert_axis(Axis(1));
        let u = self.project(&v2)?;
        let col = u.column(0);
        Ok(col.dot(&col))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};

    fn spd_operator(n: usize) -> (LinearOperator<f64>, Array2<f64>) {
        let m = Array2::from_shape_fn((n, n), |(i, j)| ((i * 7 + j * 3) % 13) as f64 / 13. - 0.5);
        let a = m.t().dot(&m) + Array2::<f64>::eye(n) * 1.5;
        (LinearOperator::Dense(a.to_owned()), a)
    }

    fn exact_quad(a: &Array2<f64>, v: &Array1<f64>) -> f64 {
        // v^t A^-1 v through a dense Cholesky solve
        let chol = a.cholesky().unwrap();
        let v2 = v.to_owned().insert_axis(Axis(1));
        let u = chol.solve_triangular(&v2, UPLO::Lower).unwrap();
        let col = u.column(0);
        col.dot(&col)
    }

    #[test]
    fn test_full_rank_cache_is_exact() {
        let (op, a) = spd_operator(20);
        let seed = Array1::from_shape_fn(20, |i| (i as f64 * 0.7).sin() + 1.5);
        let seeds = seed.view().insert_axis(Axis(1));
        let cache = LoveCache::build(&op, &seeds, 20).unwrap();
        let quad = cache.quad_form(&seed.view()).unwrap();
        assert_abs_diff_eq!(exact_quad(&a, &seed), quad, epsilon = 1e-6);
    }

    #[test]
    fn test_accuracy_improves_with_rank() {
        let (op, a) = spd_operator(40);
        let seed = Array1::from_shape_fn(40, |i| ((i * 11) % 17) as f64 / 17. + 0.2);
        let seeds = seed.view().insert_axis(Axis(1));
        let exact = exact_quad(&a, &seed);
        let mut errs = vec![];
        for rank in [4usize, 12, 36] {
            let cache = LoveCache::build(&op, &seeds, rank).unwrap();
            let quad = cache.quad_form(&seed.view()).unwrap();
            errs.push((quad - exact).abs());
        }
        assert!(errs[2] < errs[0], "LOVE error must shrink with rank: {errs:?}");
        assert!(errs[2] / exact.abs() < 1e-6, "high-rank error too large: {errs:?}");
    }

    #[test]
    fn test_extra_seeds_improve_cross_queries() {
        // a query outside the first seed's Krylov space; the merged basis
        // nests the single-seed one, so its quadratic form can only improve
        let (op, a) = spd_operator(40);
        let seed = Array1::from_shape_fn(40, |i| (i as f64 * 0.3).cos() + 0.5);
        let query = Array1::from_shape_fn(40, |i| ((i * 7) % 11) as f64 / 11. - 0.4);
        let exact = exact_quad(&a, &query);

        let single = seed.view().insert_axis(Axis(1)).to_owned();
        let mut block = Array2::zeros((40, 3));
        block.column_mut(0).assign(&seed);
        block
            .column_mut(1)
            .assign(&Array1::from_shape_fn(40, |i| if i % 2 == 0 { 1. } else { -1. }));
        block
            .column_mut(2)
            .assign(&Array1::from_shape_fn(40, |i| if (i / 2) % 2 == 0 { 1. } else { -1. }));

        let narrow = LoveCache::build(&op, &single.view(), 10).unwrap();
        let wide = LoveCache::build(&op, &block.view(), 10).unwrap();
        assert!(wide.rank() > narrow.rank());
        let err_narrow = (narrow.quad_form(&query.view()).unwrap() - exact).abs();
        let err_wide = (wide.quad_form(&query.view()).unwrap() - exact).abs();
        assert!(
            err_wide <= err_narrow + 1e-10,
            "wider basis must not lose accuracy: {err_wide} vs {err_narrow}"
        );
        assert!(err_wide / exact.abs() < 0.1, "cross-query error too large: {err_wide}");
    }

    #[test]
    fn test_project_block_matches_single_queries() {
        let (op, _) = spd_operator(15);
        let seed = Array1::ones(15);
        let seeds = seed.view().insert_axis(Axis(1));
        let cache = LoveCache::build(&op, &seeds, 12).unwrap();
        let block = Array2::from_shape_fn((15, 3), |(i, j)| ((i + 2 * j) % 5) as f64 - 1.);
        let proj = cache.project(&block.view()).unwrap();
        for j in 0..3 {
            let col = block.column(j);
            let quad = cache.quad_form(&col).unwrap();
            let p = proj.column(j);
            assert_abs_diff_eq!(quad, p.dot(&p), epsilon = 1e-10);
        }
    }
}
