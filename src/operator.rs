//! Implicit linear operators over (possibly structured) symmetric matrices.
//!
//! A [`LinearOperator`] only promises matrix-matrix products, diagonal
//! extraction and single-entry evaluation; the full matrix is never required
//! to exist in memory. Structure is exploited through a small closed set of
//! variants whose products delegate recursively to their children: the cost
//! of a sum of structured kernels is the sum of the children's costs, not
//! the cost of a dense product.

use crate::errors::{GpError, Result};
use crate::ski::InterpMatrix;
use linfa::Float;
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// An implicit symmetric matrix built from a closed set of structure rules.
#[derive(Debug, Clone)]
pub enum LinearOperator<F: Float> {
    /// Explicitly stored entries
    Dense(Array2<F>),
    /// Diagonal matrix given by its diagonal entries
    Diagonal(Array1<F>),
    /// Scalar multiple of a child operator
    Scaled(F, Box<LinearOperator<F>>),
    /// Sum of two child operators of identical shape
    Sum(Box<LinearOperator<F>>, Box<LinearOperator<F>>),
    /// Kronecker product of child operators, leftmost factor slowest-varying
    Kronecker(Vec<LinearOperator<F>>),
    /// Symmetric Toeplitz matrix given by its first column
    Toeplitz(Array1<F>),
    /// Interpolated (SKI) operator W K_grid W^t with sparse W
    Interpolated {
        /// Sparse interpolation weights, (n, g)
        w: InterpMatrix<F>,
        /// Structured grid kernel, (g, g)
        grid: Box<LinearOperator<F>>,
    },
    /// Low-rank operator R R^t given by its root R (n, r)
    LowRank(Array2<F>),
}

impl<F: Float> LinearOperator<F> {
    /// Operator shape as (nrows, ncols). All variants but `Dense` and
    /// `LowRank` roots are square by construction.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            LinearOperator::Dense(a) => (a.nrows(), a.ncols()),
            LinearOperator::Diagonal(d) => (d.len(), d.len()),
            LinearOperator::Scaled(_, op) => op.shape(),
            LinearOperator::Sum(a, _) => a.shape(),
            LinearOperator::Kronecker(ops) => ops
                .iter()
                .map(|op| op.shape())
                .fold((1, 1), |(r, c), (ri, ci)| (r * ri, c * ci)),
            LinearOperator::Toeplitz(c) => (c.len(), c.len()),
            LinearOperator::Interpolated { w, .. } => (w.nrows(), w.nrows()),
            LinearOperator::LowRank(r) => (r.nrows(), r.nrows()),
        }
    }

    /// Number of rows
    pub fn nrows(&self) -> usize {
        self.shape().0
    }

    /// Matrix-matrix product against a dense (n, k) block of column vectors.
    pub fn matmul(&self, v: &ArrayView2<F>) -> Array2<F> {
        match self {
            LinearOperator::Dense(a) => a.dot(v),
            LinearOperator::Diagonal(d) => {
                let d_col = d.view().insert_axis(Axis(1));
                v.to_owned() * &d_col
            }
            LinearOperator::Scaled(s, op) => {
                let s = *s;
                op.matmul(v).mapv(|x| s * x)
            }
            LinearOperator::Sum(a, b) => a.matmul(v) + b.matmul(v),
            LinearOperator::Kronecker(ops) => {
                let mut out = Array2::zeros((self.nrows(), v.ncols()));
                out.axis_iter_mut(Axis(1))
                    .into_par_iter()
                    .zip(v.axis_iter(Axis(1)).into_par_iter())
                    .for_each(|(mut o, x)| o.assign(&kron_apply(ops, &x)));
                out
            }
            LinearOperator::Toeplitz(c) => {
                let g = c.len();
                let mut out = Array2::zeros((g, v.ncols()));
                out.axis_iter_mut(Axis(1))
                    .into_par_iter()
                    .zip(v.axis_iter(Axis(1)).into_par_iter())
                    .for_each(|(mut o, x)| {
                        for i in 0..g {
                            let mut acc = F::zero();
                            for j in 0..g {
                                let lag = if i > j { i - j } else { j - i };
                                acc = acc + c[lag] * x[j];
                            }
                            o[i] = acc;
                        }
                    });
                out
            }
            LinearOperator::Interpolated { w, grid } => {
                let wt_v = w.t_matmul(v);
                let k_wt_v = grid.matmul(&wt_v.view());
                w.matmul(&k_wt_v.view())
            }
            LinearOperator::LowRank(r) => r.dot(&r.t().dot(v)),
        }
    }

    /// Matrix-vector product
    pub fn matvec(&self, v: &ArrayView1<F>) -> Array1<F> {
        let v2 = v.insert_axis(Axis(1));
        self.matmul(&v2).remove_axis(Axis(1))
    }

    /// The n diagonal entries of the operator.
    pub fn diagonal(&self) -> Array1<F> {
        match self {
            LinearOperator::Dense(a) => a.diag().to_owned(),
            LinearOperator::Diagonal(d) => d.to_owned(),
            LinearOperator::Scaled(s, op) => {
                let s = *s;
                op.diagonal().mapv(|x| s * x)
            }
            LinearOperator::Sum(a, b) => a.diagonal() + b.diagonal(),
            LinearOperator::Kronecker(ops) => ops
                .iter()
                .map(|op| op.diagonal())
                .reduce(|acc, d| {
                    let mut out = Array1::zeros(acc.len() * d.len());
                    for (i, &a) in acc.iter().enumerate() {
                        for (j, &b) in d.iter().enumerate() {
                            out[i * d.len() + j] = a * b;
                        }
                    }
                    out
                })
                .unwrap_or_else(|| Array1::zeros(0)),
            LinearOperator::Toeplitz(c) => Array1::from_elem(c.len(), c[0]),
            LinearOperator::Interpolated { .. } => {
                Array1::from_shape_fn(self.nrows(), |i| self.entry(i, i))
            }
            LinearOperator::LowRank(r) => r.rows().into_iter().map(|row| row.dot(&row)).collect(),
        }
    }

    /// Single entry evaluation. Cheap for every structured variant; used for
    /// diagonals of interpolated operators where only a handful of grid
    /// entries contribute per point.
    pub fn entry(&self, i: usize, j: usize) -> F {
        match self {
            LinearOperator::Dense(a) => a[[i, j]],
            LinearOperator::Diagonal(d) => {
                if i == j {
                    d[i]
                } else {
                    F::zero()
                }
            }
            LinearOperator::Scaled(s, op) => *s * op.entry(i, j),
            LinearOperator::Sum(a, b) => a.entry(i, j) + b.entry(i, j),
            LinearOperator::Kronecker(ops) => {
                let mut val = F::one();
                let mut ii = i;
                let mut jj = j;
                // decompose the flat indices factor by factor, rightmost fastest
                let sizes: Vec<usize> = ops.iter().map(|op| op.shape().0).collect();
                let mut vals = vec![F::one(); ops.len()];
                for (d, &sz) in sizes.iter().enumerate().rev() {
                    let (id, jd) = (ii % sz, jj % sz);
                    ii /= sz;
                    jj /= sz;
                    vals[d] = ops[d].entry(id, jd);
                }
                for v in vals {
                    val = val * v;
                }
                val
            }
            LinearOperator::Toeplitz(c) => {
                let lag = if i > j { i - j } else { j - i };
                c[lag]
            }
            LinearOperator::Interpolated { w, grid } => {
                let mut acc = F::zero();
                for &(a, wa) in w.row(i) {
                    for &(b, wb) in w.row(j) {
                        acc = acc + wa * wb * grid.entry(a, b);
                    }
                }
                acc
            }
            LinearOperator::LowRank(r) => r.row(i).dot(&r.row(j)),
        }
    }

    /// Explicit materialization, guarded by a maximum entry count.
    /// Requesting a matrix above `max_entries` is an error rather than an
    /// unbounded allocation.
    pub fn to_dense(&self, max_entries: usize) -> Result<Array2<F>> {
        let (n, m) = self.shape();
        if n * m > max_entries {
            return Err(GpError::ResourceLimitExceeded(format!(
                "materializing a ({n}, {m}) operator exceeds the {max_entries} entry limit"
            )));
        }
        if let LinearOperator::Dense(a) = self {
            return Ok(a.to_owned());
        }
        let eye: Array2<F> = Array2::eye(m);
        Ok(self.matmul(&eye.view()))
    }

    /// Returns this operator with `eps` added to its diagonal.
    pub fn jittered(&self, eps: F) -> LinearOperator<F> {
        let n = self.nrows();
        LinearOperator::Sum(
            Box::new(self.clone()),
            Box::new(LinearOperator::Diagonal(Array1::from_elem(n, eps))),
        )
    }
}

/// Applies a Kronecker product of operators to a flat vector using the
/// reshape identity (A (x) B) vec(X) = vec(A X B^t) with row-major layout.
fn kron_apply<F: Float>(ops: &[LinearOperator<F>], x: &ArrayView1<F>) -> Array1<F> {
    if ops.len() == 1 {
        return ops[0].matvec(x);
    }
    let n0 = ops[0].shape().0;
    let rest = x.len() / n0;
    let xm = x.to_owned().into_shape((n0, rest)).unwrap();
    let ym = ops[0].matmul(&xm.view());
    let mut out = Array2::zeros((n0, rest));
    for (i, row) in ym.rows().into_iter().enumerate() {
        out.row_mut(i).assign(&kron_apply(&ops[1..], &row));
    }
    out.into_shape(n0 * rest).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn dense_kron(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
        let (ra, ca) = (a.nrows(), a.ncols());
        let (rb, cb) = (b.nrows(), b.ncols());
        let mut out = Array2::zeros((ra * rb, ca * cb));
        for i in 0..ra {
            for j in 0..ca {
                for k in 0..rb {
                    for l in 0..cb {
                        out[[i * rb + k, j * cb + l]] = a[[i, j]] * b[[k, l]];
                    }
                }
            }
        }
        out
    }

    #[test]
    fn test_sum_scaled_matmul() {
        let a = LinearOperator::Dense(array![[2., 1.], [1., 3.]]);
        let op = LinearOperator::Sum(
            Box::new(LinearOperator::Scaled(2., Box::new(a))),
            Box::new(LinearOperator::Diagonal(array![1., 1.])),
        );
        let v = array![[1.], [1.]];
        let out = op.matmul(&v.view());
        assert_abs_diff_eq!(array![[7.], [9.]], out, epsilon = 1e-12);
        assert_abs_diff_eq!(array![5., 7.], op.diagonal(), epsilon = 1e-12);
    }

    #[test]
    fn test_toeplitz_matches_dense() {
        let c = array![2., -1., 0.5, 0.1];
        let op = LinearOperator::Toeplitz(c.to_owned());
        let dense = op.to_dense(100).unwrap();
        for i in 0..4usize {
            for j in 0..4 {
                let lag = i.abs_diff(j);
                assert_abs_diff_eq!(dense[[i, j]], c[lag], epsilon = 1e-12);
            }
        }
        let v = array![[1., 0.], [2., 1.], [0., -1.], [1., 2.]];
        assert_abs_diff_eq!(dense.dot(&v), op.matmul(&v.view()), epsilon = 1e-12);
    }

    #[test]
    fn test_kronecker_matches_dense() {
        let a = array![[4., 1.], [1., 3.]];
        let b = array![[2., 0.5, 0.1], [0.5, 2., 0.5], [0.1, 0.5, 2.]];
        let op = LinearOperator::Kronecker(vec![
            LinearOperator::Dense(a.to_owned()),
            LinearOperator::Dense(b.to_owned()),
        ]);
        let dense = dense_kron(&a, &b);
        let v = Array2::from_shape_fn((6, 2), |(i, j)| (i as f64 + 1.) * (j as f64 - 0.5));
        assert_abs_diff_eq!(dense.dot(&v), op.matmul(&v.view()), epsilon = 1e-10);
        assert_abs_diff_eq!(
            Array1::from_iter(dense.diag().iter().cloned()),
            op.diagonal(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(dense[[4, 2]], op.entry(4, 2), epsilon = 1e-12);
    }

    #[test]
    fn test_symmetry_against_basis_vectors() {
        let a = array![[2., 0.7, 0.1], [0.7, 1.5, 0.3], [0.1, 0.3, 1.1]];
        let op = LinearOperator::Sum(
            Box::new(LinearOperator::Dense(a)),
            Box::new(LinearOperator::Diagonal(array![0.1, 0.1, 0.1])),
        );
        let dense = op.to_dense(100).unwrap();
        assert_abs_diff_eq!(dense.to_owned(), dense.t().to_owned(), epsilon = 1e-12);
    }

    #[test]
    fn test_low_rank_matmul() {
        let r = array![[1., 0.], [0.5, 1.], [0., 2.]];
        let op = LinearOperator::LowRank(r.to_owned());
        let dense = r.dot(&r.t());
        let v = Array2::from_shape_fn((3, 2), |(i, j)| i as f64 - j as f64);
        assert_abs_diff_eq!(dense.dot(&v), op.matmul(&v.view()), epsilon = 1e-12);
        assert_abs_diff_eq!(
            Array1::from_iter(dense.diag().iter().cloned()),
            op.diagonal(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_to_dense_resource_limit() {
        let op = LinearOperator::<f64>::Diagonal(Array1::ones(100));
        let err = op.to_dense(50).unwrap_err();
        assert!(matches!(err, GpError::ResourceLimitExceeded(_)));
    }

    #[test]
    fn test_jittered_diagonal() {
        let op = LinearOperator::Dense(array![[1., 0.5], [0.5, 1.]]);
        let jit = op.jittered(1e-3);
        assert_abs_diff_eq!(array![1.001, 1.001], jit.diagonal(), epsilon = 1e-12);
    }
}
