//! Structured kernel interpolation (SKI).
//!
//! Projects n real points onto a small regular grid of g inducing nodes so
//! that K(X, X) ~ W K_grid W^t, where W is a sparse cubic-interpolation
//! matrix and K_grid carries algebraic structure: Toeplitz along each grid
//! dimension, Kronecker across dimensions. Products against the resulting
//! operator cost near-linear time in n for a fixed grid resolution; the grid
//! resolution is the accuracy knob.

use crate::errors::{GpError, Result};
use crate::kernels::{Kernel, KernelParams};
use crate::operator::LinearOperator;
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};

/// A regular interpolation grid covering the input domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<F: Float> {
    lo: Array1<F>,
    step: Array1<F>,
    sizes: Vec<usize>,
}

impl<F: Float> Grid<F> {
    /// Builds a regular grid from per-dimension bounds and node counts.
    /// Bounds should extend beyond the data by at least one grid cell so the
    /// cubic stencil stays inside the grid.
    pub fn regular(bounds: &[(F, F)], sizes: &[usize]) -> Result<Grid<F>> {
        if bounds.len() != sizes.len() || bounds.is_empty() {
            return Err(GpError::InvalidParameter(
                "grid bounds and sizes must agree and be non-empty".to_string(),
            ));
        }
        let mut lo = Array1::zeros(bounds.len());
        let mut step = Array1::zeros(bounds.len());
        for (d, (&(l, h), &g)) in bounds.iter().zip(sizes).enumerate() {
            if h <= l {
                return Err(GpError::InvalidParameter(format!(
                    "empty grid bounds ({l}, {h}) in dimension {d}"
                )));
            }
            if g < 4 {
                return Err(GpError::InvalidParameter(format!(
                    "grid needs at least 4 nodes per dimension, got {g} in dimension {d}"
                )));
            }
            lo[d] = l;
            step[d] = (h - l) / F::cast(g as f64 - 1.);
        }
        Ok(Grid {
            lo,
            step,
            sizes: sizes.to_vec(),
        })
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.sizes.len()
    }

    /// Per-dimension node counts
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Total number of grid nodes
    pub fn len(&self) -> usize {
        self.sizes.iter().product()
    }

    /// True when the grid has no nodes (never for a validly constructed grid)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Node coordinates along one dimension
    pub fn nodes(&self, dim: usize) -> Array1<F> {
        let g = self.sizes[dim];
        Array1::from_shape_fn(g, |i| self.lo[dim] + self.step[dim] * F::cast(i as f64))
    }
}

/// Sparse interpolation matrix W, (n, g), with one small row of cubic
/// convolution weights per real point. Rows sum to 1. Immutable once built.
#[derive(Debug, Clone)]
pub struct InterpMatrix<F: Float> {
    nrows: usize,
    ncols: usize,
    rows: Vec<Vec<(usize, F)>>,
}

/// Keys cubic convolution kernel with a = -0.5, evaluated at distance s >= 0.
fn keys_weight<F: Float>(s: F) -> F {
    let one = F::one();
    if s <= one {
        (F::cast(1.5) * s - F::cast(2.5)) * s * s + one
    } else if s < F::cast(2.) {
        F::cast(-0.5) * (((s - F::cast(5.)) * s + F::cast(8.)) * s - F::cast(4.))
    } else {
        F::zero()
    }
}

impl<F: Float> InterpMatrix<F> {
    /// Builds the cubic interpolation weights of each point of `x` against
    /// its 4 nearest grid nodes per dimension (4^d nodes in total).
    ///
    /// Points must lie at least one cell inside the grid boundary, otherwise
    /// the stencil would leave the grid and an
    /// [`GpError::InvalidParameter`] is reported.
    pub fn cubic(x: &ArrayBase<impl Data<Elem = F>, Ix2>, grid: &Grid<F>) -> Result<Self> {
        if x.ncols() != grid.ndim() {
            return Err(GpError::InvalidParameter(format!(
                "points have {} dimensions but the grid has {}",
                x.ncols(),
                grid.ndim()
            )));
        }
        let ndim = grid.ndim();
        // row-major strides over the grid nodes
        let mut strides = vec![1usize; ndim];
        for d in (0..ndim.saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * grid.sizes[d + 1];
        }

        let mut rows = Vec::with_capacity(x.nrows());
        for (p, point) in x.rows().into_iter().enumerate() {
            // per-dimension stencil: 4 node indices and their weights
            let mut stencils: Vec<([usize; 4], [F; 4])> = Vec::with_capacity(ndim);
            for d in 0..ndim {
                let g = grid.sizes[d];
                let t = (point[d] - grid.lo[d]) / grid.step[d];
                if t < F::one() || t > F::cast(g as f64 - 2.) {
                    return Err(GpError::InvalidParameter(format!(
                        "point {p} falls outside the interior of the interpolation grid \
                         in dimension {d}; widen the grid bounds"
                    )));
                }
                let j = num_traits::clamp(t.floor().to_usize().unwrap(), 1, g - 3);
                let u = t - F::cast(j as f64);
                let idx = [j - 1, j, j + 1, j + 2];
                let w = [
                    keys_weight(F::one() + u),
                    keys_weight(u),
                    keys_weight(F::one() - u),
                    keys_weight(F::cast(2.) - u),
                ];
                stencils.push((idx, w));
            }

            // tensor product of the per-dimension stencils
            let mut row: Vec<(usize, F)> = vec![(0, F::one())];
            for (d, (idx, w)) in stencils.iter().enumerate() {
                let mut next = Vec::with_capacity(row.len() * 4);
                for &(col, wv) in &row {
                    for q in 0..4 {
                        next.push((col + idx[q] * strides[d], wv * w[q]));
                    }
                }
                row = next;
            }
            rows.push(row);
        }

        Ok(InterpMatrix {
            nrows: x.nrows(),
            ncols: grid.len(),
            rows,
        })
    }

    /// Number of rows (real points)
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of columns (grid nodes)
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Sparse entries of one row
    pub fn row(&self, i: usize) -> &[(usize, F)] {
        &self.rows[i]
    }

    /// W v for a dense (g, k) block
    pub fn matmul(&self, v: &ndarray::ArrayView2<F>) -> Array2<F> {
        let mut out = Array2::zeros((self.nrows, v.ncols()));
        for (i, row) in self.rows.iter().enumerate() {
            for &(col, w) in row {
                for k in 0..v.ncols() {
                    out[[i, k]] = out[[i, k]] + w * v[[col, k]];
                }
            }
        }
        out
    }

    /// W^t v for a dense (n, k) block
    pub fn t_matmul(&self, v: &ndarray::ArrayView2<F>) -> Array2<F> {
        let mut out = Array2::zeros((self.ncols, v.ncols()));
        for (i, row) in self.rows.iter().enumerate() {
            for &(col, w) in row {
                for k in 0..v.ncols() {
                    out[[col, k]] = out[[col, k]] + w * v[[i, k]];
                }
            }
        }
        out
    }
}

/// Builds the structured grid kernel operator: a Toeplitz matrix per
/// dimension, Kronecker-combined, scaled once by the output scale. For
/// separable kernels such as RBF this equals the full kernel on the grid.
pub fn grid_kernel_op<F: Float, K: Kernel<F>>(
    kernel: &K,
    params: &KernelParams<F>,
    grid: &Grid<F>,
) -> LinearOperator<F> {
    let ell = params.lengthscale.value();
    let inv_ell2 = F::one() / (ell * ell);
    let factors: Vec<LinearOperator<F>> = (0..grid.ndim())
        .map(|d| {
            let g = grid.sizes[d];
            let col = Array1::from_shape_fn(g, |i| {
                let r = grid.step[d] * F::cast(i as f64);
                kernel.value(r * r * inv_ell2)
            });
            LinearOperator::Toeplitz(col)
        })
        .collect();
    let core = if factors.len() == 1 {
        factors.into_iter().next().unwrap()
    } else {
        LinearOperator::Kronecker(factors)
    };
    LinearOperator::Scaled(params.outputscale.value(), Box::new(core))
}

/// Builds the SKI approximation W K_grid W^t of K(x, x) as a structured
/// [`LinearOperator`].
pub fn ski_operator<F: Float, K: Kernel<F>>(
    kernel: &K,
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    params: &KernelParams<F>,
    grid: &Grid<F>,
) -> Result<LinearOperator<F>> {
    let w = InterpMatrix::cubic(x, grid)?;
    Ok(LinearOperator::Interpolated {
        w,
        grid: Box::new(grid_kernel_op(kernel, params, grid)),
    })
}

/// Gradient operators of the SKI covariance with respect to the lengthscale
/// and output scale, in that order. Both keep the W K_grid W^t structure so
/// that gradient traces stay near-linear in n: the lengthscale derivative of
/// the Kronecker grid kernel is a sum over dimensions by the product rule.
pub fn ski_param_grad_ops<F: Float, K: Kernel<F>>(
    kernel: &K,
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    params: &KernelParams<F>,
    grid: &Grid<F>,
) -> Result<Vec<LinearOperator<F>>> {
    let w = InterpMatrix::cubic(x, grid)?;
    let ell = params.lengthscale.value();
    let sigma2 = params.outputscale.value();
    let inv_ell2 = F::one() / (ell * ell);

    let base: Vec<Array1<F>> = (0..grid.ndim())
        .map(|d| {
            Array1::from_shape_fn(grid.sizes[d], |i| {
                let r = grid.step[d] * F::cast(i as f64);
                kernel.value(r * r * inv_ell2)
            })
        })
        .collect();
    let deriv: Vec<Array1<F>> = (0..grid.ndim())
        .map(|d| {
            Array1::from_shape_fn(grid.sizes[d], |i| {
                let r = grid.step[d] * F::cast(i as f64);
                let r2 = r * r * inv_ell2;
                kernel.value_dr2(r2) * (F::cast(-2.) * r2 / ell)
            })
        })
        .collect();

    let dl_core = if grid.ndim() == 1 {
        LinearOperator::Toeplitz(deriv[0].to_owned())
    } else {
        // product rule: one Kronecker term per differentiated dimension
        (0..grid.ndim())
            .map(|d| {
                let factors: Vec<LinearOperator<F>> = (0..grid.ndim())
                    .map(|e| {
                        let col = if e == d { &deriv[e] } else { &base[e] };
                        LinearOperator::Toeplitz(col.to_owned())
                    })
                    .collect();
                LinearOperator::Kronecker(factors)
            })
            .reduce(|a, b| LinearOperator::Sum(Box::new(a), Box::new(b)))
            .unwrap()
    };
    let ds_core = if grid.ndim() == 1 {
        LinearOperator::Toeplitz(base[0].to_owned())
    } else {
        LinearOperator::Kronecker(
            base.iter()
                .map(|col| LinearOperator::Toeplitz(col.to_owned()))
                .collect(),
        )
    };

    Ok(vec![
        LinearOperator::Interpolated {
            w: w.clone(),
            grid: Box::new(LinearOperator::Scaled(sigma2, Box::new(dl_core))),
        },
        LinearOperator::Interpolated {
            w,
            grid: Box::new(ds_core),
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{RbfKernel, cross_covariance};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, Axis};

    fn test_points_1d(n: usize) -> Array2<f64> {
        // deterministic, irrationally spaced points in (0, 1)
        Array1::from_shape_fn(n, |i| (0.37 + 0.61803398875 * i as f64).fract())
            .insert_axis(Axis(1))
    }

    #[test]
    fn test_interp_rows_sum_to_one() {
        let grid = Grid::regular(&[(-0.5, 1.5)], &[32]).unwrap();
        let x = test_points_1d(25);
        let w = InterpMatrix::cubic(&x, &grid).unwrap();
        for i in 0..w.nrows() {
            let sum: f64 = w.row(i).iter().map(|&(_, v)| v).sum();
            assert_abs_diff_eq!(1.0, sum, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_interp_reproduces_linear_functions() {
        // cubic convolution interpolation is exact for affine functions
        let grid = Grid::regular(&[(-0.5, 1.5)], &[32]).unwrap();
        let x = test_points_1d(17);
        let w = InterpMatrix::cubic(&x, &grid).unwrap();
        let nodes = grid.nodes(0).insert_axis(Axis(1));
        let f_nodes = nodes.mapv(|v| 2. * v + 0.3);
        let f_interp = w.matmul(&f_nodes.view());
        let f_exact = x.mapv(|v| 2. * v + 0.3);
        assert_abs_diff_eq!(f_exact, f_interp, epsilon = 1e-10);
    }

    #[test]
    fn test_out_of_grid_point_reported() {
        let grid = Grid::regular(&[(0., 1.)], &[16]).unwrap();
        let x = ndarray::array![[0.99]];
        // inside the bounds but within one cell of the boundary
        let err = InterpMatrix::cubic(&x, &grid).unwrap_err();
        assert!(matches!(err, GpError::InvalidParameter(_)));
    }

    #[test]
    fn test_ski_converges_to_dense_with_grid_resolution() {
        let x = test_points_1d(40);
        let params = KernelParams::<f64>::default();
        let kern = RbfKernel();
        let dense = cross_covariance(&kern, &x, &x, &params);
        let v = Array2::from_shape_fn((40, 1), |(i, _)| ((i * 7) % 5) as f64 - 2.);
        let reference = dense.dot(&v);

        let mut errs = vec![];
        for g in [16usize, 32, 64] {
            let grid = Grid::regular(&[(-0.5, 1.5)], &[g]).unwrap();
            let op = ski_operator(&kern, &x, &params, &grid).unwrap();
            let approx_prod = op.matmul(&v.view());
            let err = (&approx_prod - &reference)
                .mapv(f64::abs)
                .iter()
                .fold(0., |a: f64, &b| a.max(b));
            errs.push(err);
        }
        assert!(errs[2] < errs[0], "SKI error must shrink as the grid refines");
        assert!(errs[2] < 1e-3, "fine-grid SKI error too large: {}", errs[2]);
    }

    #[test]
    fn test_ski_2d_matches_dense_product_kernel() {
        // RBF factorizes across dimensions, so the Kronecker grid kernel is exact
        let n = 5;
        let mut x = Array2::zeros((n * n, 2));
        for i in 0..n {
            for j in 0..n {
                x[[i * n + j, 0]] = 0.1 + 0.2 * i as f64;
                x[[i * n + j, 1]] = 0.15 + 0.18 * j as f64;
            }
        }
        let params = KernelParams::<f64>::default();
        let kern = RbfKernel();
        let grid = Grid::regular(&[(-1., 2.), (-1., 2.)], &[40, 40]).unwrap();
        let op = ski_operator(&kern, &x, &params, &grid).unwrap();
        let dense = cross_covariance(&kern, &x, &x, &params);
        let v = Array2::from_shape_fn((n * n, 2), |(i, j)| (i % 3) as f64 - j as f64);
        let err = (&op.matmul(&v.view()) - &dense.dot(&v))
            .mapv(f64::abs)
            .iter()
            .fold(0., |a: f64, &b| a.max(b));
        assert!(err < 5e-2, "2d SKI product error too large: {err}");
    }

    #[test]
    fn test_ski_grad_ops_match_finite_differences() {
        let x = test_points_1d(12);
        let kern = RbfKernel();
        let mut params = KernelParams::<f64>::default();
        params.lengthscale.set_value(0.7, false).unwrap();
        params.outputscale.set_value(1.3, false).unwrap();
        let grid = Grid::regular(&[(-0.5, 1.5)], &[48]).unwrap();

        let grads = ski_param_grad_ops(&kern, &x, &params, &grid).unwrap();
        let dl = grads[0].to_dense(10_000).unwrap();
        let ds = grads[1].to_dense(10_000).unwrap();

        let h = 1e-6;
        let mut pp = params.clone();
        pp.lengthscale.set_value(0.7 + h, false).unwrap();
        let mut pm = params.clone();
        pm.lengthscale.set_value(0.7 - h, false).unwrap();
        let kp = ski_operator(&kern, &x, &pp, &grid).unwrap().to_dense(10_000).unwrap();
        let km = ski_operator(&kern, &x, &pm, &grid).unwrap().to_dense(10_000).unwrap();
        assert_abs_diff_eq!((kp - km) / (2. * h), dl, epsilon = 1e-5);

        let mut pp = params.clone();
        pp.outputscale.set_value(1.3 + h, false).unwrap();
        let mut pm = params.clone();
        pm.outputscale.set_value(1.3 - h, false).unwrap();
        let kp = ski_operator(&kern, &x, &pp, &grid).unwrap().to_dense(10_000).unwrap();
        let km = ski_operator(&kern, &x, &pm, &grid).unwrap().to_dense(10_000).unwrap();
        assert_abs_diff_eq!((kp - km) / (2. * h), ds, epsilon = 1e-5);
    }
}
