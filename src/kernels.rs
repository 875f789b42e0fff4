//! A module for stationary covariance kernels used by the GP model.
//!
//! The following kernels are implemented:
//! * squared exponential (RBF),
//! * matern 5/2.
//!
//! A kernel is defined by its radial profile over the scaled squared
//! distance `r2 = ||x - x'||^2 / lengthscale^2`; cross-covariance blocks and
//! parameter-gradient operators are assembled generically from the profile
//! and its derivative.

use crate::operator::LinearOperator;
use crate::parameters::BoundedParam;
use crate::utils::pairwise_sq_dists;
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use std::fmt;

/// A trait for the radial profile of a stationary kernel.
///
/// `value` is the unit-variance covariance at scaled squared distance `r2`;
/// `value_dr2` its derivative with respect to `r2`. Both must be finite at
/// `r2 = 0` so that gradients stay well defined on the diagonal.
pub trait Kernel<F: Float>: Clone + Copy + Default + fmt::Display + Sync {
    /// Covariance at scaled squared distance `r2`, without output scale
    fn value(&self, r2: F) -> F;
    /// Derivative of [`Kernel::value`] with respect to `r2`
    fn value_dr2(&self, r2: F) -> F;
}

/// Squared exponential (RBF) kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RbfKernel();

impl<F: Float> Kernel<F> for RbfKernel {
    /// exp( - r2 / 2 )
    fn value(&self, r2: F) -> F {
        F::exp(F::cast(-0.5) * r2)
    }

    fn value_dr2(&self, r2: F) -> F {
        F::cast(-0.5) * F::exp(F::cast(-0.5) * r2)
    }
}

impl fmt::Display for RbfKernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Rbf")
    }
}

/// Matern 5/2 kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Matern52Kernel();

impl<F: Float> Kernel<F> for Matern52Kernel {
    /// (1 + sqrt(5) r + 5/3 r2) exp( - sqrt(5) r )
    fn value(&self, r2: F) -> F {
        let r = r2.sqrt();
        let s5 = F::cast(5.).sqrt() * r;
        (F::one() + s5 + F::cast(5. / 3.) * r2) * F::exp(-s5)
    }

    fn value_dr2(&self, r2: F) -> F {
        let r = r2.sqrt();
        let s5 = F::cast(5.).sqrt() * r;
        F::cast(-5. / 6.) * (F::one() + s5) * F::exp(-s5)
    }
}

impl fmt::Display for Matern52Kernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Matern52")
    }
}

/// Box-bounded kernel and noise parameters owned by the model.
///
/// Each parameter carries its own bounds through [`BoundedParam`]; the raw
/// (unconstrained) values are what an external optimizer mutates.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelParams<F: Float> {
    /// Kernel length scale
    pub lengthscale: BoundedParam<F>,
    /// Kernel output scale (process variance)
    pub outputscale: BoundedParam<F>,
    /// Observation noise variance added to the training covariance diagonal
    pub noise: BoundedParam<F>,
}

impl<F: Float> Default for KernelParams<F> {
    fn default() -> Self {
        KernelParams {
            lengthscale: BoundedParam::clamped(F::cast(0.5), F::cast(1e-3), F::cast(1e2)),
            outputscale: BoundedParam::clamped(F::one(), F::cast(1e-3), F::cast(1e2)),
            noise: BoundedParam::clamped(F::cast(1e-2), F::cast(1e-6), F::cast(1e1)),
        }
    }
}

impl<F: Float> fmt::Display for KernelParams<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "lengthscale={}, outputscale={}, noise={}",
            self.lengthscale.value(),
            self.outputscale.value(),
            self.noise.value()
        )
    }
}

/// Number of trainable parameters, in the order lengthscale, outputscale, noise
pub const N_PARAMS: usize = 3;

impl<F: Float> KernelParams<F> {
    /// Raw (unconstrained) parameter values in declaration order
    pub fn raw(&self) -> Array1<F> {
        Array1::from_vec(vec![
            self.lengthscale.raw(),
            self.outputscale.raw(),
            self.noise.raw(),
        ])
    }

    /// Overwrite raw parameter values in declaration order
    pub fn set_raw(&mut self, raw: &Array1<F>) {
        self.lengthscale.set_raw(raw[0]);
        self.outputscale.set_raw(raw[1]);
        self.noise.set_raw(raw[2]);
    }

    /// Jacobian of the constrained values with respect to the raw values
    pub fn grad_factors(&self) -> Array1<F> {
        Array1::from_vec(vec![
            self.lengthscale.grad_factor(),
            self.outputscale.grad_factor(),
            self.noise.grad_factor(),
        ])
    }
}

/// Cross covariance matrix k(x, y), shaped (nrows(x), nrows(y)).
pub fn cross_covariance<F: Float, K: Kernel<F>>(
    kernel: &K,
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
    params: &KernelParams<F>,
) -> Array2<F> {
    let ell = params.lengthscale.value();
    let sigma2 = params.outputscale.value();
    let inv_ell2 = F::one() / (ell * ell);
    pairwise_sq_dists(x, y).mapv(|d2| sigma2 * kernel.value(d2 * inv_ell2))
}

/// Self covariance diagonal k(x_i, x_i) for n points.
pub fn self_diag<F: Float, K: Kernel<F>>(kernel: &K, n: usize, params: &KernelParams<F>) -> Array1<F> {
    Array1::from_elem(n, params.outputscale.value() * kernel.value(F::zero()))
}

/// Gradient operators dK/d(theta) for the trainable parameters, in the order
/// lengthscale, outputscale, noise. The noise gradient is the identity since
/// noise enters as sigma_n^2 I on the training covariance.
pub fn param_grad_ops<F: Float, K: Kernel<F>>(
    kernel: &K,
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    params: &KernelParams<F>,
) -> Vec<LinearOperator<F>> {
    let ell = params.lengthscale.value();
    let sigma2 = params.outputscale.value();
    let inv_ell2 = F::one() / (ell * ell);
    let d2 = pairwise_sq_dists(x, x);

    // dK/d(ell): r2 = d2/ell^2 so dr2/d(ell) = -2 r2 / ell
    let dl = d2.mapv(|v| {
        let r2 = v * inv_ell2;
        sigma2 * kernel.value_dr2(r2) * (F::cast(-2.) * r2 / ell)
    });
    // dK/d(sigma_f^2) = K / sigma_f^2
    let ds = d2.mapv(|v| kernel.value(v * inv_ell2));

    vec![
        LinearOperator::Dense(dl),
        LinearOperator::Dense(ds),
        LinearOperator::Diagonal(Array1::ones(x.nrows())),
    ]
}
