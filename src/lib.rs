//! This library implements [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process) regression
//! with iterative linear algebra, so that exact inference scales past the
//! O(N^3) cost of a Cholesky factorization of the N x N training covariance.
//!
//! The training covariance is only ever accessed through matrix-vector
//! products on a structured [`LinearOperator`]: posterior means come from
//! batched conjugate-gradient solves, marginal-likelihood values and
//! gradients from stochastic Lanczos quadrature, and predictive variances
//! from a precomputed low-rank LOVE cache answering each query in O(kN).
//! An optional structured-kernel-interpolation (SKI) grid replaces the dense
//! kernel matrix by a sparse-interpolated Toeplitz/Kronecker operator whose
//! products cost near-linear time in N.
//!
//! GP methods are implemented by [GaussianProcess] parameterized by
//! [GpParams]; the iterative machinery is tuned through [IterConfig].
//!
//! ```no_run
//! use itergp::Kriging;
//! use linfa::prelude::*;
//! use ndarray::{Array, Axis, array};
//!
//! let xt = Array::linspace(0., 1., 30).insert_axis(Axis(1));
//! let yt = xt.mapv(|x: f64| (6.28 * x).sin()).remove_axis(Axis(1));
//! let gp = Kriging::params()
//!     .noise(1e-4)
//!     .fit(&Dataset::new(xt, yt))
//!     .expect("GP fit");
//! let mean = gp.predict(&array![[0.5]]).expect("prediction");
//! let var = gp.predict_var(&array![[0.5]]).expect("variance");
//! assert_eq!(1, mean.len());
//! assert_eq!(1, var.len());
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
mod errors;
pub mod kernels;
pub mod lanczos;
pub mod love;
pub mod operator;
pub mod ski;
pub mod solver;

mod parameters;
mod utils;

pub use algorithm::*;
pub use errors::*;
pub use operator::LinearOperator;
pub use parameters::*;
