use thiserror::Error;

/// A result type for GP inference algorithms
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when using a [`GaussianProcess`](crate::GaussianProcess) model
/// or one of its iterative building blocks
#[derive(Error, Debug)]
pub enum GpError {
    /// When a kernel or noise parameter violates its declared bounds
    #[error("InvalidParameter error: {0}")]
    InvalidParameter(String),
    /// When the kernel matrix stays indefinite after bounded jitter escalation
    #[error("NumericalFailure error: {0}")]
    NumericalFailure(String),
    /// When an operation would materialize a matrix beyond configured memory bounds
    #[error("ResourceLimitExceeded error: {0}")]
    ResourceLimitExceeded(String),
    /// When likelihood computation fails
    #[error("Likelihood computation error: {0}")]
    LikelihoodError(String),
    /// When dense linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
}
