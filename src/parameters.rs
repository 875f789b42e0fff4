use crate::errors::{GpError, Result};
use crate::kernels::{Kernel, KernelParams};
use crate::ski::Grid;
use linfa::{Float, ParamGuard};

/// A box-bounded scalar parameter stored as an unconstrained raw value.
///
/// The constrained value lives strictly inside `(lo, hi)` through a scaled
/// sigmoid bijection; optimizers mutate the raw value freely and can never
/// push the constrained value out of its box. The transform jacobian is
/// exposed for chain-rule gradients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundedParam<F: Float> {
    raw: F,
    lo: F,
    hi: F,
}

impl<F: Float> BoundedParam<F> {
    /// Relative margin kept from the bounds when clamping
    const MARGIN: f64 = 1e-6;

    /// Creates a parameter with given value and bounds.
    /// The value must lie strictly inside `(lo, hi)`.
    pub fn new(value: F, lo: F, hi: F) -> Result<Self> {
        if lo >= hi {
            return Err(GpError::InvalidParameter(format!(
                "empty parameter box ({lo}, {hi})"
            )));
        }
        let mut p = BoundedParam { raw: F::zero(), lo, hi };
        p.set_value(value, false)?;
        Ok(p)
    }

    /// Creates a parameter, clamping the value into the box when needed.
    pub fn clamped(value: F, lo: F, hi: F) -> Self {
        let mut p = BoundedParam { raw: F::zero(), lo, hi };
        p.set_value(value, true).unwrap();
        p
    }

    /// Constrained value, always inside `(lo, hi)`
    pub fn value(&self) -> F {
        self.lo + (self.hi - self.lo) * sigmoid(self.raw)
    }

    /// Sets the constrained value. Out-of-box values are an
    /// [`GpError::InvalidParameter`] unless `clamp` is set.
    pub fn set_value(&mut self, value: F, clamp: bool) -> Result<()> {
        let margin = F::cast(Self::MARGIN) * (self.hi - self.lo);
        let value = if clamp {
            num_traits::clamp(value, self.lo + margin, self.hi - margin)
        } else {
            if value <= self.lo || value >= self.hi {
                return Err(GpError::InvalidParameter(format!(
                    "value {} outside its box ({}, {})",
                    value, self.lo, self.hi
                )));
            }
            value
        };
        let u = (value - self.lo) / (self.hi - self.lo);
        self.raw = F::ln(u / (F::one() - u));
        Ok(())
    }

    /// Raw (unconstrained) value
    pub fn raw(&self) -> F {
        self.raw
    }

    /// Overwrites the raw value
    pub fn set_raw(&mut self, raw: F) {
        self.raw = raw;
    }

    /// Bounds of the parameter box
    pub fn bounds(&self) -> (F, F) {
        (self.lo, self.hi)
    }

    /// d(value)/d(raw), the transform jacobian
    pub fn grad_factor(&self) -> F {
        let s = sigmoid(self.raw);
        (self.hi - self.lo) * s * (F::one() - s)
    }
}

fn sigmoid<F: Float>(x: F) -> F {
    F::one() / (F::one() + F::exp(-x))
}

/// Configuration of the iterative linear-algebra machinery.
///
/// These options are threaded explicitly through every solve instead of
/// living in ambient global state.
#[derive(Debug, Clone, PartialEq)]
pub struct IterConfig<F: Float> {
    /// Relative residual threshold for CG convergence
    pub cg_tolerance: F,
    /// CG iteration cap
    pub cg_max_iter: usize,
    /// Lanczos step budget for SLQ and the LOVE cache
    pub lanczos_rank: usize,
    /// Number of random probe vectors for stochastic trace estimation
    pub n_probes: usize,
    /// Initial diagonal stabilization, relative to the mean diagonal entry
    pub jitter: F,
    /// Bounded number of jitter escalation retries before giving up
    pub max_jitter_attempts: usize,
    /// Maximum entry count allowed for explicit operator materialization
    pub max_dense: usize,
    /// Clamp out-of-box parameter values instead of reporting them
    pub clamp_params: bool,
    /// Seed for probe vector generation
    pub seed: u64,
}

impl<F: Float> Default for IterConfig<F> {
    fn default() -> Self {
        IterConfig {
            cg_tolerance: F::cast(1e-6),
            cg_max_iter: 256,
            lanczos_rank: 20,
            n_probes: 10,
            jitter: F::cast(1e-6),
            max_jitter_attempts: 3,
            max_dense: 16_000_000,
            clamp_params: false,
            seed: 42,
        }
    }
}

/// A set of validated GP parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct GpValidParams<F: Float, Kern: Kernel<F>> {
    /// Covariance kernel
    pub(crate) kernel: Kern,
    /// Initial kernel and noise parameters
    pub(crate) kernel_params: KernelParams<F>,
    /// Iterative solver configuration
    pub(crate) config: IterConfig<F>,
    /// Optional interpolation grid enabling the SKI training covariance
    pub(crate) grid: Option<Grid<F>>,
    /// Number of internal gradient steps run by `fit`
    pub(crate) fit_steps: usize,
    /// Step size of the internal gradient loop, in raw parameter space
    pub(crate) learning_rate: F,
}

impl<F: Float, Kern: Kernel<F>> Default for GpValidParams<F, Kern> {
    fn default() -> GpValidParams<F, Kern> {
        GpValidParams {
            kernel: Kern::default(),
            kernel_params: KernelParams::default(),
            config: IterConfig::default(),
            grid: None,
            fit_steps: 50,
            learning_rate: F::cast(0.1),
        }
    }
}

impl<F: Float, Kern: Kernel<F>> GpValidParams<F, Kern> {
    /// Get covariance kernel
    pub fn kernel(&self) -> &Kern {
        &self.kernel
    }

    /// Get initial kernel parameters
    pub fn kernel_params(&self) -> &KernelParams<F> {
        &self.kernel_params
    }

    /// Get iterative solver configuration
    pub fn config(&self) -> &IterConfig<F> {
        &self.config
    }

    /// Get the SKI grid when configured
    pub fn grid(&self) -> Option<&Grid<F>> {
        self.grid.as_ref()
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the execution of
/// the [GP algorithm](struct.GaussianProcess.html).
pub struct GpParams<F: Float, Kern: Kernel<F>>(pub(crate) GpValidParams<F, Kern>);

impl<F: Float, Kern: Kernel<F>> GpParams<F, Kern> {
    /// A constructor for GP parameters given a covariance kernel
    pub fn new(kernel: Kern) -> GpParams<F, Kern> {
        Self(GpValidParams {
            kernel,
            ..Default::default()
        })
    }

    /// Set initial kernel and noise parameters.
    pub fn kernel_params(mut self, kernel_params: KernelParams<F>) -> Self {
        self.0.kernel_params = kernel_params;
        self
    }

    /// Set initial length scale, keeping the default bounds.
    pub fn lengthscale(mut self, value: F) -> Self {
        let (lo, hi) = self.0.kernel_params.lengthscale.bounds();
        self.0.kernel_params.lengthscale = BoundedParam::clamped(value, lo, hi);
        self
    }

    /// Set initial output scale, keeping the default bounds.
    pub fn outputscale(mut self, value: F) -> Self {
        let (lo, hi) = self.0.kernel_params.outputscale.bounds();
        self.0.kernel_params.outputscale = BoundedParam::clamped(value, lo, hi);
        self
    }

    /// Set initial noise variance, keeping the default bounds.
    pub fn noise(mut self, value: F) -> Self {
        let (lo, hi) = self.0.kernel_params.noise.bounds();
        self.0.kernel_params.noise = BoundedParam::clamped(value, lo, hi);
        self
    }

    /// Set iterative solver configuration.
    pub fn config(mut self, config: IterConfig<F>) -> Self {
        self.0.config = config;
        self
    }

    /// Enable the SKI training covariance on the given grid.
    pub fn grid(mut self, grid: Grid<F>) -> Self {
        self.0.grid = Some(grid);
        self
    }

    /// Set the number of internal gradient steps run by `fit`.
    ///
    /// Zero is allowed and leaves the initial parameters untouched, which is
    /// the mode to use when an external optimizer drives
    /// [`neg_mll_grads`](crate::GaussianProcess::neg_mll_grads) itself.
    pub fn fit_steps(mut self, fit_steps: usize) -> Self {
        self.0.fit_steps = fit_steps;
        self
    }

    /// Set the raw-space step size of the internal gradient loop.
    pub fn learning_rate(mut self, learning_rate: F) -> Self {
        self.0.learning_rate = learning_rate;
        self
    }
}

impl<F: Float, Kern: Kernel<F>> From<GpValidParams<F, Kern>> for GpParams<F, Kern> {
    fn from(valid: GpValidParams<F, Kern>) -> Self {
        GpParams(valid)
    }
}

impl<F: Float, Kern: Kernel<F>> ParamGuard for GpParams<F, Kern> {
    type Checked = GpValidParams<F, Kern>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let c = &self.0.config;
        if c.cg_tolerance <= F::zero() {
            return Err(GpError::InvalidParameter(
                "`cg_tolerance` must be positive".to_string(),
            ));
        }
        if c.cg_max_iter == 0 {
            return Err(GpError::InvalidParameter(
                "`cg_max_iter` cannot be 0".to_string(),
            ));
        }
        if c.lanczos_rank < 2 {
            return Err(GpError::InvalidParameter(
                "`lanczos_rank` must be at least 2".to_string(),
            ));
        }
        if c.n_probes == 0 {
            return Err(GpError::InvalidParameter(
                "`n_probes` cannot be 0".to_string(),
            ));
        }
        if c.max_jitter_attempts == 0 {
            return Err(GpError::InvalidParameter(
                "`max_jitter_attempts` cannot be 0".to_string(),
            ));
        }
        if self.0.learning_rate <= F::zero() {
            return Err(GpError::InvalidParameter(
                "`learning_rate` must be positive".to_string(),
            ));
        }
        if let Some(grid) = &self.0.grid {
            if grid.sizes().iter().any(|&g| g < 4) {
                return Err(GpError::InvalidParameter(
                    "SKI grids need at least 4 nodes per dimension for the cubic stencil"
                        .to_string(),
                ));
            }
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}
