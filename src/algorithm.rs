//! Exact Gaussian-process regression through iterative linear algebra.
//!
//! The training covariance is only ever touched through
//! [`LinearOperator`] products: posterior means come from conjugate-gradient
//! solves, marginal-likelihood values and gradients from stochastic Lanczos
//! quadrature, and predictive variances from a low-rank LOVE cache. Nothing
//! here requires an O(n^3) factorization of the n x n training covariance.

use crate::errors::{GpError, Result};
use crate::kernels::{
    self, Kernel, KernelParams, N_PARAMS, RbfKernel, cross_covariance, self_diag,
};
use crate::lanczos::Slq;
use crate::love::LoveCache;
use crate::operator::LinearOperator;
use crate::parameters::{GpParams, GpValidParams};
use crate::ski::{ski_operator, ski_param_grad_ops};
use crate::solver::{CgSolver, with_jitter_escalation};
use crate::utils::{NormalizedData, rademacher_probes};

use linfa::prelude::{DatasetBase, Fit, Float, PredictInplace};
use linfa_linalg::cholesky::*;
use log::debug;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
use ndarray_rand::RandomExt;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Normal;
use rand_xoshiro::Xoshiro256Plus;

use std::cell::{Cell, RefCell};
use std::fmt;

/// Probe seeds added alongside the training targets when building the LOVE
/// cache; each contributes its own Lanczos basis block.
const LOVE_EXTRA_SEEDS: usize = 3;

/// A Gaussian-process model whose training covariance is accessed only
/// through matrix-vector products.
///
/// The model carries an explicit mode:
///
/// * in **training** mode hyperparameters are mutable, every query is
///   answered by a fresh conjugate-gradient solve, and nothing is cached;
/// * in **evaluation** mode hyperparameters are frozen, the representer
///   weights and the LOVE variance cache are computed once and reused, and
///   variance queries cost O(k n) per point instead of a full solve.
///
/// `fit` returns the model in evaluation mode. Call
/// [`train`](GaussianProcess::train) to unfreeze it.
///
/// Implementation of the iterative inference scheme of Gardner et al.,
/// "GPyTorch: Blackbox Matrix-Matrix Gaussian Process Inference with GPU
/// Acceleration", NeurIPS 2018, and Pleiss et al., "Constant-Time Predictive
/// Distributions for Gaussian Processes", ICML 2018 (LOVE).
pub struct GaussianProcess<F: Float, Kern: Kernel<F>> {
    /// Current kernel and noise parameters
    kernel_params: KernelParams<F>,
    /// Parameters used for fitting
    params: GpValidParams<F, Kern>,
    /// Normalized training inputs
    xt_norm: NormalizedData<F>,
    /// Normalized training targets, shaped (n, 1)
    yt_norm: NormalizedData<F>,
    /// Negative marginal log-likelihood value per fit step
    loss_history: Vec<F>,
    /// Mode flag, see the struct docs
    training: bool,
    /// Representer weights A^-1 y, cached in evaluation mode
    alpha: RefCell<Option<Array1<F>>>,
    /// LOVE variance cache, built lazily in evaluation mode
    love: RefCell<Option<LoveCache<F>>>,
    /// Number of LOVE cache builds, exposed for cache-lifetime checks
    love_rebuilds: Cell<usize>,
    /// Whether the most recent iterative solve reached its tolerance
    solves_converged: Cell<bool>,
}

/// Kriging as GP regression shortcut with a squared-exponential kernel
pub type Kriging<F> = GpParams<F, RbfKernel>;

impl<F: Float> Kriging<F> {
    /// Kriging parameters constructor
    pub fn params() -> GpParams<F, RbfKernel> {
        GpParams::new(RbfKernel())
    }
}

impl<F: Float, Kern: Kernel<F>> Clone for GaussianProcess<F, Kern> {
    fn clone(&self) -> Self {
        Self {
            kernel_params: self.kernel_params.clone(),
            params: self.params.clone(),
            xt_norm: self.xt_norm.clone(),
            yt_norm: self.yt_norm.clone(),
            loss_history: self.loss_history.clone(),
            training: self.training,
            alpha: RefCell::new(self.alpha.borrow().clone()),
            love: RefCell::new(self.love.borrow().clone()),
            love_rebuilds: Cell::new(self.love_rebuilds.get()),
            solves_converged: Cell::new(self.solves_converged.get()),
        }
    }
}

impl<F: Float, Kern: Kernel<F>> fmt::Display for GaussianProcess<F, Kern> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GP(kernel={}, {}, mode={})",
            self.params.kernel(),
            self.kernel_params,
            if self.training { "training" } else { "eval" },
        )
    }
}

impl<F: Float, Kern: Kernel<F>> GaussianProcess<F, Kern> {
    /// Gp parameters constructor
    pub fn params<NewKern: Kernel<F>>(kernel: NewKern) -> GpParams<F, NewKern> {
        GpParams::new(kernel)
    }

    /// Current kernel and noise parameters
    pub fn kernel_params(&self) -> &KernelParams<F> {
        &self.kernel_params
    }

    /// Negative marginal log-likelihood recorded at each internal fit step
    pub fn loss_history(&self) -> &[F] {
        &self.loss_history
    }

    /// Whether the model is in training mode
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Retrieve input and output dimensions
    pub fn dims(&self) -> (usize, usize) {
        (self.xt_norm.ncols(), self.yt_norm.ncols())
    }

    /// Number of times the LOVE variance cache has been built
    pub fn love_rebuilds(&self) -> usize {
        self.love_rebuilds.get()
    }

    /// Whether the conjugate-gradient solves behind the most recent query
    /// reached the configured tolerance. When a solve runs out of iterations
    /// it logs a warning and returns its best iterate; this flag lets callers
    /// detect that without scraping logs.
    pub fn last_solve_converged(&self) -> bool {
        self.solves_converged.get()
    }

    /// Switches to training mode, dropping every derived cache.
    pub fn train(&mut self) {
        self.training = true;
        self.drop_caches();
    }

    /// Switches to evaluation mode. Caches are built lazily on first use.
    pub fn eval(&mut self) {
        self.training = false;
    }

    /// Sets the kernel length scale. Only legal in training mode.
    pub fn set_lengthscale(&mut self, value: F) -> Result<()> {
        self.check_trainable("lengthscale")?;
        let clamp = self.params.config().clamp_params;
        self.kernel_params.lengthscale.set_value(value, clamp)?;
        self.drop_caches();
        Ok(())
    }

    /// Sets the kernel output scale. Only legal in training mode.
    pub fn set_outputscale(&mut self, value: F) -> Result<()> {
        self.check_trainable("outputscale")?;
        let clamp = self.params.config().clamp_params;
        self.kernel_params.outputscale.set_value(value, clamp)?;
        self.drop_caches();
        Ok(())
    }

    /// Sets the observation noise variance. Only legal in training mode.
    pub fn set_noise(&mut self, value: F) -> Result<()> {
        self.check_trainable("noise")?;
        let clamp = self.params.config().clamp_params;
        self.kernel_params.noise.set_value(value, clamp)?;
        self.drop_caches();
        Ok(())
    }

    /// Overwrites all raw (unconstrained) parameter values at once, the
    /// entry point for external optimizers. Only legal in training mode.
    pub fn set_raw_params(&mut self, raw: &Array1<F>) -> Result<()> {
        self.check_trainable("parameters")?;
        if raw.len() != N_PARAMS {
            return Err(GpError::InvalidParameter(format!(
                "expected {} raw parameter values, got {}",
                N_PARAMS,
                raw.len()
            )));
        }
        self.kernel_params.set_raw(raw);
        self.drop_caches();
        Ok(())
    }

    fn check_trainable(&self, what: &str) -> Result<()> {
        if self.training {
            Ok(())
        } else {
            Err(GpError::InvalidParameter(format!(
                "cannot set {what} on a model in evaluation mode; call train() first"
            )))
        }
    }

    fn drop_caches(&self) {
        *self.alpha.borrow_mut() = None;
        *self.love.borrow_mut() = None;
    }

    /// Training covariance A = K(X, X) + sigma_n^2 I as an operator. With a
    /// grid configured the kernel term is the structured SKI approximation,
    /// otherwise it is the dense kernel matrix.
    fn train_operator(&self) -> Result<LinearOperator<F>> {
        let n = self.xt_norm.nrows();
        let kernel_op = match self.params.grid() {
            Some(grid) => ski_operator(
                self.params.kernel(),
                &self.xt_norm.data,
                &self.kernel_params,
                grid,
            )?,
            None => LinearOperator::Dense(cross_covariance(
                self.params.kernel(),
                &self.xt_norm.data,
                &self.xt_norm.data,
                &self.kernel_params,
            )),
        };
        let noise = Array1::from_elem(n, self.kernel_params.noise.value());
        Ok(LinearOperator::Sum(
            Box::new(kernel_op),
            Box::new(LinearOperator::Diagonal(noise)),
        ))
    }

    /// Gradient operators dA/d(theta), in parameter declaration order.
    fn grad_ops(&self) -> Result<Vec<LinearOperator<F>>> {
        let ops = match self.params.grid() {
            Some(grid) => {
                let mut ops = ski_param_grad_ops(
                    self.params.kernel(),
                    &self.xt_norm.data,
                    &self.kernel_params,
                    grid,
                )?;
                ops.push(LinearOperator::Diagonal(Array1::ones(self.xt_norm.nrows())));
                ops
            }
            None => kernels::param_grad_ops(
                self.params.kernel(),
                &self.xt_norm.data,
                &self.kernel_params,
            ),
        };
        Ok(ops)
    }

    fn solver(&self) -> CgSolver<F> {
        let c = self.params.config();
        CgSolver::new(c.cg_tolerance, c.cg_max_iter)
    }

    /// Representer weights alpha = A^-1 y in normalized target space.
    /// Recomputed on every call in training mode, cached in evaluation mode.
    fn alpha(&self) -> Result<Array1<F>> {
        if !self.training {
            if let Some(alpha) = self.alpha.borrow().as_ref() {
                return Ok(alpha.to_owned());
            }
        }
        let c = self.params.config();
        let op = self.train_operator()?;
        let sol = self.solver().solve_with_jitter(
            &op,
            &self.yt_norm.data.view(),
            c.jitter,
            c.max_jitter_attempts,
        )?;
        self.solves_converged.set(sol.converged);
        let alpha = sol.x.column(0).to_owned();
        if !self.training {
            *self.alpha.borrow_mut() = Some(alpha.to_owned());
        }
        Ok(alpha)
    }

    /// Ensures the LOVE cache exists, building it from the training targets
    /// plus a few probe seeds. The targets alone span only their own Krylov
    /// space; the probes widen the basis so that cross-covariance queries
    /// project onto it accurately.
    fn ensure_love(&self) -> Result<()> {
        if self.love.borrow().is_some() {
            return Ok(());
        }
        let c = self.params.config();
        let op = self.train_operator()?;
        let n = self.xt_norm.nrows();
        let y = self.yt_norm.data.column(0);
        let mut rng = Xoshiro256Plus::seed_from_u64(c.seed);
        let mut seeds = rademacher_probes(n, LOVE_EXTRA_SEEDS + 1, &mut rng);
        // constant targets normalize to zero; keep the Rademacher column then
        if y.dot(&y) > F::zero() {
            seeds.column_mut(0).assign(&y);
        }
        let cache = with_jitter_escalation(&op, c.jitter, c.max_jitter_attempts, |op| {
            LoveCache::build(op, &seeds.view(), c.lanczos_rank)
        })?;
        debug!("built LOVE cache at rank {}", cache.rank());
        *self.love.borrow_mut() = Some(cache);
        self.love_rebuilds.set(self.love_rebuilds.get() + 1);
        Ok(())
    }

    /// Negative marginal log-likelihood of the training data under the
    /// current parameters, 0.5 (y^t A^-1 y + log det A + n ln 2 pi) in
    /// normalized target space.
    pub fn neg_mll(&self) -> Result<F> {
        let c = self.params.config();
        let op = self.train_operator()?;
        let alpha = self.alpha()?;
        let slq = Slq::new(c.n_probes, c.lanczos_rank, c.seed);
        let logdet = with_jitter_escalation(&op, c.jitter, c.max_jitter_attempts, |op| {
            slq.logdet(op)
        })?;
        let y = self.yt_norm.data.column(0);
        let n = F::cast(self.xt_norm.nrows() as f64);
        let two_pi = F::cast(2. * std::f64::consts::PI);
        Ok(F::cast(0.5) * (y.dot(&alpha) + logdet + n * two_pi.ln()))
    }

    /// Negative marginal log-likelihood and its gradient with respect to the
    /// raw (unconstrained) parameter values, in declaration order.
    ///
    /// The gradient is 0.5 (tr(A^-1 dA) - alpha^t dA alpha) per parameter,
    /// with the trace terms estimated by stochastic Lanczos quadrature and a
    /// single batched CG solve shared across parameters, then chained
    /// through the bound-constraint transform.
    pub fn neg_mll_grads(&self) -> Result<(F, Array1<F>)> {
        let c = self.params.config();
        let op = self.train_operator()?;
        let grad_ops = self.grad_ops()?;
        let alpha = self.alpha()?;
        let solver = self.solver();

        let slq = Slq::new(c.n_probes, c.lanczos_rank, c.seed);
        let (logdet, traces, converged) =
            with_jitter_escalation(&op, c.jitter, c.max_jitter_attempts, |op| {
                slq.logdet_with_grads(op, &grad_ops, &solver)
            })?;
        self.solves_converged.set(converged);
        if !converged {
            debug!("gradient trace solves hit the CG iteration cap");
        }

        let y = self.yt_norm.data.column(0);
        let n = F::cast(self.xt_norm.nrows() as f64);
        let two_pi = F::cast(2. * std::f64::consts::PI);
        let value = F::cast(0.5) * (y.dot(&alpha) + logdet + n * two_pi.ln());

        let factors = self.kernel_params.grad_factors();
        let mut grads = Array1::zeros(grad_ops.len());
        for (i, gop) in grad_ops.iter().enumerate() {
            let da = gop.matvec(&alpha.view());
            grads[i] = F::cast(0.5) * (traces[i] - alpha.dot(&da)) * factors[i];
        }
        Ok((value, grads))
    }

    /// Predict output values at n given `x` points of nx components
    /// specified as a (n, nx) matrix. Returns n scalar output values as a
    /// vector (n,).
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        let xnorm = (x - &self.xt_norm.mean) / &self.xt_norm.std;
        let kxs = cross_covariance(
            self.params.kernel(),
            &xnorm,
            &self.xt_norm.data,
            &self.kernel_params,
        );
        let alpha = self.alpha()?;
        let y_ = kxs.dot(&alpha);
        Ok(&y_ * self.yt_norm.std[0] + self.yt_norm.mean[0])
    }

    /// Predict variance values at n given `x` points of nx components
    /// specified as a (n, nx) matrix, as a (n,) vector.
    ///
    /// In evaluation mode this goes through the LOVE cache in O(k n) per
    /// point; in training mode it falls back to exact per-query CG solves.
    pub fn predict_var(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        if self.training {
            return self.predict_var_exact(x);
        }
        self.ensure_love()?;
        let xnorm = (x - &self.xt_norm.mean) / &self.xt_norm.std;
        let kxs = cross_covariance(
            self.params.kernel(),
            &xnorm,
            &self.xt_norm.data,
            &self.kernel_params,
        );
        let prior = self_diag(self.params.kernel(), x.nrows(), &self.kernel_params);

        let love = self.love.borrow();
        let cache = love.as_ref().unwrap();
        let proj = cache.project(&kxs.t())?;
        let explained = proj.mapv(|v| v * v).sum_axis(Axis(0));
        let mse = (prior - explained) * (self.yt_norm.std[0] * self.yt_norm.std[0]);

        // numerical round-off can push tiny variances slightly negative
        Ok(mse.mapv(|v| if v < F::zero() { F::zero() } else { v }))
    }

    /// Predict variance values by exact conjugate-gradient solves against
    /// the training covariance, regardless of mode. One batched solve with
    /// `x.nrows()` right-hand sides.
    pub fn predict_var_exact(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array1<F>> {
        let c = self.params.config();
        let xnorm = (x - &self.xt_norm.mean) / &self.xt_norm.std;
        let kxs = cross_covariance(
            self.params.kernel(),
            &xnorm,
            &self.xt_norm.data,
            &self.kernel_params,
        );
        let prior = self_diag(self.params.kernel(), x.nrows(), &self.kernel_params);

        let op = self.train_operator()?;
        let sol = self.solver().solve_with_jitter(
            &op,
            &kxs.t(),
            c.jitter,
            c.max_jitter_attempts,
        )?;
        self.solves_converged.set(sol.converged);
        let mut mse = Array1::zeros(x.nrows());
        for i in 0..x.nrows() {
            mse[i] = prior[i] - kxs.row(i).dot(&sol.x.column(i));
        }
        mse.mapv_inplace(|v| v * self.yt_norm.std[0] * self.yt_norm.std[0]);
        Ok(mse.mapv(|v| if v < F::zero() { F::zero() } else { v }))
    }

    /// Predict both output values and variance at n given `x` points
    pub fn predict_valvar(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        Ok((self.predict(x)?, self.predict_var(x)?))
    }

    /// Posterior covariance matrix between the given points, by exact CG
    /// solves. Shaped (n, n).
    pub fn predict_cov(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        let c = self.params.config();
        let xnorm = (x - &self.xt_norm.mean) / &self.xt_norm.std;
        let kxs = cross_covariance(
            self.params.kernel(),
            &xnorm,
            &self.xt_norm.data,
            &self.kernel_params,
        );
        let kss = cross_covariance(self.params.kernel(), &xnorm, &xnorm, &self.kernel_params);

        let op = self.train_operator()?;
        let sol = self.solver().solve_with_jitter(
            &op,
            &kxs.t(),
            c.jitter,
            c.max_jitter_attempts,
        )?;
        self.solves_converged.set(sol.converged);
        let mut cov = kss - kxs.dot(&sol.x);
        cov.mapv_inplace(|v| v * self.yt_norm.std[0] * self.yt_norm.std[0]);
        Ok(cov)
    }

    /// Posterior covariance matrix through the LOVE cache, avoiding any
    /// solve at query time. Only legal in evaluation mode.
    pub fn predict_cov_fast(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        if self.training {
            return Err(GpError::InvalidParameter(
                "predict_cov_fast needs evaluation mode; call eval() first".to_string(),
            ));
        }
        self.ensure_love()?;
        let xnorm = (x - &self.xt_norm.mean) / &self.xt_norm.std;
        let kxs = cross_covariance(
            self.params.kernel(),
            &xnorm,
            &self.xt_norm.data,
            &self.kernel_params,
        );
        let kss = cross_covariance(self.params.kernel(), &xnorm, &xnorm, &self.kernel_params);

        let love = self.love.borrow();
        let cache = love.as_ref().unwrap();
        let proj = cache.project(&kxs.t())?;
        let mut cov = kss - proj.t().dot(&proj);
        cov.mapv_inplace(|v| v * self.yt_norm.std[0] * self.yt_norm.std[0]);
        Ok(cov)
    }

    /// Sample the posterior process at the given points for `n_traj`
    /// trajectories, shaped (n, n_traj). Uses a Cholesky factor of the
    /// posterior covariance with a small diagonal lift against round-off.
    pub fn sample(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        n_traj: usize,
    ) -> Result<Array2<F>> {
        let mean = self.predict(x)?;
        let cov = self.predict_cov(x)?;
        let n = x.nrows();

        let lift = F::cast(1e-10)
            * cov.diag().mapv(|v| v.abs()).mean().unwrap_or_else(F::one);
        let mut lifted = cov;
        for i in 0..n {
            lifted[[i, i]] += lift;
        }
        let c = lifted.cholesky()?;

        let mut rng = Xoshiro256Plus::seed_from_u64(self.params.config().seed);
        let normal = Normal::new(0., 1.).unwrap();
        let ary = Array2::<f64>::random_using((n, n_traj), normal, &mut rng).mapv(F::cast);
        Ok(mean.insert_axis(Axis(1)) + c.dot(&ary))
    }
}

impl<F, D, Kern> PredictInplace<ArrayBase<D, Ix2>, Array1<F>> for GaussianProcess<F, Kern>
where
    F: Float,
    D: Data<Elem = F>,
    Kern: Kernel<F>,
{
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<F>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );

        let values = self.predict(x).expect("GP Prediction");
        *y = values;
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<F> {
        Array1::zeros(x.nrows())
    }
}

/// Gaussian Process adaptor to implement `linfa::Predict` trait for variance prediction.
pub struct GpVariancePredictor<'a, F, Kern>(pub &'a GaussianProcess<F, Kern>)
where
    F: Float,
    Kern: Kernel<F>;

impl<F, D, Kern> PredictInplace<ArrayBase<D, Ix2>, Array1<F>>
    for GpVariancePredictor<'_, F, Kern>
where
    F: Float,
    D: Data<Elem = F>,
    Kern: Kernel<F>,
{
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<F>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );

        let values = self.0.predict_var(x).expect("GP Prediction");
        *y = values;
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<F> {
        Array1::zeros(x.nrows())
    }
}

impl<F: Float, Kern: Kernel<F>, D: Data<Elem = F>>
    Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, GpError> for GpValidParams<F, Kern>
{
    type Object = GaussianProcess<F, Kern>;

    /// Fit GP parameters by gradient descent on the negative marginal
    /// log-likelihood, using stochastic trace estimation for the log-det
    /// terms. With `fit_steps` set to zero the initial parameters are kept
    /// as-is, the mode for external optimizers driving `neg_mll_grads`.
    /// The returned model is in evaluation mode.
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let x = dataset.records();
        let y = dataset.targets();
        if x.nrows() != y.len() {
            return Err(GpError::InvalidParameter(format!(
                "input and target sample counts do not match: {} != {}",
                x.nrows(),
                y.len()
            )));
        }
        if x.nrows() < 2 {
            return Err(GpError::InvalidParameter(
                "at least two training points are required".to_string(),
            ));
        }

        let xtrain = NormalizedData::new(x);
        let ytrain = NormalizedData::new(&y.to_owned().insert_axis(Axis(1)));

        let mut model = GaussianProcess {
            kernel_params: self.kernel_params().clone(),
            params: self.clone(),
            xt_norm: xtrain,
            yt_norm: ytrain,
            loss_history: Vec::new(),
            training: true,
            alpha: RefCell::new(None),
            love: RefCell::new(None),
            love_rebuilds: Cell::new(0),
            solves_converged: Cell::new(true),
        };

        let lr = self.learning_rate;
        for step in 0..self.fit_steps {
            let (loss, grads) = model.neg_mll_grads()?;
            if !loss.is_finite() {
                return Err(GpError::LikelihoodError(format!(
                    "non-finite marginal likelihood at fit step {step}"
                )));
            }
            model.loss_history.push(loss);
            let raw = &model.kernel_params.raw() - &grads.mapv(|g| g * lr);
            model.kernel_params.set_raw(&raw);
            debug!("fit step {step}: loss {loss}, {}", model.kernel_params);
        }

        model.eval();
        Ok(model)
    }
}
