use candle_core::{Shape, Tensor};
use candle_nn::{Init, VarBuilder};

use super::pass::{SamplePass, WeightMode};
use crate::dist::{kl_normal_normal, Normal};
use crate::error::Result;

/// Fixed Normal prior N(mean, std²) over every weight of a layer
#[derive(Clone, Copy, Debug)]
pub struct PriorConfig {
    pub mean: f64,
    pub std: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            mean: 0.0,
            std: 1.0,
        }
    }
}

impl PriorConfig {
    /// The prior broadcast to the shape of `like`
    pub fn normal_like(&self, like: &Tensor) -> Result<Normal> {
        debug_assert!(self.std > 0.0);
        let mean = Tensor::full(self.mean, like.shape(), like.device())?.to_dtype(like.dtype())?;
        let ln_std = Tensor::full(self.std.ln(), like.shape(), like.device())?
            .to_dtype(like.dtype())?;
        Normal::from_logstd(&mean, &ln_std)
    }
}

/// Construction options shared by Bayesian layers
#[derive(Clone, Copy, Debug)]
pub struct BayesLayerConfig {
    pub prior: PriorConfig,
    /// initial ln(σ²) of every posterior
    pub init_logvar: f64,
    pub bias: bool,
}

impl Default for BayesLayerConfig {
    fn default() -> Self {
        Self {
            prior: PriorConfig::default(),
            init_logvar: -10.0,
            bias: true,
        }
    }
}

/// Mean-field posterior N(mean, exp(logvar)) over one parameter tensor
///
/// * `{name}.mean`
/// * `{name}.logvar`
#[derive(Clone, Debug)]
pub struct NormalPosterior {
    mean: Tensor,
    logvar: Tensor,
}

impl NormalPosterior {
    pub fn new(mean: Tensor, logvar: Tensor) -> Self {
        debug_assert_eq!(mean.dims(), logvar.dims());
        Self { mean, logvar }
    }

    pub fn from_var_builder<S: Into<Shape>>(
        shape: S,
        mean_init: Init,
        init_logvar: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let shape = shape.into();
        let mean = vb.get_with_hints(shape.clone(), "mean", mean_init)?;
        let logvar = vb.get_with_hints(shape, "logvar", Init::Const(init_logvar))?;
        Ok(Self { mean, logvar })
    }

    pub fn mean(&self) -> &Tensor {
        &self.mean
    }

    pub fn logvar(&self) -> &Tensor {
        &self.logvar
    }

    pub fn distribution(&self) -> Result<Normal> {
        Normal::from_logvar(&self.mean, &self.logvar)
    }

    /// w = μ + exp(½ logvar) ε, or μ itself in `WeightMode::Mean`
    pub fn draw(&self, pass: &mut SamplePass) -> Result<Tensor> {
        match pass.mode() {
            WeightMode::Mean => Ok(self.mean.clone()),
            WeightMode::Sample => self.distribution()?.sample(pass.rng_mut(), true),
        }
    }

    /// Σ KL(N(μ, σ²) || prior) over all elements
    pub fn kl_divergence(&self, prior: &PriorConfig) -> Result<Tensor> {
        let q = self.distribution()?;
        let p = prior.normal_like(&self.mean)?;
        Ok(kl_normal_normal(&q, &p)?.sum_all()?)
    }
}
