//! Distribution primitives shared by stochastic nodes and Bayesian layers.
//!
//! Every family exposes `sample` (with or without a reparameterized
//! path) and an elementwise `log_density`. The set of families is
//! closed: programs dispatch through [`Distribution`].

mod bernoulli;
mod categorical;
pub mod noise;
mod normal;

pub use bernoulli::{Bernoulli, DEFAULT_PROB_EPS};
pub use categorical::Categorical;
pub use normal::{kl_normal_normal, Normal};

use candle_core::{DType, Device, Shape, Tensor};
use rand::Rng;

use crate::error::{BayesError, Result};

/// ln(2π)
pub const LN_2PI: f64 = 1.8378770664093453;

#[derive(Clone, Debug)]
pub enum Distribution {
    Normal(Normal),
    Bernoulli(Bernoulli),
    Categorical(Categorical),
}

impl Distribution {
    pub fn family(&self) -> &'static str {
        match self {
            Self::Normal(_) => "Normal",
            Self::Bernoulli(_) => "Bernoulli",
            Self::Categorical(_) => "Categorical",
        }
    }

    pub fn batch_shape(&self) -> &Shape {
        match self {
            Self::Normal(d) => d.batch_shape(),
            Self::Bernoulli(d) => d.batch_shape(),
            Self::Categorical(d) => d.batch_shape(),
        }
    }

    /// Whether a draw can stay on the gradient graph
    pub fn has_reparameterized_sample(&self) -> bool {
        matches!(self, Self::Normal(_))
    }

    /// Draw one value of the batch shape
    ///
    /// Asking a discrete family for a reparameterized draw is an error:
    /// its gradient has to go through `log_density` instead.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, reparameterize: bool) -> Result<Tensor> {
        if reparameterize && !self.has_reparameterized_sample() {
            return Err(BayesError::invalid_argument(
                "reparameterize",
                format!("{} sampling is not differentiable", self.family()),
            ));
        }
        match self {
            Self::Normal(d) => d.sample(rng, reparameterize),
            Self::Bernoulli(d) => d.sample(rng),
            Self::Categorical(d) => d.sample(rng),
        }
    }

    /// Elementwise log-density, shape = batch shape
    pub fn log_density(&self, value: &Tensor) -> Result<Tensor> {
        match self {
            Self::Normal(d) => d.log_density(value),
            Self::Bernoulli(d) => d.log_density(value),
            Self::Categorical(d) => d.log_density(value),
        }
    }
}

impl From<Normal> for Distribution {
    fn from(d: Normal) -> Self {
        Self::Normal(d)
    }
}

impl From<Bernoulli> for Distribution {
    fn from(d: Bernoulli) -> Self {
        Self::Bernoulli(d)
    }
}

impl From<Categorical> for Distribution {
    fn from(d: Categorical) -> Self {
        Self::Categorical(d)
    }
}

/// Broadcast two parameter tensors to their common shape
pub(crate) fn broadcast_pair(a: &Tensor, b: &Tensor, op: &'static str) -> Result<(Tensor, Tensor)> {
    if a.shape() == b.shape() {
        return Ok((a.clone(), b.clone()));
    }
    let shape = a
        .shape()
        .broadcast_shape_binary_op(b.shape(), op)
        .map_err(|_| {
            BayesError::shape(format!(
                "{} parameters do not broadcast: {:?} vs {:?}",
                op,
                a.dims(),
                b.dims()
            ))
        })?;
    Ok((a.broadcast_as(shape.clone())?, b.broadcast_as(shape)?))
}

// reading values back goes through CPU/f64 (Metal doesn't support F64)
fn to_host_f64(t: &Tensor) -> Result<Tensor> {
    Ok(t.detach()
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F64)?
        .flatten_all()?)
}

pub(crate) fn min_f64(t: &Tensor) -> Result<f64> {
    if t.elem_count() == 0 {
        return Ok(f64::INFINITY);
    }
    Ok(to_host_f64(t)?.min(0)?.to_scalar::<f64>()?)
}

pub(crate) fn max_f64(t: &Tensor) -> Result<f64> {
    if t.elem_count() == 0 {
        return Ok(f64::NEG_INFINITY);
    }
    Ok(to_host_f64(t)?.max(0)?.to_scalar::<f64>()?)
}

pub(crate) fn ensure_finite(family: &'static str, what: &str, t: &Tensor) -> Result<()> {
    let lo = min_f64(t)?;
    let hi = max_f64(t)?;
    if t.elem_count() > 0 && !(lo.is_finite() && hi.is_finite()) {
        return Err(BayesError::Validation {
            family,
            reason: format!("{} must be finite, found range [{}, {}]", what, lo, hi),
        });
    }
    Ok(())
}
