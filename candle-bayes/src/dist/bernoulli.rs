use candle_core::{Shape, Tensor};
use candle_nn::ops;
use rand::Rng;

use super::noise::standard_uniform;
use super::{ensure_finite, max_f64, min_f64};
use crate::candle_loss_functions::softplus;
use crate::error::{BayesError, Result};

/// Default clamp keeping log(p) and log(1-p) finite
pub const DEFAULT_PROB_EPS: f64 = 1e-7;

#[derive(Clone, Debug)]
enum BernoulliParam {
    Probs(Tensor),
    Logits(Tensor),
}

/// Independent Bernoulli variables over a batch shape
///
/// Sampling has no reparameterized path: gradients w.r.t. the
/// parameters can only come through `log_density`.
#[derive(Clone, Debug)]
pub struct Bernoulli {
    param: BernoulliParam,
    clamp_eps: Option<f64>,
}

impl Bernoulli {
    /// * `probs` - success probabilities, each in [0, 1] (checked)
    pub fn new(probs: &Tensor) -> Result<Self> {
        let lo = min_f64(probs)?;
        let hi = max_f64(probs)?;
        if !(lo >= 0.0 && hi <= 1.0) {
            return Err(BayesError::Validation {
                family: "Bernoulli",
                reason: format!("probs must lie in [0, 1], found range [{}, {}]", lo, hi),
            });
        }
        Ok(Self {
            param: BernoulliParam::Probs(probs.clone()),
            clamp_eps: Some(DEFAULT_PROB_EPS),
        })
    }

    /// * `logits` - log-odds, must be finite (checked)
    pub fn from_logits(logits: &Tensor) -> Result<Self> {
        ensure_finite("Bernoulli", "logits", logits)?;
        Ok(Self {
            param: BernoulliParam::Logits(logits.clone()),
            clamp_eps: Some(DEFAULT_PROB_EPS),
        })
    }

    /// Disable clamping; a probability of exactly 0 or 1 then makes
    /// `log_density` fail instead of returning a clipped value.
    pub fn without_clamp(mut self) -> Self {
        self.clamp_eps = None;
        self
    }

    pub fn with_clamp(mut self, eps: f64) -> Self {
        self.clamp_eps = Some(eps);
        self
    }

    pub fn probs(&self) -> Result<Tensor> {
        match &self.param {
            BernoulliParam::Probs(p) => Ok(p.clone()),
            BernoulliParam::Logits(l) => Ok(ops::sigmoid(l)?),
        }
    }

    pub fn batch_shape(&self) -> &Shape {
        match &self.param {
            BernoulliParam::Probs(p) => p.shape(),
            BernoulliParam::Logits(l) => l.shape(),
        }
    }

    /// x ~ Bernoulli(p) as 0/1 in the parameter dtype, always detached
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Tensor> {
        let probs = self.probs()?.detach();
        let u = standard_uniform(rng, probs.shape(), probs.dtype(), probs.device())?;
        Ok(u.lt(&probs)?.to_dtype(probs.dtype())?)
    }

    /// x * ln(p) + (1 - x) * ln(1 - p)
    ///
    /// With logits l: x * l - softplus(l)
    pub fn log_density(&self, value: &Tensor) -> Result<Tensor> {
        // x (1 - x) vanishes only on {0, 1}
        let off_support = max_f64(&(value * value.affine(-1.0, 1.0)?)?.abs()?)?;
        if off_support > 0.0 {
            return Err(BayesError::Domain {
                family: "Bernoulli",
                reason: "values must be 0 or 1".into(),
            });
        }

        match &self.param {
            BernoulliParam::Probs(probs) => {
                let probs = match self.clamp_eps {
                    Some(eps) => probs.clamp(eps, 1.0 - eps)?,
                    None => {
                        let lo = min_f64(probs)?;
                        let hi = max_f64(probs)?;
                        if !(lo > 0.0 && hi < 1.0) {
                            return Err(BayesError::Domain {
                                family: "Bernoulli",
                                reason: format!(
                                    "unclamped probs must lie in (0, 1), found range [{}, {}]",
                                    lo, hi
                                ),
                            });
                        }
                        probs.clone()
                    }
                };
                let log_p = probs.log()?;
                let log_1mp = probs.affine(-1.0, 1.0)?.log()?;
                let one_minus_x = value.affine(-1.0, 1.0)?;
                Ok(value
                    .broadcast_mul(&log_p)?
                    .add(&one_minus_x.broadcast_mul(&log_1mp)?)?)
            }
            BernoulliParam::Logits(logits) => {
                let softplus = softplus(logits)?;
                Ok(value.broadcast_mul(logits)?.broadcast_sub(&softplus)?)
            }
        }
    }
}
