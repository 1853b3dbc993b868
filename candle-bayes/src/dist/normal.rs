use candle_core::{DType, Device, Shape, Tensor};
use rand::Rng;

use super::noise::standard_normal;
use super::{broadcast_pair, min_f64, LN_2PI};
use crate::error::{BayesError, Result};

/// Gaussian distribution N(μ, σ²) with elementwise parameters
///
/// Stores ln(σ) alongside σ so that a log-std parameterization
/// never round-trips through `exp` and `log`.
#[derive(Clone, Debug)]
pub struct Normal {
    mean: Tensor,
    std: Tensor,
    ln_std: Tensor,
}

impl Normal {
    /// * `mean` - μ
    /// * `std` - σ, must be strictly positive (checked)
    pub fn new(mean: &Tensor, std: &Tensor) -> Result<Self> {
        let (mean, std) = broadcast_pair(mean, std, "normal")?;
        let min_std = min_f64(&std)?;
        if !(min_std > 0.0) {
            return Err(BayesError::Validation {
                family: "Normal",
                reason: format!("std must be positive, found {}", min_std),
            });
        }
        let ln_std = std.log()?;
        Ok(Self { mean, std, ln_std })
    }

    /// Parameterized by ln(σ); any finite or -∞ log-std is accepted,
    /// -∞ giving a point mass at μ.
    pub fn from_logstd(mean: &Tensor, ln_std: &Tensor) -> Result<Self> {
        let (mean, ln_std) = broadcast_pair(mean, ln_std, "normal")?;
        let std = ln_std.exp()?;
        Ok(Self { mean, std, ln_std })
    }

    /// Parameterized by ln(σ²), the way Bayesian layers store posteriors
    pub fn from_logvar(mean: &Tensor, ln_var: &Tensor) -> Result<Self> {
        Self::from_logstd(mean, &(ln_var * 0.5)?)
    }

    /// Standard normal N(0, 1) with the given shape
    pub fn standard<S: Into<Shape>>(shape: S, dtype: DType, device: &Device) -> Result<Self> {
        let shape = shape.into();
        let mean = Tensor::zeros(shape.clone(), dtype, device)?;
        let ln_std = Tensor::zeros(shape, dtype, device)?;
        Self::from_logstd(&mean, &ln_std)
    }

    pub fn mean(&self) -> &Tensor {
        &self.mean
    }

    pub fn std(&self) -> &Tensor {
        &self.std
    }

    pub fn ln_std(&self) -> &Tensor {
        &self.ln_std
    }

    pub fn variance(&self) -> Result<Tensor> {
        Ok(self.std.sqr()?)
    }

    pub fn batch_shape(&self) -> &Shape {
        self.mean.shape()
    }

    /// z = μ + σ * ε where ε ~ N(0, I)
    ///
    /// With `reparameterize` the draw stays on the graph so gradients
    /// reach μ and σ; otherwise the same value is returned detached.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, reparameterize: bool) -> Result<Tensor> {
        let eps = standard_normal(
            rng,
            self.mean.shape(),
            self.mean.dtype(),
            self.mean.device(),
        )?;
        let z = (&self.mean + self.std.mul(&eps)?)?;
        if reparameterize {
            Ok(z)
        } else {
            Ok(z.detach())
        }
    }

    /// log N(x; μ, σ²) = -0.5 * [(x-μ)²/σ² + 2*ln(σ) + ln(2π)]
    pub fn log_density(&self, value: &Tensor) -> Result<Tensor> {
        let z = value.broadcast_sub(&self.mean)?.broadcast_div(&self.std)?;
        let norm = self.ln_std.affine(2.0, LN_2PI)?;
        Ok((z.sqr()?.broadcast_add(&norm)? * (-0.5))?)
    }
}

/// Closed-form KL(q || p) between two Gaussians, elementwise
///
/// ln(σp) - ln(σq) + [σq² + (μq - μp)²] / (2σp²) - 1/2
pub fn kl_normal_normal(q: &Normal, p: &Normal) -> Result<Tensor> {
    let log_ratio = p.ln_std().broadcast_sub(q.ln_std())?;
    let diff_sq = q.mean().broadcast_sub(p.mean())?.sqr()?;
    let num = q.variance()?.broadcast_add(&diff_sq)?;
    let den = (p.variance()? * 2.0)?;
    Ok((log_ratio.broadcast_add(&num.broadcast_div(&den)?)? - 0.5)?)
}
