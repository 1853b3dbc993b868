use candle_core::Tensor;
use candle_nn::{init, VarBuilder};

use super::pass::SamplePass;
use super::posterior::{BayesLayerConfig, NormalPosterior, PriorConfig};
use super::stack::BayesLayer;
use crate::error::{BayesError, Result};

/// Linear layer y = x Wᵀ + b with W, b ~ q = N(μ, exp(logvar))
///
/// Every forward call draws fresh weights and records
/// KL(q(W) || p) + KL(q(b) || p) in the pass under the layer's name.
#[derive(Clone, Debug)]
pub struct BayesLinear {
    name: String,
    in_dim: usize,
    out_dim: usize,
    weight: NormalPosterior,
    bias: Option<NormalPosterior>,
    prior: PriorConfig,
}

/// Create a Bayesian linear layer under `vb`
///
/// * `{prefix}.weight.mean`, `{prefix}.weight.logvar` - (out_dim, in_dim)
/// * `{prefix}.bias.mean`, `{prefix}.bias.logvar` - (out_dim,)
pub fn bayes_linear(
    in_dim: usize,
    out_dim: usize,
    config: BayesLayerConfig,
    vb: VarBuilder,
) -> Result<BayesLinear> {
    let weight = NormalPosterior::from_var_builder(
        (out_dim, in_dim),
        init::DEFAULT_KAIMING_NORMAL,
        config.init_logvar,
        vb.pp("weight"),
    )?;

    let bias = if config.bias {
        Some(NormalPosterior::from_var_builder(
            out_dim,
            init::ZERO,
            config.init_logvar,
            vb.pp("bias"),
        )?)
    } else {
        None
    };

    Ok(BayesLinear {
        name: vb.prefix(),
        in_dim,
        out_dim,
        weight,
        bias,
        prior: config.prior,
    })
}

impl BayesLinear {
    /// Build from existing posterior tensors; `weight` must be (out, in)
    pub fn from_posteriors(
        name: &str,
        weight: NormalPosterior,
        bias: Option<NormalPosterior>,
        prior: PriorConfig,
    ) -> Result<Self> {
        let (out_dim, in_dim) = weight.mean().dims2()?;
        if let Some(b) = &bias {
            if b.mean().dims() != [out_dim] {
                return Err(BayesError::shape(format!(
                    "bias of '{}' has shape {:?}, expected [{}]",
                    name,
                    b.mean().dims(),
                    out_dim
                )));
            }
        }
        Ok(Self {
            name: name.to_string(),
            in_dim,
            out_dim,
            weight,
            bias,
            prior,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn weight(&self) -> &NormalPosterior {
        &self.weight
    }

    pub fn bias(&self) -> Option<&NormalPosterior> {
        self.bias.as_ref()
    }

    /// KL of all parameters of this layer against the prior
    pub fn kl_divergence(&self) -> Result<Tensor> {
        let kl = self.weight.kl_divergence(&self.prior)?;
        match &self.bias {
            Some(b) => Ok((kl + b.kl_divergence(&self.prior)?)?),
            None => Ok(kl),
        }
    }
}

impl BayesLayer for BayesLinear {
    fn forward_sample(&self, x: &Tensor, pass: &mut SamplePass) -> Result<Tensor> {
        let x_in = x.dims().last().copied().unwrap_or(0);
        if x.rank() == 0 || x_in != self.in_dim {
            return Err(BayesError::shape(format!(
                "'{}' expects (..., {}) input, found {:?}",
                self.name,
                self.in_dim,
                x.dims()
            )));
        }

        let w_oi = self.weight.draw(pass)?;
        let w_io = w_oi.t()?;
        let y = match x.rank() {
            2 => x.matmul(&w_io)?,
            _ => x.broadcast_matmul(&w_io)?,
        };
        let y = match &self.bias {
            Some(b) => y.broadcast_add(&b.draw(pass)?)?,
            None => y,
        };

        pass.record_kl(&self.name, self.kl_divergence()?);
        Ok(y)
    }
}
