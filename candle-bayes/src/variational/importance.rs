use candle_core::Tensor;

use super::elbo::{mean_if_batched, Elbo};
use crate::error::{BayesError, Result};
use crate::net::{ObservedSet, ProbabilisticProgram};

impl<G, V> Elbo<G, V>
where
    G: ProbabilisticProgram,
    V: ProbabilisticProgram,
{
    /// Importance-weighted bound over `num_particles` variational passes
    ///
    /// log (1/K) Σ_k exp(log p(x, z_k) - log q(z_k | x)), negated and
    /// averaged over whatever batch axes the node reductions left. With
    /// K = 1 this is the plain SGVB loss. Nodes should sum, not average,
    /// over the batch axis for the bound to be per example.
    pub fn importance_weighted_loss(
        &mut self,
        observed: &ObservedSet,
        num_particles: usize,
    ) -> Result<Tensor> {
        if self.analytic_kl() {
            return Err(BayesError::invalid_argument(
                "analytic_kl",
                "importance weights need log q(z) per particle",
            ));
        }
        if num_particles < 1 {
            return Err(BayesError::invalid_argument(
                "num_particles",
                "need at least one particle",
            ));
        }

        let log_weights = (0..num_particles)
            .map(|_| self.terms(observed)?.bound())
            .collect::<Result<Vec<_>>>()?;

        let log_w_kn = Tensor::stack(&log_weights, 0)?;
        let bound = log_mean_exp(&log_w_kn, 0)?;
        Ok(mean_if_batched(&bound)?.neg()?)
    }
}

/// log (1/K) Σ_k exp(x_k) along `dim`, stabilized by the max
///
/// A slice that is -∞ throughout gives -∞, not NaN.
pub fn log_mean_exp(x: &Tensor, dim: usize) -> Result<Tensor> {
    let k = x.dim(dim)? as f64;
    let x_max = x.max_keepdim(dim)?.detach();
    // x - x is 0 only for finite x; shift by 0 elsewhere
    let finite = x_max.sub(&x_max)?.eq(0.0)?;
    let x_max = finite.where_cond(&x_max, &x_max.zeros_like()?)?;
    let shifted = x.broadcast_sub(&x_max)?.exp()?.sum_keepdim(dim)?;
    let ret = (shifted.log()? + x_max)?;
    Ok((ret.squeeze(dim)? - k.ln())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_log_mean_exp() -> Result<()> {
        let x = Tensor::new(&[[1000f64, 1.], [1000., 2.]], &Device::Cpu)?;
        let ret = log_mean_exp(&x, 0)?.to_vec1::<f64>()?;
        approx::assert_abs_diff_eq!(ret[0], 1000.0, epsilon = 1e-9);
        let expected = ((1f64.exp() + 2f64.exp()) / 2.0).ln();
        approx::assert_abs_diff_eq!(ret[1], expected, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_log_mean_exp_all_impossible() -> Result<()> {
        let x = Tensor::new(&[[f64::NEG_INFINITY, 0.5], [f64::NEG_INFINITY, 0.5]], &Device::Cpu)?;
        let ret = log_mean_exp(&x, 0)?.to_vec1::<f64>()?;
        assert_eq!(ret[0], f64::NEG_INFINITY);
        approx::assert_abs_diff_eq!(ret[1], 0.5, epsilon = 1e-12);
        Ok(())
    }
}
