use candle_core::Tensor;

use crate::dist::Distribution;
use crate::error::{BayesError, Result};

/// Per-node options: sampling path and log-density reduction
///
/// `reduce_mean_dims` are averaged first, then `reduce_sum_dims` are
/// summed; both index the log-density's original axes.
#[derive(Clone, Debug)]
pub struct NodeOptions {
    pub reparameterize: bool,
    pub reduce_mean_dims: Vec<usize>,
    pub reduce_sum_dims: Vec<usize>,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            reparameterize: true,
            reduce_mean_dims: vec![],
            reduce_sum_dims: vec![],
        }
    }
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reparameterize(mut self, flag: bool) -> Self {
        self.reparameterize = flag;
        self
    }

    pub fn reduce_mean(mut self, dims: &[usize]) -> Self {
        self.reduce_mean_dims = dims.to_vec();
        self
    }

    pub fn reduce_sum(mut self, dims: &[usize]) -> Self {
        self.reduce_sum_dims = dims.to_vec();
        self
    }
}

/// One named random variable realized during a pass
#[derive(Clone, Debug)]
pub struct StochasticNode {
    name: String,
    distribution: Distribution,
    value: Tensor,
    is_observed: bool,
    log_prob: Tensor,
    reduce_mean_dims: Vec<usize>,
    reduce_sum_dims: Vec<usize>,
}

impl StochasticNode {
    /// `log_prob` is computed the same way whether `value` was observed
    /// or sampled.
    pub(crate) fn realize(
        name: &str,
        distribution: Distribution,
        value: Tensor,
        is_observed: bool,
        options: &NodeOptions,
    ) -> Result<Self> {
        let log_density = distribution.log_density(&value)?;
        let log_prob = reduce_log_density(
            &log_density,
            &options.reduce_mean_dims,
            &options.reduce_sum_dims,
        )?;
        Ok(Self {
            name: name.to_string(),
            distribution,
            value,
            is_observed,
            log_prob,
            reduce_mean_dims: options.reduce_mean_dims.clone(),
            reduce_sum_dims: options.reduce_sum_dims.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    pub fn value(&self) -> &Tensor {
        &self.value
    }

    pub fn is_observed(&self) -> bool {
        self.is_observed
    }

    /// Reduced log-density of `value`
    pub fn log_prob(&self) -> &Tensor {
        &self.log_prob
    }

    /// Apply this node's reduction to any elementwise term of its shape
    pub fn reduce(&self, elementwise: &Tensor) -> Result<Tensor> {
        reduce_log_density(elementwise, &self.reduce_mean_dims, &self.reduce_sum_dims)
    }
}

/// Average over `mean_dims`, then sum over `sum_dims`
///
/// Both reductions keep their axes so the indices stay valid; the reduced
/// axes are squeezed at the end. A dim out of range, repeated, or listed
/// in both sets is a shape error.
pub fn reduce_log_density(
    log_density: &Tensor,
    mean_dims: &[usize],
    sum_dims: &[usize],
) -> Result<Tensor> {
    let rank = log_density.rank();
    let mut reduced: Vec<usize> = mean_dims.iter().chain(sum_dims).copied().collect();

    if let Some(&d) = reduced.iter().find(|&&d| d >= rank) {
        return Err(BayesError::shape(format!(
            "reduction dim {} for a log-density of shape {:?}",
            d,
            log_density.dims()
        )));
    }

    reduced.sort_unstable();
    if reduced.windows(2).any(|w| w[0] == w[1]) {
        return Err(BayesError::shape(format!(
            "reduction dims overlap: mean {:?}, sum {:?}",
            mean_dims, sum_dims
        )));
    }

    let mut ret = log_density.clone();
    if !mean_dims.is_empty() {
        ret = ret.mean_keepdim(mean_dims.to_vec())?;
    }
    if !sum_dims.is_empty() {
        ret = ret.sum_keepdim(sum_dims.to_vec())?;
    }
    for &d in reduced.iter().rev() {
        ret = ret.squeeze(d)?;
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_reduction_order_matters() -> Result<()> {
        // B = 2, F = 3
        let lp = Tensor::new(&[[1f64, 2., 3.], [4., 5., 6.]], &Device::Cpu)?;

        let mean_batch_sum_feat: f64 = reduce_log_density(&lp, &[0], &[1])?.to_scalar()?;
        let sum_batch_mean_feat: f64 = reduce_log_density(&lp, &[1], &[0])?.to_scalar()?;

        approx::assert_abs_diff_eq!(mean_batch_sum_feat, 21.0 / 2.0);
        approx::assert_abs_diff_eq!(sum_batch_mean_feat, 21.0 / 3.0);
        assert!((mean_batch_sum_feat - sum_batch_mean_feat).abs() > 1.0);
        Ok(())
    }

    #[test]
    fn test_partial_reduction_keeps_other_axes() -> Result<()> {
        let lp = Tensor::ones((4, 2, 5), candle_core::DType::F32, &Device::Cpu)?;
        let ret = reduce_log_density(&lp, &[], &[2])?;
        assert_eq!(ret.dims(), &[4, 2]);
        assert_eq!(ret.to_vec2::<f32>()?[0][0], 5.0);

        let ret = reduce_log_density(&lp, &[0], &[])?;
        assert_eq!(ret.dims(), &[2, 5]);

        let ret = reduce_log_density(&lp, &[], &[])?;
        assert_eq!(ret.dims(), &[4, 2, 5]);
        Ok(())
    }

    #[test]
    fn test_bad_reduction_dims() -> Result<()> {
        let lp = Tensor::ones((4, 2), candle_core::DType::F32, &Device::Cpu)?;
        assert!(matches!(
            reduce_log_density(&lp, &[0], &[2]),
            Err(BayesError::Shape(_))
        ));
        assert!(matches!(
            reduce_log_density(&lp, &[1], &[1]),
            Err(BayesError::Shape(_))
        ));
        Ok(())
    }
}
