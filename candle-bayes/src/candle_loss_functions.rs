use candle_core::{Result, Tensor};

/// KL divergence loss between N(mean, exp(lnvar)) and N(0, 1)
///
/// 0.5 * sum_k (sigma^2 + mu^2 - 1 - log(sigma^2))
///
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
///
pub fn gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let z_var = z_lnvar.exp()?;
    (z_var - 1. + z_mean.powf(2.)? - z_lnvar)?.sum(z_mean.rank() - 1)? * 0.5
}

/// Bernoulli log-likelihood of binary data given logits
///
/// llik(i) = sum_w x(i,w) * l(i,w) - softplus(l(i,w))
///
/// * `x_nd` - data tensor in {0, 1}
/// * `logits_nd` - reconstruction logits
///
pub fn bernoulli_likelihood(x_nd: &Tensor, logits_nd: &Tensor) -> Result<Tensor> {
    let softplus = softplus(logits_nd)?;
    x_nd.mul(logits_nd)?.sub(&softplus)?.sum(x_nd.rank() - 1)
}

/// Mean cross entropy of class `targets` (u32 indices) under `logits`
///
/// * `logits_nk` - unnormalized class scores
/// * `targets_n` - class indices
///
pub fn cross_entropy(logits_nk: &Tensor, targets_n: &Tensor) -> Result<Tensor> {
    candle_nn::loss::cross_entropy(logits_nk, targets_n)
}

/// log(1 + exp(x)) = max(x, 0) + log(1 + exp(-|x|))
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    x.relu()?.add(&tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_kl_zero_at_standard_normal() -> Result<()> {
        let dev = Device::Cpu;
        let z = Tensor::zeros((2, 3), candle_core::DType::F32, &dev)?;
        let kl = gaussian_kl_loss(&z, &z)?.to_vec1::<f32>()?;
        assert_eq!(kl, vec![0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_softplus_is_stable() -> Result<()> {
        let x = Tensor::new(&[-1000f64, 0., 1000.], &Device::Cpu)?;
        let y = softplus(&x)?.to_vec1::<f64>()?;
        approx::assert_abs_diff_eq!(y[0], 0.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(y[1], 2f64.ln(), epsilon = 1e-12);
        approx::assert_abs_diff_eq!(y[2], 1000.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_bernoulli_likelihood() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[1f64, 0.]], &dev)?;
        let logits = Tensor::new(&[[0f64, 0.]], &dev)?;
        let llik = bernoulli_likelihood(&x, &logits)?.to_vec1::<f64>()?;
        approx::assert_abs_diff_eq!(llik[0], 2.0 * 0.5f64.ln(), epsilon = 1e-12);
        Ok(())
    }
}
