use candle_core::Tensor;
use candle_nn::{init, Conv2dConfig, VarBuilder};

use super::pass::SamplePass;
use super::posterior::{BayesLayerConfig, NormalPosterior, PriorConfig};
use super::stack::BayesLayer;
use crate::error::{BayesError, Result};

/// 2-D convolution with Normal posteriors over kernel and bias
///
/// Input is (batch, in_channels, height, width); the kernel is
/// (out_channels, in_channels / groups, k, k).
#[derive(Clone, Debug)]
pub struct BayesConv2d {
    name: String,
    in_channels: usize,
    out_channels: usize,
    conv: Conv2dConfig,
    weight: NormalPosterior,
    bias: Option<NormalPosterior>,
    prior: PriorConfig,
}

/// Create a Bayesian conv2d layer under `vb`
///
/// * `in_channels` - must be divisible by `conv.groups`
/// * `kernel_size` - square kernel side
/// * `conv` - padding, stride, dilation and groups
pub fn bayes_conv2d(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    conv: Conv2dConfig,
    config: BayesLayerConfig,
    vb: VarBuilder,
) -> Result<BayesConv2d> {
    if conv.groups == 0 || in_channels % conv.groups != 0 || out_channels % conv.groups != 0 {
        return Err(BayesError::invalid_argument(
            "groups",
            format!(
                "{} groups do not divide {} -> {} channels",
                conv.groups, in_channels, out_channels
            ),
        ));
    }

    let weight = NormalPosterior::from_var_builder(
        (out_channels, in_channels / conv.groups, kernel_size, kernel_size),
        init::DEFAULT_KAIMING_NORMAL,
        config.init_logvar,
        vb.pp("weight"),
    )?;

    let bias = if config.bias {
        Some(NormalPosterior::from_var_builder(
            out_channels,
            init::ZERO,
            config.init_logvar,
            vb.pp("bias"),
        )?)
    } else {
        None
    };

    Ok(BayesConv2d {
        name: vb.prefix(),
        in_channels,
        out_channels,
        conv,
        weight,
        bias,
        prior: config.prior,
    })
}

impl BayesConv2d {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Conv2dConfig {
        &self.conv
    }

    pub fn weight(&self) -> &NormalPosterior {
        &self.weight
    }

    pub fn bias(&self) -> Option<&NormalPosterior> {
        self.bias.as_ref()
    }

    pub fn kl_divergence(&self) -> Result<Tensor> {
        let kl = self.weight.kl_divergence(&self.prior)?;
        match &self.bias {
            Some(b) => Ok((kl + b.kl_divergence(&self.prior)?)?),
            None => Ok(kl),
        }
    }
}

impl BayesLayer for BayesConv2d {
    fn forward_sample(&self, x: &Tensor, pass: &mut SamplePass) -> Result<Tensor> {
        match *x.dims() {
            [_, c, _, _] if c == self.in_channels => {}
            _ => {
                return Err(BayesError::shape(format!(
                    "'{}' expects (batch, {}, h, w) input, found {:?}",
                    self.name,
                    self.in_channels,
                    x.dims()
                )))
            }
        }

        let kernel = self.weight.draw(pass)?;
        let y = x.conv2d(
            &kernel,
            self.conv.padding,
            self.conv.stride,
            self.conv.dilation,
            self.conv.groups,
        )?;

        let y = match &self.bias {
            Some(b) => {
                let b = b.draw(pass)?.reshape((1, self.out_channels, 1, 1))?;
                y.broadcast_add(&b)?
            }
            None => y,
        };

        pass.record_kl(&self.name, self.kl_divergence()?);
        Ok(y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bayes_layers::WeightMode;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_output_shape_with_padding_and_stride() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let conv = Conv2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };
        let layer = bayes_conv2d(3, 8, 3, conv, BayesLayerConfig::default(), vb.pp("conv1"))?;

        let x = Tensor::ones((2, 3, 8, 8), DType::F32, &dev)?;
        let mut pass = SamplePass::with_seed(4);
        let y = layer.forward_sample(&x, &mut pass)?;
        assert_eq!(y.dims(), &[2, 8, 4, 4]);
        assert_eq!(pass.kl_terms()[0].0, "conv1");
        Ok(())
    }

    #[test]
    fn test_mean_kernel_matches_manual_sum() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let config = BayesLayerConfig {
            bias: false,
            ..Default::default()
        };
        let layer = bayes_conv2d(1, 1, 2, Conv2dConfig::default(), config, vb)?;

        // ones input: every output pixel is the sum of the mean kernel
        let x = Tensor::ones((1, 1, 3, 3), DType::F32, &dev)?;
        let mut pass = SamplePass::with_seed(0).with_mode(WeightMode::Mean);
        let y = layer.forward_sample(&x, &mut pass)?;
        let expected = layer.weight().mean().sum_all()?.to_scalar::<f32>()?;
        for v in y.flatten_all()?.to_vec1::<f32>()? {
            approx::assert_abs_diff_eq!(v, expected, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_rank_and_channel_checks() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let layer = bayes_conv2d(2, 4, 3, Conv2dConfig::default(), BayesLayerConfig::default(), vb.pp("c"))?;

        let mut pass = SamplePass::with_seed(0);
        let flat = Tensor::ones((2, 16), DType::F32, &dev)?;
        assert!(matches!(layer.forward_sample(&flat, &mut pass), Err(BayesError::Shape(_))));
        let wrong_c = Tensor::ones((1, 3, 5, 5), DType::F32, &dev)?;
        assert!(matches!(layer.forward_sample(&wrong_c, &mut pass), Err(BayesError::Shape(_))));

        let conv = Conv2dConfig {
            groups: 3,
            ..Default::default()
        };
        assert!(matches!(
            bayes_conv2d(2, 4, 3, conv, BayesLayerConfig::default(), VarBuilder::from_varmap(&varmap, DType::F32, &dev).pp("g")),
            Err(BayesError::InvalidArgument { .. })
        ));
        Ok(())
    }
}
