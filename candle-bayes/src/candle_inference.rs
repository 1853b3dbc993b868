use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, VarMap};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::candle_data_loader::InMemoryData;
use crate::error::Result;

pub struct TrainConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub num_epochs: usize,
    /// seeds minibatch shuffling
    pub seed: u64,
    pub device: candle_core::Device,
    pub verbose: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            batch_size: 100,
            num_epochs: 10,
            seed: 0,
            device: candle_core::Device::Cpu,
            verbose: false,
        }
    }
}

/// Minimize `loss_fn` over shuffled minibatches with AdamW
///
/// * `varmap` - every parameter the loss depends on
/// * `data` - shuffled anew at the start of every epoch
/// * `loss_fn` - scalar loss of (epoch, input, output) for one minibatch
///
/// Returns the average loss of each epoch.
pub fn train_minibatches<LossFn>(
    varmap: &VarMap,
    data: &mut InMemoryData,
    config: &TrainConfig,
    mut loss_fn: LossFn,
) -> Result<Vec<f32>>
where
    LossFn: FnMut(usize, &Tensor, Option<&Tensor>) -> Result<Tensor>,
{
    let mut adam = AdamW::new_lr(varmap.all_vars(), config.learning_rate)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut loss_trace = vec![];

    for epoch in 0..config.num_epochs {
        data.shuffle_minibatch(config.batch_size, &mut rng)?;
        let mut loss_tot = 0f32;

        for b in 0..data.num_minibatch() {
            let mb = data.minibatch_data(b, &config.device)?;
            let loss = loss_fn(epoch, &mb.input, mb.output.as_ref())?;
            adam.backward_step(&loss)?;
            loss_tot += loss.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?;
        }

        loss_trace.push(loss_tot / data.num_minibatch().max(1) as f32);
        if config.verbose {
            info!("[{}] loss: {}", epoch + 1, loss_trace[epoch]);
        }
    }
    Ok(loss_trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarBuilder;

    #[test]
    fn test_fits_a_constant() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let c = vb.get_with_hints(1, "c", candle_nn::init::ZERO)?;

        let x = (Tensor::ones((32, 1), DType::F32, &dev)? * 2.0)?;
        let mut data = InMemoryData::new(x)?;
        let config = TrainConfig {
            learning_rate: 0.1,
            batch_size: 8,
            num_epochs: 30,
            ..Default::default()
        };

        let trace = train_minibatches(&varmap, &mut data, &config, |_, x, _| {
            Ok(x.broadcast_sub(&c)?.sqr()?.mean_all()?)
        })?;
        assert_eq!(trace.len(), 30);
        assert!(trace[29] < trace[0]);
        Ok(())
    }
}
