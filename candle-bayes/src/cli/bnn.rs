use anyhow::Result;
use candle_core::{DType, Tensor};
use candle_nn::{Activation, VarBuilder, VarMap};
use clap::Args;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{save_varmap, synthetic, TrainArgs};
use crate::bayes_layers::{
    bayes_linear, elbo_estimator_with, BayesLayerConfig, BayesSequential, BayesianModule,
    EstimatorConfig, PriorConfig,
};
use crate::candle_data_loader::InMemoryData;
use crate::candle_inference::train_minibatches;
use crate::candle_loss_functions::cross_entropy;

#[derive(Args, Debug)]
pub struct BnnArgs {
    #[command(flatten)]
    pub train: TrainArgs,

    #[arg(long, default_value = "600", help = "Number of synthetic points")]
    pub num_data: usize,

    #[arg(long, default_value = "3")]
    pub num_classes: usize,

    #[arg(long, default_value = "32")]
    pub hidden_dim: usize,

    #[arg(long, default_value = "1.0", help = "Prior standard deviation of every weight")]
    pub prior_std: f64,

    #[arg(long, help = "Evaluate Monte-Carlo samples in parallel")]
    pub parallel: bool,
}

/// Two-layer Bayesian MLP: 2 → hidden → classes
pub fn build_classifier(
    hidden_dim: usize,
    num_classes: usize,
    config: BayesLayerConfig,
    vb: VarBuilder,
) -> Result<BayesSequential> {
    let mut net = BayesSequential::new();
    net.push_with_act(bayes_linear(2, hidden_dim, config, vb.pp("fc1"))?, Activation::Relu);
    net.push(bayes_linear(hidden_dim, num_classes, config, vb.pp("fc2"))?);
    Ok(net)
}

/// Fraction of rows whose arg-max logit equals the label
pub fn accuracy(logits: &Tensor, labels: &Tensor) -> Result<f32> {
    let hits = logits
        .argmax(1)?
        .eq(labels)?
        .to_dtype(DType::F32)?
        .mean_all()?
        .to_scalar::<f32>()?;
    Ok(hits)
}

pub fn run(args: &BnnArgs) -> Result<()> {
    let config = args.train.train_config()?;
    let dev = config.device.clone();
    let mut rng = StdRng::seed_from_u64(args.train.seed);

    let (x, y) = synthetic::gaussian_blobs(args.num_data, args.num_classes, 2.0, 0.6, &mut rng, &dev)?;
    info!("Synthetic blobs: {:?} -> {} classes", x.dims(), args.num_classes);

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
    let layer_config = BayesLayerConfig {
        prior: PriorConfig {
            mean: 0.0,
            std: args.prior_std,
        },
        ..Default::default()
    };
    let model = build_classifier(args.hidden_dim, args.num_classes, layer_config, vb.pp("bnn"))?;

    let estimator = EstimatorConfig {
        n_samples: args.train.n_samples,
        dataset_size: args.num_data,
        parallel: args.parallel,
        seed: None,
    };
    let criterion = |logits: &Tensor, labels: &Tensor| -> crate::Result<Tensor> {
        Ok(cross_entropy(logits, labels)?)
    };

    info!(
        "Training BNN: {} epochs, {} samples per step (parallel: {})",
        config.num_epochs, estimator.n_samples, estimator.parallel
    );
    let mut data = InMemoryData::new_with_output(x.clone(), y.clone())?;
    let trace = train_minibatches(&varmap, &mut data, &config, |epoch, x_mb, y_mb| {
        let y_mb = y_mb.ok_or_else(|| {
            crate::BayesError::invalid_argument("targets", "classifier needs labels")
        })?;
        let step = EstimatorConfig {
            seed: Some(args.train.seed.wrapping_add((epoch * 1_000_003) as u64)),
            ..estimator
        };
        elbo_estimator_with(&model, x_mb, y_mb, &criterion, &step)
    })?;

    if let Some(last) = trace.last() {
        info!("Final training loss: {:.4}", last);
    }
    let acc = accuracy(&model.predict(&x)?, &y)?;
    info!("Training accuracy (posterior mean): {:.3}", acc);

    save_varmap(&varmap, &args.train.save)
}
