pub mod bnn;
pub mod synthetic;
pub mod vae;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub use bnn::BnnArgs;
pub use vae::VaeArgs;

#[derive(Parser)]
#[command(name = "candle-bayes")]
#[command(about = "Stochastic computation graphs and Bayesian layers on candle")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fit a Bernoulli VAE to synthetic binary data by maximizing the ELBO
    Vae(VaeArgs),
    /// Fit a Bayesian MLP classifier to synthetic blobs
    Bnn(BnnArgs),
}

/// Options shared by every training command
#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    #[arg(long, default_value = "20")]
    pub epochs: usize,

    #[arg(long, default_value = "64")]
    pub batch_size: usize,

    #[arg(long, default_value = "0.005")]
    pub learning_rate: f64,

    #[arg(long, default_value = "1", help = "Monte-Carlo samples per step")]
    pub n_samples: usize,

    #[arg(long, default_value = "42")]
    pub seed: u64,

    #[arg(long, help = "Write parameters to this safetensors file")]
    pub save: Option<PathBuf>,

    #[arg(long)]
    pub gpu: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

impl TrainArgs {
    pub fn device(&self) -> anyhow::Result<candle_core::Device> {
        if self.gpu {
            Ok(candle_core::Device::cuda_if_available(0)?)
        } else {
            Ok(candle_core::Device::Cpu)
        }
    }

    pub fn train_config(&self) -> anyhow::Result<crate::candle_inference::TrainConfig> {
        Ok(crate::candle_inference::TrainConfig {
            learning_rate: self.learning_rate,
            batch_size: self.batch_size,
            num_epochs: self.epochs,
            seed: self.seed,
            device: self.device()?,
            verbose: self.verbose,
        })
    }
}

pub(crate) fn save_varmap(varmap: &candle_nn::VarMap, path: &Option<PathBuf>) -> anyhow::Result<()> {
    if let Some(p) = path {
        varmap.save(p)?;
        log::info!("Saved parameters to {:?}", p);
    }
    Ok(())
}
