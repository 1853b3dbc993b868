use anyhow::Result;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder, VarMap};
use clap::Args;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{save_varmap, synthetic, TrainArgs};
use crate::candle_data_loader::InMemoryData;
use crate::candle_inference::train_minibatches;
use crate::candle_loss_functions::{bernoulli_likelihood, gaussian_kl_loss};
use crate::dist::{Bernoulli, Distribution, Normal};
use crate::net::{observed_set, BayesianNet, NodeOptions, ObservedSet, ProbabilisticProgram};
use crate::variational::Elbo;

#[derive(Args, Debug)]
pub struct VaeArgs {
    #[command(flatten)]
    pub train: TrainArgs,

    #[arg(long, default_value = "1000", help = "Number of synthetic rows")]
    pub num_data: usize,

    #[arg(long, default_value = "16", help = "Bits per synthetic row")]
    pub data_dim: usize,

    #[arg(long, default_value = "2")]
    pub latent_dim: usize,

    #[arg(long, default_value = "32")]
    pub hidden_dim: usize,
}

/// q(z | x) = N(μ(x), σ(x)²)
pub struct VaeEncoder {
    fc: Linear,
    z_mean: Linear,
    z_lnstd: Linear,
}

impl VaeEncoder {
    pub fn new(data_dim: usize, hidden_dim: usize, latent_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc: candle_nn::linear(data_dim, hidden_dim, vb.pp("fc"))?,
            z_mean: candle_nn::linear(hidden_dim, latent_dim, vb.pp("z.mean"))?,
            z_lnstd: candle_nn::linear(hidden_dim, latent_dim, vb.pp("z.lnstd"))?,
        })
    }
}

impl ProbabilisticProgram for VaeEncoder {
    fn forward(&self, net: &mut BayesianNet) -> crate::Result<()> {
        let x = net.require_observed("x")?;
        let h = self.fc.forward(&x)?.relu()?;
        let mean = self.z_mean.forward(&h)?;
        let lnstd = self.z_lnstd.forward(&h)?.clamp(-8., 8.)?;
        let q_z = Normal::from_logstd(&mean, &lnstd)?;
        net.stochastic("z", q_z, &NodeOptions::new().reduce_sum(&[1]))?;
        Ok(())
    }
}

/// p(x, z) = N(z; 0, I) Bernoulli(x; sigmoid(f(z)))
pub struct VaeDecoder {
    latent_dim: usize,
    num_generate: usize,
    device: Device,
    fc: Linear,
    logits: Linear,
}

impl VaeDecoder {
    pub fn new(latent_dim: usize, hidden_dim: usize, data_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            latent_dim,
            num_generate: 16,
            device: vb.device().clone(),
            fc: candle_nn::linear(latent_dim, hidden_dim, vb.pp("fc"))?,
            logits: candle_nn::linear(hidden_dim, data_dim, vb.pp("logits"))?,
        })
    }

    /// Rows to generate: taken from observed `x` or `z`, else `num_generate`
    fn batch_like(&self, net: &BayesianNet) -> crate::Result<(usize, DType, Device)> {
        match net.observed("x").or_else(|| net.observed("z")) {
            Some(t) => Ok((t.dim(0)?, t.dtype(), t.device().clone())),
            None => Ok((self.num_generate, DType::F32, self.device.clone())),
        }
    }
}

impl ProbabilisticProgram for VaeDecoder {
    fn forward(&self, net: &mut BayesianNet) -> crate::Result<()> {
        let (n, dtype, device) = self.batch_like(net)?;
        let opts = NodeOptions::new().reduce_sum(&[1]);

        // the prior is fixed, so its draw stays off the graph
        let prior = Normal::standard((n, self.latent_dim), dtype, &device)?;
        let z = net.stochastic("z", prior, &opts.clone().reparameterize(false))?;

        let logits = self.logits.forward(&self.fc.forward(&z)?.relu()?)?;
        net.cache_insert("x.logits", logits.clone());
        let p_x = Bernoulli::from_logits(&logits)?;
        net.stochastic("x", p_x, &opts.reparameterize(false))?;
        Ok(())
    }
}

pub fn run(args: &VaeArgs) -> Result<()> {
    let config = args.train.train_config()?;
    let dev = config.device.clone();
    let mut rng = StdRng::seed_from_u64(args.train.seed);

    let x = synthetic::binary_patterns(args.num_data, args.data_dim, 4, 0.05, &mut rng, &dev)?;
    info!("Synthetic data: {:?}", x.dims());

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
    let encoder = VaeEncoder::new(args.data_dim, args.hidden_dim, args.latent_dim, vb.pp("enc"))?;
    let decoder = VaeDecoder::new(args.latent_dim, args.hidden_dim, args.data_dim, vb.pp("dec"))?;

    let mut elbo = Elbo::new(&decoder, &encoder).with_seed(args.train.seed);
    let n_particles = args.train.n_samples;
    let mut data = InMemoryData::new(x.clone())?;

    info!(
        "Training VAE: {} epochs, {} particles, lr = {}",
        config.num_epochs, n_particles, config.learning_rate
    );
    let trace = train_minibatches(&varmap, &mut data, &config, |_, x_mb, _| {
        let observed = observed_set([("x", x_mb.clone())]);
        if n_particles > 1 {
            elbo.importance_weighted_loss(&observed, n_particles)
        } else {
            elbo.loss(&observed)
        }
    })?;

    if let Some(last) = trace.last() {
        info!("Final training loss: {:.4}", last);
    }
    let bound = elbo.evaluate(&observed_set([("x", x.clone())]))?;
    info!("ELBO per example on the full data: {:.4}", bound);

    let recon = reconstruction_report(&encoder, &decoder, &x, args.train.seed)?;
    info!(
        "Reconstruction: bit accuracy {:.3}, log p(x|z) {:.4}, KL {:.4}",
        recon.bit_accuracy, recon.log_likelihood, recon.kl
    );

    let mut prior_net = BayesianNet::with_seed(args.train.seed);
    prior_net.run(&decoder, ObservedSet::new())?;
    if let Some(node) = prior_net.node("x") {
        let density = node.value().mean_all()?.to_scalar::<f32>()?;
        info!("Fraction of ones in {} prior samples: {:.3}", decoder.num_generate, density);
    }

    save_varmap(&varmap, &args.train.save)
}

/// Per-example averages of one encode/decode round trip
#[derive(Clone, Copy, Debug)]
pub struct ReconstructionReport {
    /// fraction of bits recovered by thresholding the logits at 0
    pub bit_accuracy: f32,
    /// log p(x | z) at the posterior draw
    pub log_likelihood: f32,
    /// KL(q(z | x) || N(0, I)) in closed form
    pub kl: f32,
}

/// Encode `x`, decode one posterior draw with `z` observed, and score
/// the reconstruction from the decoder's cached logits
pub fn reconstruction_report(
    encoder: &VaeEncoder,
    decoder: &VaeDecoder,
    x: &Tensor,
    seed: u64,
) -> Result<ReconstructionReport> {
    let mut q_net = BayesianNet::with_seed(seed);
    q_net.run(encoder, observed_set([("x", x.clone())]))?;
    let z_node = q_net
        .node("z")
        .ok_or_else(|| anyhow::anyhow!("encoder declared no z"))?;
    let kl = match z_node.distribution() {
        Distribution::Normal(q) => gaussian_kl_loss(q.mean(), &(q.ln_std() * 2.0)?)?,
        other => anyhow::bail!("encoder z is {}, not Normal", other.family()),
    };
    let z = z_node.value().detach();

    let mut p_net = BayesianNet::with_seed(seed);
    p_net.run(decoder, observed_set([("z", z)]))?;
    let logits = p_net
        .cache_get("x.logits")
        .ok_or_else(|| anyhow::anyhow!("decoder cached no logits"))?;

    let x_hat = logits.ge(0.0)?.to_dtype(x.dtype())?;
    let scalar = |t: Tensor| -> Result<f32> { Ok(t.to_dtype(DType::F32)?.mean_all()?.to_scalar::<f32>()?) };
    Ok(ReconstructionReport {
        bit_accuracy: scalar(x_hat.eq(x)?)?,
        log_likelihood: scalar(bernoulli_likelihood(x, logits)?)?,
        kl: scalar(kl)?,
    })
}
