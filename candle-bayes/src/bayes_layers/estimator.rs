use candle_core::Tensor;
use log::debug;
use rayon::prelude::*;

use super::pass::{SamplePass, WeightMode};
use super::stack::BayesLayer;
use crate::error::{BayesError, Result};

/// Monte-Carlo settings of [`elbo_estimator_with`]
#[derive(Clone, Copy, Debug)]
pub struct EstimatorConfig {
    pub n_samples: usize,
    /// N in KL / N; the KL is charged once per epoch over N examples
    pub dataset_size: usize,
    /// evaluate the samples on the rayon pool
    pub parallel: bool,
    /// sample `s` uses `seed + s`; `None` draws a fresh base seed per call
    pub seed: Option<u64>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            n_samples: 1,
            dataset_size: 1,
            parallel: false,
            seed: None,
        }
    }
}

/// A Bayesian network as a whole: stochastic forward, point prediction
/// and the Monte-Carlo ELBO loss
pub trait BayesianModule: BayesLayer + Sync {
    /// Forward pass with every weight at its posterior mean
    fn predict(&self, x: &Tensor) -> Result<Tensor> {
        let mut pass = SamplePass::with_seed(0).with_mode(WeightMode::Mean);
        self.forward_sample(x, &mut pass)
    }

    /// (1/S) Σ_s [ criterion(f_s(inputs), targets) + KL_s / dataset_size ]
    ///
    /// # Arguments
    /// * `inputs` - minibatch, examples along the first axis
    /// * `targets` - matching targets, same first dimension
    /// * `n_samples` - number of weight draws S
    /// * `criterion` - scalar likelihood loss (e.g. cross entropy)
    /// * `dataset_size` - number of training examples N
    fn elbo_estimator<C>(
        &self,
        inputs: &Tensor,
        targets: &Tensor,
        n_samples: usize,
        criterion: C,
        dataset_size: usize,
    ) -> Result<Tensor>
    where
        C: Fn(&Tensor, &Tensor) -> Result<Tensor> + Sync,
        Self: Sized,
    {
        let config = EstimatorConfig {
            n_samples,
            dataset_size,
            ..Default::default()
        };
        elbo_estimator_with(self, inputs, targets, &criterion, &config)
    }
}

impl<T> BayesianModule for T where T: BayesLayer + Sync {}

/// Monte-Carlo ELBO loss of `module` under `config`
///
/// Samples are independent: each gets its own [`SamplePass`] and random
/// stream, so the parallel and sequential paths give the same loss for
/// the same seed.
pub fn elbo_estimator_with<M, C>(
    module: &M,
    inputs: &Tensor,
    targets: &Tensor,
    criterion: &C,
    config: &EstimatorConfig,
) -> Result<Tensor>
where
    M: BayesLayer + Sync + ?Sized,
    C: Fn(&Tensor, &Tensor) -> Result<Tensor> + Sync,
{
    if config.n_samples < 1 {
        return Err(BayesError::invalid_argument(
            "n_samples",
            "need at least one Monte-Carlo sample",
        ));
    }
    if config.dataset_size == 0 {
        return Err(BayesError::invalid_argument(
            "dataset_size",
            "dataset size must be positive",
        ));
    }
    if inputs.rank() == 0 || targets.rank() == 0 {
        return Err(BayesError::shape(format!(
            "inputs {:?} and targets {:?} need an example axis",
            inputs.dims(),
            targets.dims()
        )));
    }
    let (n_in, n_tgt) = (inputs.dim(0)?, targets.dim(0)?);
    if n_in != n_tgt {
        return Err(BayesError::shape(format!(
            "{} inputs but {} targets",
            n_in, n_tgt
        )));
    }

    let base_seed = config.seed.unwrap_or_else(rand::random::<u64>);
    let seed_of = |s: usize| base_seed.wrapping_add(s as u64);
    let run = |s: usize| {
        sample_loss(
            module,
            inputs,
            targets,
            criterion,
            config.dataset_size,
            seed_of(s),
        )
    };

    let losses = if config.parallel {
        (0..config.n_samples)
            .into_par_iter()
            .map(run)
            .collect::<Result<Vec<_>>>()?
    } else {
        (0..config.n_samples)
            .map(run)
            .collect::<Result<Vec<_>>>()?
    };

    let loss = Tensor::stack(&losses, 0)?.mean(0)?;
    debug!(
        "ELBO estimator: {} samples (parallel: {}), N = {}",
        config.n_samples, config.parallel, config.dataset_size
    );
    Ok(loss)
}

fn sample_loss<M, C>(
    module: &M,
    inputs: &Tensor,
    targets: &Tensor,
    criterion: &C,
    dataset_size: usize,
    seed: u64,
) -> Result<Tensor>
where
    M: BayesLayer + ?Sized,
    C: Fn(&Tensor, &Tensor) -> Result<Tensor>,
{
    let mut pass = SamplePass::with_seed(seed);
    let outputs = module.forward_sample(inputs, &mut pass)?;
    let nll = criterion(&outputs, targets)?;
    if nll.rank() != 0 {
        return Err(BayesError::shape(format!(
            "criterion must return a scalar, found {:?}",
            nll.dims()
        )));
    }

    if pass.kl_terms().is_empty() {
        return Ok(nll);
    }
    let kl = (pass.total_kl()? / dataset_size as f64)?;
    Ok((nll + kl.to_dtype(outputs.dtype())?)?)
}
