use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{BayesError, Result};

/// How a Bayesian layer realizes its weights in one pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WeightMode {
    /// draw from the posterior (training, Monte-Carlo prediction)
    Sample,
    /// use the posterior mean
    Mean,
}

/// State of one Monte-Carlo forward pass through a Bayesian module
///
/// Carries the random stream for weight draws and collects each layer's
/// KL term; nothing here outlives the pass.
pub struct SamplePass {
    rng: StdRng,
    mode: WeightMode,
    kl_terms: Vec<(String, Tensor)>,
}

impl SamplePass {
    pub fn new(rng: StdRng) -> Self {
        Self {
            rng,
            mode: WeightMode::Sample,
            kl_terms: vec![],
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn with_mode(mut self, mode: WeightMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> WeightMode {
        self.mode
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn record_kl(&mut self, layer: &str, kl: Tensor) {
        self.kl_terms.push((layer.to_string(), kl));
    }

    /// KL terms in the order the layers ran
    pub fn kl_terms(&self) -> &[(String, Tensor)] {
        &self.kl_terms
    }

    /// Σ over layers of KL(q(w) || p(w))
    pub fn total_kl(&self) -> Result<Tensor> {
        let mut terms = self.kl_terms.iter().map(|(_, kl)| kl);
        let first = terms.next().ok_or_else(|| {
            BayesError::invalid_argument("kl_terms", "no Bayesian layer ran in this pass")
        })?;
        let mut total = first.clone();
        for kl in terms {
            total = (total + kl)?;
        }
        Ok(total)
    }
}
