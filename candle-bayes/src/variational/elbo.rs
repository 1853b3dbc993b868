use std::collections::HashSet;

use candle_core::Tensor;
use log::debug;

use crate::dist::{kl_normal_normal, Distribution};
use crate::error::{BayesError, Result};
use crate::net::{sum_log_probs, BayesianNet, ObservedSet, ProbabilisticProgram};

/// Gradient estimator behind the ELBO loss
#[derive(Clone, Debug, PartialEq)]
pub enum Estimator {
    /// -ELBO directly; gradients flow through reparameterized latents
    Sgvb,
    /// Score-function surrogate for latents drawn without
    /// reparameterization: -[detach(ℓ - b) * log q + ℓ] with ℓ = log p - log q
    /// and a moving-average baseline b
    Reinforce { baseline_decay: f64 },
}

impl Default for Estimator {
    fn default() -> Self {
        Self::Sgvb
    }
}

impl Estimator {
    pub fn reinforce() -> Self {
        Self::Reinforce {
            baseline_decay: 0.8,
        }
    }
}

/// log p(x, z) and log q(z | x) of one pass, before any averaging
///
/// Under the analytic KL, `log_joint` leaves out the paired Normal
/// latents and `log_q` carries their KL(q || p) instead.
pub struct ElboTerms {
    pub log_joint: Tensor,
    pub log_q: Tensor,
}

impl ElboTerms {
    /// log p(x, z) - log q(z | x)
    pub fn bound(&self) -> Result<Tensor> {
        self.log_joint.broadcast_sub(&self.log_q).map_err(|_| {
            BayesError::shape(format!(
                "log p {:?} and log q {:?} do not broadcast",
                self.log_joint.dims(),
                self.log_q.dims()
            ))
        })
    }
}

/// Evidence lower bound of a generative program p(x, z) with a
/// variational program q(z | x)
///
/// Latents are matched by node name: every latent sampled by `q` is fed
/// to `p` as an observation, and `p` may not sample a latent of its own.
pub struct Elbo<G, V> {
    generator: G,
    variational: V,
    estimator: Estimator,
    generator_net: BayesianNet,
    variational_net: BayesianNet,
    baseline: Option<f64>,
    analytic_kl: bool,
}

impl<G, V> Elbo<G, V>
where
    G: ProbabilisticProgram,
    V: ProbabilisticProgram,
{
    pub fn new(generator: G, variational: V) -> Self {
        Self {
            generator,
            variational,
            estimator: Estimator::default(),
            generator_net: BayesianNet::new(),
            variational_net: BayesianNet::new(),
            baseline: None,
            analytic_kl: false,
        }
    }

    /// Seed the variational draws (and the generator's, if any)
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.variational_net.reseed(seed);
        self.generator_net.reseed(seed.wrapping_add(1));
        self
    }

    pub fn with_estimator(mut self, estimator: Estimator) -> Self {
        self.estimator = estimator;
        self.baseline = None;
        self
    }

    /// Replace log p(z) - log q(z) by -KL(q || p) in closed form for
    /// every latent that is Normal under both programs
    ///
    /// The generator's own `log_joint` override is bypassed in this mode.
    pub fn with_analytic_kl(mut self, flag: bool) -> Self {
        self.analytic_kl = flag;
        self
    }

    pub fn analytic_kl(&self) -> bool {
        self.analytic_kl
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn variational(&self) -> &V {
        &self.variational
    }

    /// Context of the last generative pass (nodes, cache)
    pub fn generator_net(&self) -> &BayesianNet {
        &self.generator_net
    }

    /// Context of the last variational pass
    pub fn variational_net(&self) -> &BayesianNet {
        &self.variational_net
    }

    /// Current REINFORCE baseline, if one has been accumulated
    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    /// Run q with `observed`, then p with `observed` plus q's latents
    pub fn terms(&mut self, observed: &ObservedSet) -> Result<ElboTerms> {
        self.variational_net
            .run(&self.variational, observed.clone())?;

        let mut joint_observed: ObservedSet = self
            .variational_net
            .latent_nodes()
            .map(|n| (n.name().to_string(), n.value().clone()))
            .collect();
        if joint_observed.is_empty() {
            return Err(BayesError::invalid_argument(
                "variational",
                "the variational program sampled no latent node",
            ));
        }
        for (k, v) in observed {
            joint_observed.insert(k.clone(), v.clone());
        }

        self.generator_net.run(&self.generator, joint_observed)?;
        check_matched_nodes(&self.variational_net, &self.generator_net)?;

        let (log_joint, log_q) = if self.analytic_kl {
            analytic_terms(&self.variational_net, &self.generator_net)?
        } else {
            (
                self.generator.log_joint(&self.generator_net)?,
                sum_log_probs(self.variational_net.latent_nodes())?,
            )
        };

        if log::log_enabled!(log::Level::Debug) {
            debug!(
                "log p(x,z) = {:.4}, log q(z|x) = {:.4}",
                log_joint.mean_all()?.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?,
                log_q.mean_all()?.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?,
            );
        }

        Ok(ElboTerms { log_joint, log_q })
    }

    /// Scalar loss to minimize under the configured estimator
    pub fn loss(&mut self, observed: &ObservedSet) -> Result<Tensor> {
        let terms = self.terms(observed)?;
        let bound = terms.bound()?;

        match self.estimator.clone() {
            Estimator::Sgvb => Ok(mean_if_batched(&bound)?.neg()?),
            Estimator::Reinforce { .. } if self.analytic_kl => Err(BayesError::invalid_argument(
                "estimator",
                "the score-function surrogate needs log q(z), not a closed-form KL",
            )),
            Estimator::Reinforce { baseline_decay } => {
                let signal = bound.detach();
                let signal_mean: f64 = signal
                    .mean_all()?
                    .to_dtype(candle_core::DType::F64)?
                    .to_scalar()?;

                let baseline = match self.baseline {
                    Some(b) => baseline_decay * b + (1.0 - baseline_decay) * signal_mean,
                    None => signal_mean,
                };
                self.baseline = Some(baseline);

                let centered = (signal - baseline)?;
                let surrogate = centered.broadcast_mul(&terms.log_q)?.broadcast_add(&bound)?;
                Ok(mean_if_batched(&surrogate)?.neg()?)
            }
        }
    }

    /// The bound itself (no estimator surrogate), detached, for monitoring
    pub fn evaluate(&mut self, observed: &ObservedSet) -> Result<f32> {
        let bound = self.terms(observed)?.bound()?.detach();
        Ok(mean_if_batched(&bound)?
            .to_dtype(candle_core::DType::F32)?
            .to_scalar::<f32>()?)
    }
}

/// Fail unless q's latents and p's nodes line up by name
fn check_matched_nodes(q_net: &BayesianNet, p_net: &BayesianNet) -> Result<()> {
    for node in q_net.latent_nodes() {
        if p_net.node(node.name()).is_none() {
            return Err(BayesError::NodeMismatch {
                name: node.name().to_string(),
                reason: "sampled by the variational program but not declared by the generative program"
                    .into(),
            });
        }
    }
    if let Some(node) = p_net.latent_nodes().next() {
        return Err(BayesError::NodeMismatch {
            name: node.name().to_string(),
            reason: "sampled by the generative program but not provided by the variational program"
                .into(),
        });
    }
    Ok(())
}

/// (Σ log p of unpaired nodes, Σ KL of Normal pairs + Σ log q of the rest)
fn analytic_terms(q_net: &BayesianNet, p_net: &BayesianNet) -> Result<(Tensor, Tensor)> {
    let mut paired = HashSet::new();
    let mut log_q: Option<Tensor> = None;

    for q_node in q_net.latent_nodes() {
        let term = match p_net.node(q_node.name()).map(|p| p.distribution()) {
            Some(Distribution::Normal(p)) => match q_node.distribution() {
                Distribution::Normal(q) => {
                    paired.insert(q_node.name());
                    q_node.reduce(&kl_normal_normal(q, p)?)?
                }
                _ => q_node.log_prob().clone(),
            },
            _ => q_node.log_prob().clone(),
        };
        log_q = Some(match log_q {
            None => term,
            Some(acc) => acc.broadcast_add(&term)?,
        });
    }

    let log_joint = sum_log_probs(
        p_net
            .nodes()
            .iter()
            .filter(|n| !paired.contains(n.name())),
    )?;
    let log_q = log_q.ok_or_else(|| {
        BayesError::invalid_argument("variational", "the variational program sampled no latent node")
    })?;
    Ok((log_joint, log_q))
}

pub(crate) fn mean_if_batched(t: &Tensor) -> Result<Tensor> {
    if t.rank() > 0 {
        Ok(t.mean_all()?)
    } else {
        Ok(t.clone())
    }
}
