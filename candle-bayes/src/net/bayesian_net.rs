use std::collections::HashMap;

use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::node::{NodeOptions, StochasticNode};
use crate::dist::{Bernoulli, Categorical, Distribution, Normal};
use crate::error::{BayesError, Result};

/// Observed values keyed by node name
pub type ObservedSet = HashMap<String, Tensor>;

/// Build an [`ObservedSet`] from `(name, tensor)` pairs
pub fn observed_set<'a, I>(pairs: I) -> ObservedSet
where
    I: IntoIterator<Item = (&'a str, Tensor)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassState {
    Created,
    Observing,
    Complete,
}

/// A probabilistic program declares its stochastic nodes on the context
/// it is handed, one pass per call.
pub trait ProbabilisticProgram {
    fn forward(&self, net: &mut BayesianNet) -> Result<()>;

    /// log p over all declared nodes; override to customize the joint
    fn log_joint(&self, net: &BayesianNet) -> Result<Tensor> {
        net.log_joint()
    }
}

impl<P> ProbabilisticProgram for &P
where
    P: ProbabilisticProgram + ?Sized,
{
    fn forward(&self, net: &mut BayesianNet) -> Result<()> {
        (**self).forward(net)
    }

    fn log_joint(&self, net: &BayesianNet) -> Result<Tensor> {
        (**self).log_joint(net)
    }
}

/// Recording context for one forward pass of a probabilistic program
///
/// Owned by the caller and handed to the program by `&mut`; every
/// `observe` wipes the nodes and cache of the previous pass.
pub struct BayesianNet {
    state: PassState,
    observed: ObservedSet,
    nodes: Vec<StochasticNode>,
    node_index: HashMap<String, usize>,
    cache: HashMap<String, Tensor>,
    rng: StdRng,
}

impl Default for BayesianNet {
    fn default() -> Self {
        Self::new()
    }
}

impl BayesianNet {
    /// Context with an OS-seeded random stream
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            state: PassState::Created,
            observed: ObservedSet::new(),
            nodes: vec![],
            node_index: HashMap::new(),
            cache: HashMap::new(),
            rng,
        }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    /// Start a new pass with these observations
    pub fn observe(&mut self, observed: ObservedSet) {
        self.observed = observed;
        self.nodes.clear();
        self.node_index.clear();
        self.cache.clear();
        self.state = PassState::Observing;
    }

    /// Close the current pass; nodes and cache become readable
    pub fn complete(&mut self) -> Result<()> {
        if self.state != PassState::Observing {
            return Err(BayesError::invalid_argument(
                "state",
                format!("cannot complete a pass in state {:?}", self.state),
            ));
        }
        self.state = PassState::Complete;
        Ok(())
    }

    /// observe → `program.forward` → complete
    pub fn run<P>(&mut self, program: &P, observed: ObservedSet) -> Result<&Self>
    where
        P: ProbabilisticProgram + ?Sized,
    {
        self.observe(observed);
        program.forward(self)?;
        self.complete()?;
        Ok(self)
    }

    pub fn observed(&self, name: &str) -> Option<&Tensor> {
        self.observed.get(name)
    }

    /// An observation the program cannot run without
    pub fn require_observed(&self, name: &str) -> Result<Tensor> {
        self.observed.get(name).cloned().ok_or_else(|| {
            BayesError::invalid_argument("observed", format!("'{}' was not observed", name))
        })
    }

    /// Declare a named random variable and return its value
    ///
    /// An observed name takes the provided tensor as is; otherwise the
    /// value is drawn from `distribution`.
    pub fn stochastic<D>(&mut self, name: &str, distribution: D, options: &NodeOptions) -> Result<Tensor>
    where
        D: Into<Distribution>,
    {
        if self.state != PassState::Observing {
            return Err(BayesError::invalid_argument(
                "state",
                format!("node '{}' declared outside an observing pass", name),
            ));
        }
        if self.node_index.contains_key(name) {
            return Err(BayesError::DuplicateNode(name.to_string()));
        }

        let distribution = distribution.into();
        let (value, is_observed) = match self.observed.get(name) {
            Some(v) => {
                if v.shape() != distribution.batch_shape() {
                    return Err(BayesError::shape(format!(
                        "observed '{}' has shape {:?}, {} batch shape is {:?}",
                        name,
                        v.dims(),
                        distribution.family(),
                        distribution.batch_shape().dims()
                    )));
                }
                (v.clone(), true)
            }
            None => (
                distribution.sample(&mut self.rng, options.reparameterize)?,
                false,
            ),
        };

        let node = StochasticNode::realize(name, distribution, value.clone(), is_observed, options)?;
        self.node_index.insert(name.to_string(), self.nodes.len());
        self.nodes.push(node);
        Ok(value)
    }

    /// Normal node N(mean, std²)
    pub fn normal(
        &mut self,
        name: &str,
        mean: &Tensor,
        std: &Tensor,
        options: &NodeOptions,
    ) -> Result<Tensor> {
        let dist = Normal::new(mean, std)?;
        self.stochastic(name, dist, options)
    }

    /// Bernoulli node; sampling is never reparameterized
    pub fn bernoulli(&mut self, name: &str, probs: &Tensor, options: &NodeOptions) -> Result<Tensor> {
        let dist = Bernoulli::new(probs)?;
        let options = options.clone().reparameterize(false);
        self.stochastic(name, dist, &options)
    }

    /// Categorical node over the last axis of `logits`
    pub fn categorical(&mut self, name: &str, logits: &Tensor, options: &NodeOptions) -> Result<Tensor> {
        let dist = Categorical::new(logits)?;
        let options = options.clone().reparameterize(false);
        self.stochastic(name, dist, &options)
    }

    fn is_complete(&self) -> bool {
        self.state == PassState::Complete
    }

    /// A node of the last completed pass
    pub fn node(&self, name: &str) -> Option<&StochasticNode> {
        if !self.is_complete() {
            return None;
        }
        self.node_index.get(name).map(|&i| &self.nodes[i])
    }

    /// Nodes of the last completed pass in declaration order; empty while
    /// a pass is open or after one failed
    pub fn nodes(&self) -> &[StochasticNode] {
        if self.is_complete() {
            &self.nodes
        } else {
            &[]
        }
    }

    /// Nodes whose value was sampled in the last completed pass
    pub fn latent_nodes(&self) -> impl Iterator<Item = &StochasticNode> {
        self.nodes().iter().filter(|n| !n.is_observed())
    }

    /// Stash a deterministic intermediate for the caller
    pub fn cache_insert(&mut self, key: &str, value: Tensor) {
        self.cache.insert(key.to_string(), value);
    }

    pub fn cache_get(&self, key: &str) -> Option<&Tensor> {
        if !self.is_complete() {
            return None;
        }
        self.cache.get(key)
    }

    /// Sum of every node's reduced log-probability
    pub fn log_joint(&self) -> Result<Tensor> {
        if !self.is_complete() {
            return Err(BayesError::invalid_argument(
                "state",
                format!("log joint read in state {:?}", self.state),
            ));
        }
        sum_log_probs(self.nodes.iter())
    }
}

/// Broadcast-sum the reduced log-probabilities of `nodes`
pub(crate) fn sum_log_probs<'a, I>(nodes: I) -> Result<Tensor>
where
    I: IntoIterator<Item = &'a StochasticNode>,
{
    let mut total: Option<Tensor> = None;
    for node in nodes {
        total = Some(match total {
            None => node.log_prob().clone(),
            Some(acc) => acc.broadcast_add(node.log_prob()).map_err(|_| {
                BayesError::shape(format!(
                    "log-prob of '{}' with shape {:?} does not broadcast with {:?}",
                    node.name(),
                    node.log_prob().dims(),
                    acc.dims()
                ))
            })?,
        });
    }
    total.ok_or_else(|| BayesError::invalid_argument("nodes", "no stochastic nodes to sum"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    struct TwoNodes;

    impl ProbabilisticProgram for TwoNodes {
        fn forward(&self, net: &mut BayesianNet) -> Result<()> {
            let dev = Device::Cpu;
            let mean = Tensor::zeros((4, 3), DType::F32, &dev)?;
            let std = Tensor::ones((4, 3), DType::F32, &dev)?;
            let opts = NodeOptions::new().reduce_mean(&[0]).reduce_sum(&[1]);
            let z = net.normal("z", &mean, &std, &opts.clone().reparameterize(false))?;
            let probs = candle_nn::ops::sigmoid(&z)?;
            net.cache_insert("x_mean", probs.clone());
            net.bernoulli("x", &probs, &opts)?;
            Ok(())
        }
    }

    #[test]
    fn test_observed_value_is_kept() -> Result<()> {
        let dev = Device::Cpu;
        let z = Tensor::new(&[[0.1f32, -0.2, 0.3]; 4], &dev)?;
        let mut net = BayesianNet::with_seed(0);
        net.run(&TwoNodes, observed_set([("z", z.clone())]))?;

        let node = net.node("z").expect("z declared");
        assert!(node.is_observed());
        assert_eq!(node.value().to_vec2::<f32>()?, z.to_vec2::<f32>()?);
        assert!(!net.node("x").expect("x declared").is_observed());
        assert_eq!(net.state(), PassState::Complete);
        assert!(net.cache_get("x_mean").is_some());
        assert_eq!(net.log_joint()?.dims(), &[] as &[usize]);
        Ok(())
    }

    #[test]
    fn test_observe_resets_previous_pass() -> Result<()> {
        let mut net = BayesianNet::with_seed(1);
        net.run(&TwoNodes, ObservedSet::new())?;
        assert_eq!(net.nodes().len(), 2);

        net.observe(ObservedSet::new());
        assert!(net.nodes().is_empty());
        assert!(net.cache_get("x_mean").is_none());
        assert_eq!(net.state(), PassState::Observing);
        Ok(())
    }

    #[test]
    fn test_duplicate_and_out_of_pass_declarations() -> Result<()> {
        let dev = Device::Cpu;
        let mean = Tensor::zeros(2, DType::F32, &dev)?;
        let std = Tensor::ones(2, DType::F32, &dev)?;
        let opts = NodeOptions::new();

        let mut net = BayesianNet::with_seed(2);
        assert!(matches!(
            net.normal("z", &mean, &std, &opts),
            Err(BayesError::InvalidArgument { .. })
        ));

        net.observe(ObservedSet::new());
        net.normal("z", &mean, &std, &opts)?;
        assert!(matches!(
            net.normal("z", &mean, &std, &opts),
            Err(BayesError::DuplicateNode(_))
        ));
        Ok(())
    }

    struct FailsMidway;

    impl ProbabilisticProgram for FailsMidway {
        fn forward(&self, net: &mut BayesianNet) -> Result<()> {
            let dev = Device::Cpu;
            let mean = Tensor::zeros(2, DType::F32, &dev)?;
            let std = Tensor::ones(2, DType::F32, &dev)?;
            net.normal("z", &mean, &std, &NodeOptions::new())?;
            net.cache_insert("partial", mean);
            Err(BayesError::invalid_argument("program", "stopped after z"))
        }
    }

    #[test]
    fn test_failed_pass_hides_partial_state() -> Result<()> {
        let mut net = BayesianNet::with_seed(4);
        assert!(net.run(&FailsMidway, ObservedSet::new()).is_err());

        assert_eq!(net.state(), PassState::Observing);
        assert!(net.node("z").is_none());
        assert!(net.nodes().is_empty());
        assert_eq!(net.latent_nodes().count(), 0);
        assert!(net.cache_get("partial").is_none());
        assert!(matches!(
            net.log_joint(),
            Err(BayesError::InvalidArgument { arg: "state", .. })
        ));

        net.run(&TwoNodes, ObservedSet::new())?;
        assert_eq!(net.nodes().len(), 2);
        assert!(net.log_joint().is_ok());
        Ok(())
    }

    #[test]
    fn test_observed_shape_must_match() -> Result<()> {
        let dev = Device::Cpu;
        let mut net = BayesianNet::with_seed(3);
        let bad = Tensor::zeros((2, 3), DType::F32, &dev)?;
        assert!(matches!(
            net.run(&TwoNodes, observed_set([("z", bad)])),
            Err(BayesError::Shape(_))
        ));
        Ok(())
    }
}
