use candle_core::Tensor;
use candle_nn::{Activation, Module};

use super::pass::SamplePass;
use crate::error::Result;

/// A layer whose forward pass may draw random weights
pub trait BayesLayer {
    /// One stochastic forward pass
    ///
    /// # Arguments
    /// * `x` - input tensor
    /// * `pass` - random stream, weight mode and KL accumulator of this pass
    fn forward_sample(&self, x: &Tensor, pass: &mut SamplePass) -> Result<Tensor>;
}

/// Wrap a plain `candle_nn::Module` so it can sit in a Bayesian stack
///
/// Contributes no KL term.
pub struct Deterministic<M>(pub M);

impl<M: Module> BayesLayer for Deterministic<M> {
    fn forward_sample(&self, x: &Tensor, _pass: &mut SamplePass) -> Result<Tensor> {
        Ok(self.0.forward(x)?)
    }
}

type BoxedLayer = Box<dyn BayesLayer + Send + Sync>;

/// Stack of Bayesian (or deterministic) layers with optional activations
pub struct BayesSequential {
    layers: Vec<BoxedLayer>,
    activations: Vec<Option<Activation>>,
}

impl BayesLayer for BayesSequential {
    fn forward_sample(&self, input: &Tensor, pass: &mut SamplePass) -> Result<Tensor> {
        let mut x = input.clone();
        for (layer, activation) in self.layers.iter().zip(self.activations.iter()) {
            x = layer.forward_sample(&x, pass)?;
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
        }
        Ok(x)
    }
}

impl BayesSequential {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            activations: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Appends a layer after all the current layers.
    pub fn push<L>(&mut self, layer: L)
    where
        L: BayesLayer + Send + Sync + 'static,
    {
        self.layers.push(Box::new(layer));
        self.activations.push(None);
    }

    pub fn push_with_act<L>(&mut self, layer: L, activation: Activation)
    where
        L: BayesLayer + Send + Sync + 'static,
    {
        self.layers.push(Box::new(layer));
        self.activations.push(Some(activation));
    }

    /// Appends a deterministic module, e.g. `candle_nn::Linear` or a
    /// closure such as `|x: &Tensor| x.flatten_from(1)`
    pub fn push_deterministic<M>(&mut self, module: M)
    where
        M: Module + Send + Sync + 'static,
    {
        self.push(Deterministic(module));
    }
}

impl Default for BayesSequential {
    fn default() -> Self {
        Self::new()
    }
}
