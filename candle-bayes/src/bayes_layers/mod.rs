//! Layers whose weights are Normal posteriors, sampled per forward pass.
//!
//! A caller-owned [`SamplePass`] carries the random stream and collects
//! each layer's KL term; [`BayesianModule::elbo_estimator`] turns several
//! passes into one Monte-Carlo ELBO loss.

mod conv;
mod estimator;
mod linear;
mod pass;
mod posterior;
mod stack;

pub use conv::{bayes_conv2d, BayesConv2d};
pub use estimator::{elbo_estimator_with, BayesianModule, EstimatorConfig};
pub use linear::{bayes_linear, BayesLinear};
pub use pass::{SamplePass, WeightMode};
pub use posterior::{BayesLayerConfig, NormalPosterior, PriorConfig};
pub use stack::{BayesLayer, BayesSequential, Deterministic};
