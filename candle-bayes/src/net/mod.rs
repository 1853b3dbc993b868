//! Probabilistic programs and the per-pass context that records them.
//!
//! A program declares named random variables on a [`BayesianNet`]; names
//! found in the observed set take the given value, all others are
//! sampled. Each node keeps its reduced log-density so objectives can
//! combine programs by node name.

mod bayesian_net;
mod node;

pub use bayesian_net::{
    observed_set, BayesianNet, ObservedSet, PassState, ProbabilisticProgram,
};
pub(crate) use bayesian_net::sum_log_probs;
pub use node::{reduce_log_density, NodeOptions, StochasticNode};
