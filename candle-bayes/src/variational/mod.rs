//! Variational objectives over a generative and a variational program.
//!
//! ELBO = E_q[log p(x, z) - log q(z | x)]
//!
//! - `Estimator::Sgvb`: the negative bound as is, for reparameterized
//!   latents (gradients flow through the sample into q)
//! - `Estimator::Reinforce`: score-function surrogate with a
//!   moving-average baseline, for latents sampled off the graph
//! - `importance_weighted_loss`: the K-particle bound

mod elbo;
mod importance;

pub use elbo::{Elbo, ElboTerms, Estimator};
pub use importance::log_mean_exp;
