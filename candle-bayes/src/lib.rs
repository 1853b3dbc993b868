pub mod bayes_layers;
pub mod candle_data_loader;
pub mod candle_inference;
pub mod candle_loss_functions;
pub mod cli;
pub mod dist;
pub mod error;
pub mod net;
pub mod variational;

pub use error::{BayesError, Result};

pub use candle_core;
pub use candle_nn;
