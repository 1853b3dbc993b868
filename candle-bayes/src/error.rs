//! Error types for stochastic programs, objectives and Bayesian layers

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BayesError>;

/// Every variant signals a defect in the model or its configuration;
/// nothing here is transient, so callers should fail the run.
#[derive(Error, Debug)]
pub enum BayesError {
    /// distribution parameters outside the family's valid range
    #[error("invalid parameter for {family}: {reason}")]
    Validation {
        family: &'static str,
        reason: String,
    },

    /// a value (or a clamped-off probability) outside the support
    #[error("value outside the domain of {family}: {reason}")]
    Domain {
        family: &'static str,
        reason: String,
    },

    #[error("stochastic node '{0}' declared twice in one pass")]
    DuplicateNode(String),

    #[error("node '{name}' cannot be matched across programs: {reason}")]
    NodeMismatch { name: String, reason: String },

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument { arg: &'static str, reason: String },

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

impl BayesError {
    pub fn shape<S: Into<String>>(msg: S) -> Self {
        Self::Shape(msg.into())
    }

    pub fn invalid_argument<S: Into<String>>(arg: &'static str, reason: S) -> Self {
        Self::InvalidArgument {
            arg,
            reason: reason.into(),
        }
    }
}
