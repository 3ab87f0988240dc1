//! Error types for eqgraph-density.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Scoring was requested before `fit`.
    #[error("density model is not fitted")]
    NotFitted,

    /// Fewer samples than mixture components.
    #[error("need at least {components} samples to fit {components} components, got {samples}")]
    InsufficientSamples { samples: usize, components: usize },

    /// Sample width differs from the fitted width.
    #[error("dimension mismatch: model has {expected} features, data has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A component covariance is not positive definite even after regularization.
    #[error("covariance of component {component} is not positive definite; raise reg_covar")]
    IllConditioned { component: usize },

    /// Scoring was asked to average over zero samples.
    #[error("cannot score an empty sample set")]
    EmptyInput,

    /// Data contains NaN or infinity.
    #[error("data contains non-finite values")]
    NonFinite,

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
