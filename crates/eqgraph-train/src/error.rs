//! Error types for eqgraph-train.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Model(#[from] eqgraph_nn::Error),

    #[error(transparent)]
    Density(#[from] eqgraph_density::Error),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Reliability was requested before any density fit.
    #[error("density model has not been fitted yet")]
    DensityNotFitted,

    /// A training step got a batch without targets.
    #[error("batch has no targets")]
    MissingTargets,

    #[error("batch {index} out of range for a source of {len}")]
    BatchOutOfRange { index: usize, len: usize },

    /// The data source yielded no batches.
    #[error("data source is empty")]
    EmptySource,

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
