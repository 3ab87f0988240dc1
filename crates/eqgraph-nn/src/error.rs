//! Error types for eqgraph-nn.

use thiserror::Error;

/// Equivariant network error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Width mismatch on a named input.
    #[error("dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Tensor rank or layout does not fit the input contract.
    #[error("shape mismatch for {what}: {detail}")]
    ShapeMismatch { what: &'static str, detail: String },

    /// Edge or segment index outside `[0, bound)`.
    #[error("index {index} out of range for {bound} nodes")]
    IndexOutOfRange { index: i64, bound: usize },

    /// Aggregation mode string that is neither `sum` nor `mean`.
    #[error("unknown aggregation mode `{0}` (expected `sum` or `mean`)")]
    UnknownAggregation(String),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
