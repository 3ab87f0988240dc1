//! Training and reliability scoring for equivariant graph networks.
//!
//! [`Trainer`] fits an [`eqgraph_nn::Egnn`] to per-node targets and, on a
//! fixed epoch cadence, fits a density model to the network's latent
//! representations. The fitted density then scores unseen graphs: the mean
//! negative log-likelihood of their latent rows is the reliability score.
//!
//! ## Seams
//!
//! - Optimizer: any [`candle_nn::Optimizer`] (AdamW by default)
//! - Density: any [`eqgraph_density::DensityModel`] (Gaussian mixture by default)
//! - Data: any [`GraphSource`] (slices and vectors of [`GraphBatch`] included)

pub mod batch;
pub mod error;
pub mod trainer;

pub use batch::{GraphBatch, GraphSource};
pub use error::{Error, Result};
pub use trainer::{Trainer, TrainingConfig, TrainingReport};
