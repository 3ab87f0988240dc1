//! `eqgraph`: E(n)-equivariant graph networks with latent-density reliability.
//!
//! Facade over the workspace crates:
//!
//! - [`nn`]: segment reductions, radial geometry, the equivariant layer, the
//!   stacked network and neighbor-graph construction
//! - [`density`]: density models over latent vectors (Gaussian mixture)
//! - [`train`]: training loop, periodic density fits and reliability scoring
//!
//! The most used types are re-exported at the top level.

pub use eqgraph_density as density;
pub use eqgraph_nn as nn;
pub use eqgraph_train as train;

pub use eqgraph_density::{DensityModel, GaussianMixture, GmmConfig};
pub use eqgraph_nn::{radius_graph, EdgeIndex, Egnn, EgnnConfig, EquivariantConv, EquivariantConvConfig, Readout};
pub use eqgraph_train::{GraphBatch, GraphSource, Trainer, TrainingConfig, TrainingReport};
