//! E(n)-equivariant graph neural network primitives.
//!
//! Point sets in 3D (atoms, particles) carry two kinds of per-node state:
//! feature vectors `h` and coordinates `x`. A rigid motion of the input
//! should move the output coordinates the same way and leave the features
//! untouched. The layers here guarantee that by construction.
//!
//! ## The Equivariant Message Passing Framework
//!
//! [Satorras et al. 2021](https://arxiv.org/abs/2102.09844) extend the
//! standard message-passing scheme with a coordinate channel:
//!
//! ```text
//! m_ij = φ_e(h_i, h_j, ||x_i - x_j||², a_ij)
//! x_i' = x_i + AGG_j (x_i - x_j) φ_x(m_ij)
//! h_i' = φ_h(h_i, Σ_j m_ij)
//! ```
//!
//! 1. **MESSAGE**: only the squared distance enters, so messages are invariant
//! 2. **COORDINATES**: moved along edge difference vectors, so they rotate with the input
//! 3. **UPDATE**: features see invariant messages only
//!
//! ## Modules
//!
//! - [`segment`]: Scatter-style sum/mean reductions by destination index
//! - [`radial`]: Squared edge lengths and (normalized) edge directions
//! - [`layer`]: The equivariant convolution [`EquivariantConv`]
//! - [`network`]: Stacked network [`Egnn`] with [`Readout`] taps
//! - [`graph`]: [`EdgeIndex`] and cutoff-based [`radius_graph`]
//! - [`init`]: Seeded weight initialization
//! - [`device`]: Device selection as configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use eqgraph_nn::{Egnn, EgnnConfig, EdgeIndex};
//! use candle_core::{Device, Tensor};
//!
//! let (model, varmap) = Egnn::build(EgnnConfig::new(5, 64, 16))?;
//! eqgraph_nn::initialize_weights(&varmap, 0)?;
//!
//! let h = Tensor::randn(0f32, 1., (10, 5), &Device::Cpu)?;
//! let x = Tensor::randn(0f32, 1., (10, 3), &Device::Cpu)?;
//! let (edges, dist) = eqgraph_nn::radius_graph(&x, 1.5)?;
//! let (h_out, x_out) = model.forward(&h, &x, &edges, None)?;  // (10, 16), (10, 3)
//! ```
//!
//! ## References
//!
//! - Satorras, Hoogeboom & Welling (2021). "E(n) Equivariant Graph Neural Networks."
//! - Gilmer et al. (2017). "Neural Message Passing for Quantum Chemistry."

pub mod activation;
pub mod device;
pub mod error;
pub mod graph;
pub mod init;
pub mod layer;
pub mod network;
pub mod radial;
pub mod segment;

pub use activation::Activation;
pub use device::DeviceConfig;
pub use error::{Error, Result};
pub use graph::{radius_graph, EdgeIndex};
pub use init::initialize_weights;
pub use layer::{ConvOutput, EquivariantConv, EquivariantConvConfig};
pub use network::{Egnn, EgnnConfig, Readout};
pub use radial::coord_to_radial;
pub use segment::{segment_mean, segment_sum, Aggregation};
