//! Stacked equivariant network.
//!
//! ```text
//! h ──embedding_in──► gcl_0 ──► gcl_1 ──► … ──► gcl_{n-1} ──embedding_out──► h'
//! x ─────────────────►  │  ──────►  │  ──► … ──►    │     ─────────────────► x'
//! ```
//!
//! Every layer works at `hidden_dim`; only the input and output embeddings
//! change the feature width. Edge attributes reach every layer.

use candle_core::{DType, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::device::DeviceConfig;
use crate::error::{Error, Result};
use crate::graph::EdgeIndex;
use crate::layer::{EquivariantConv, EquivariantConvConfig};
use crate::segment::Aggregation;

/// Where [`Egnn::hidden_representation`] reads features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Readout {
    /// Features right after layer `k` (hidden width).
    ///
    /// An index past the last layer behaves like [`Readout::Output`].
    Layer(usize),
    /// Final, output-projected features.
    #[default]
    Output,
}

/// EGNN configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EgnnConfig {
    pub in_node_dim: usize,
    pub hidden_dim: usize,
    pub out_node_dim: usize,
    /// Width of edge attributes (0 = none).
    pub edge_attr_dim: usize,
    pub n_layers: usize,
    pub activation: Activation,
    pub residual: bool,
    pub attention: bool,
    pub normalize: bool,
    pub tanh: bool,
    pub coords_agg: Aggregation,
    pub device: DeviceConfig,
}

impl Default for EgnnConfig {
    fn default() -> Self {
        Self {
            in_node_dim: 5,
            hidden_dim: 64,
            out_node_dim: 16,
            edge_attr_dim: 0,
            n_layers: 3,
            activation: Activation::Silu,
            residual: false,
            attention: false,
            normalize: true,
            tanh: false,
            coords_agg: Aggregation::Mean,
            device: DeviceConfig::Cpu,
        }
    }
}

impl EgnnConfig {
    pub fn new(in_node_dim: usize, hidden_dim: usize, out_node_dim: usize) -> Self {
        Self {
            in_node_dim,
            hidden_dim,
            out_node_dim,
            ..Default::default()
        }
    }

    pub fn with_edge_attr_dim(mut self, dim: usize) -> Self {
        self.edge_attr_dim = dim;
        self
    }

    pub fn with_layers(mut self, n_layers: usize) -> Self {
        self.n_layers = n_layers;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_residual(mut self, residual: bool) -> Self {
        self.residual = residual;
        self
    }

    pub fn with_attention(mut self, attention: bool) -> Self {
        self.attention = attention;
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_tanh(mut self, tanh: bool) -> Self {
        self.tanh = tanh;
        self
    }

    pub fn with_coords_agg(mut self, coords_agg: Aggregation) -> Self {
        self.coords_agg = coords_agg;
        self
    }

    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }

    /// Config shared by every stacked layer.
    fn layer_config(&self) -> EquivariantConvConfig {
        EquivariantConvConfig::new(self.hidden_dim, self.hidden_dim, self.hidden_dim)
            .with_edge_attr_dim(self.edge_attr_dim)
            .with_activation(self.activation)
            .with_residual(self.residual)
            .with_attention(self.attention)
            .with_normalize(self.normalize)
            .with_coords_agg(self.coords_agg)
            .with_tanh(self.tanh)
    }
}

/// E(n)-equivariant graph neural network.
pub struct Egnn {
    embedding_in: Linear,
    layers: Vec<EquivariantConv>,
    embedding_out: Linear,
    config: EgnnConfig,
}

impl Egnn {
    /// Register all parameters under `vb`.
    ///
    /// Layers live under `gcl_0 .. gcl_{n-1}`.
    pub fn new(config: EgnnConfig, vb: VarBuilder) -> Result<Self> {
        if config.in_node_dim == 0 || config.out_node_dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "node widths must be positive (in {}, out {})",
                config.in_node_dim, config.out_node_dim
            )));
        }
        let embedding_in = linear(config.in_node_dim, config.hidden_dim, vb.pp("embedding_in"))?;
        let layers = (0..config.n_layers)
            .map(|i| EquivariantConv::new(config.layer_config(), vb.pp(format!("gcl_{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let embedding_out = linear(config.hidden_dim, config.out_node_dim, vb.pp("embedding_out"))?;

        log::debug!(
            "built egnn: {} -> {} x{} -> {}, agg {}",
            config.in_node_dim,
            config.hidden_dim,
            config.n_layers,
            config.out_node_dim,
            config.coords_agg
        );
        Ok(Self {
            embedding_in,
            layers,
            embedding_out,
            config,
        })
    }

    /// Build on the configured device with a fresh F32 parameter store.
    pub fn build(config: EgnnConfig) -> Result<(Self, VarMap)> {
        let device = config.device.device()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = Self::new(config, vb)?;
        Ok((model, varmap))
    }

    pub fn config(&self) -> &EgnnConfig {
        &self.config
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Returns `(features (N, out_node_dim), coords (N, 3))`.
    pub fn forward(
        &self,
        h: &Tensor,
        coords: &Tensor,
        edges: &EdgeIndex,
        edge_attr: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)> {
        let (h, x) = self.run_layers(h, coords, edges, edge_attr, None)?;
        Ok((self.embedding_out.forward(&h)?, x))
    }

    /// Features at the requested [`Readout`].
    pub fn hidden_representation(
        &self,
        h: &Tensor,
        coords: &Tensor,
        edges: &EdgeIndex,
        edge_attr: Option<&Tensor>,
        readout: Readout,
    ) -> Result<Tensor> {
        match readout {
            Readout::Layer(k) if k < self.layers.len() => {
                let (h, _) = self.run_layers(h, coords, edges, edge_attr, Some(k))?;
                Ok(h)
            }
            _ => Ok(self.forward(h, coords, edges, edge_attr)?.0),
        }
    }

    /// Run the embedding and layers `0..=stop` (all when `None`).
    fn run_layers(
        &self,
        h: &Tensor,
        coords: &Tensor,
        edges: &EdgeIndex,
        edge_attr: Option<&Tensor>,
        stop: Option<usize>,
    ) -> Result<(Tensor, Tensor)> {
        let (_, width) = h.dims2().map_err(|_| Error::ShapeMismatch {
            what: "node features",
            detail: format!("expected (N, F), got {:?}", h.dims()),
        })?;
        if width != self.config.in_node_dim {
            return Err(Error::DimensionMismatch {
                what: "node features",
                expected: self.config.in_node_dim,
                got: width,
            });
        }
        let mut h = self.embedding_in.forward(h)?;
        let mut x = coords.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            let out = layer.forward(&h, edges, &x, edge_attr, None)?;
            h = out.features;
            x = out.coords;
            if stop == Some(i) {
                break;
            }
        }
        Ok((h, x))
    }
}
