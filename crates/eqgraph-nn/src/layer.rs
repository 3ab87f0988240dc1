//! E(n)-equivariant graph convolution.
//!
//! [`EquivariantConv`] updates node features `h` and coordinates `x` jointly
//! (Satorras et al., 2021). Coordinates enter the learned models only through
//! squared edge lengths, and coordinate updates are scalar multiples of edge
//! difference vectors, so for any orthogonal `Q` and translation `t`:
//!
//! ```text
//! conv(h, xQ + t) = (h', x'Q + t)    where (h', x') = conv(h, x)
//! ```
//!
//! # Message Passing
//!
//! For each edge `(i, j)` (aggregated onto `i`):
//!
//! ```text
//! m_ij  = φ_e(h_i, h_j, ||x_i - x_j||², a_ij)          edge model
//! m_ij  = m_ij · σ(φ_att(m_ij))                        optional attention
//! x_i'  = x_i + AGG_j (x_i - x_j) · φ_x(m_ij)          coordinate model
//! h_i'  = φ_h(h_i, Σ_j m_ij, n_i)  (+ h_i)             node model
//! ```
//!
//! `AGG` is sum or mean ([`Aggregation`]); the feature aggregation is always
//! a sum. With `normalize`, `x_i - x_j` is replaced by the unit direction
//! (see [`crate::radial`]).
//!
//! # Reference
//!
//! Satorras, Hoogeboom & Welling, "E(n) Equivariant Graph Neural Networks",
//! ICML 2021.

use candle_core::Tensor;
use candle_nn::{linear, Init, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::error::{Error, Result};
use crate::graph::EdgeIndex;
use crate::radial::coord_to_radial;
use crate::segment::{segment_sum, Aggregation};

/// Gain of the Xavier-uniform init on the last coordinate-model projection.
///
/// Keeps initial coordinate steps close to zero.
const COORD_OUT_GAIN: f64 = 0.001;

/// Configuration of a single [`EquivariantConv`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquivariantConvConfig {
    /// Input node feature width.
    pub input_dim: usize,
    /// Output node feature width.
    pub output_dim: usize,
    /// Width of edge messages and MLP hidden layers.
    pub hidden_dim: usize,
    /// Width of per-edge attributes (0 = none).
    pub edge_attr_dim: usize,
    /// Width of extra per-node attributes fed to the node model (0 = none).
    pub node_attr_dim: usize,
    pub activation: Activation,
    /// Add input features to the node-model output. Needs `input_dim == output_dim`.
    pub residual: bool,
    /// Gate each message with a learned sigmoid scalar.
    pub attention: bool,
    /// Use unit direction vectors for coordinate updates.
    pub normalize: bool,
    /// How coordinate updates are combined per node.
    pub coords_agg: Aggregation,
    /// Squash the per-edge coordinate scale through `tanh` (bounded step).
    pub tanh: bool,
}

impl Default for EquivariantConvConfig {
    fn default() -> Self {
        Self {
            input_dim: 64,
            output_dim: 64,
            hidden_dim: 64,
            edge_attr_dim: 0,
            node_attr_dim: 0,
            activation: Activation::Silu,
            residual: true,
            attention: false,
            normalize: true,
            coords_agg: Aggregation::Mean,
            tanh: true,
        }
    }
}

impl EquivariantConvConfig {
    /// Config with the given widths and default switches.
    pub fn new(input_dim: usize, output_dim: usize, hidden_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            hidden_dim,
            ..Default::default()
        }
    }

    pub fn with_edge_attr_dim(mut self, dim: usize) -> Self {
        self.edge_attr_dim = dim;
        self
    }

    pub fn with_node_attr_dim(mut self, dim: usize) -> Self {
        self.node_attr_dim = dim;
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

    pub fn with_coords_agg(mut self, coords_agg: Aggregation) -> Self {
        self.coords_agg = coords_agg;
        self
    }

    pub fn with_tanh(mut self, tanh: bool) -> Self {
        self.tanh = tanh;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.input_dim == 0 || self.output_dim == 0 || self.hidden_dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "layer widths must be positive (input {}, output {}, hidden {})",
                self.input_dim, self.output_dim, self.hidden_dim
            )));
        }
        if self.residual && self.input_dim != self.output_dim {
            return Err(Error::InvalidConfig(format!(
                "residual layer needs input_dim == output_dim, got {} and {}",
                self.input_dim, self.output_dim
            )));
        }
        Ok(())
    }
}

/// Result of one convolution.
#[derive(Debug, Clone)]
pub struct ConvOutput<'a> {
    /// Updated node features (N x output_dim), invariant.
    pub features: Tensor,
    /// Updated coordinates (N x 3), equivariant.
    pub coords: Tensor,
    /// Edge attributes, passed through untouched.
    pub edge_attr: Option<&'a Tensor>,
}

/// E(n)-equivariant graph convolutional layer.
pub struct EquivariantConv {
    edge_mlp: [Linear; 2],
    node_mlp: [Linear; 2],
    coord_hidden: Linear,
    coord_out: Linear,
    att_mlp: Option<Linear>,
    config: EquivariantConvConfig,
}

impl EquivariantConv {
    /// Create a new layer, registering its parameters under `vb`.
    ///
    /// # Parameter names
    ///
    /// `edge_mlp_{0,1}`, `node_mlp_{0,1}`, `coord_mlp_0`, `coord_mlp_out`
    /// (no bias) and, with attention, `att_mlp`.
    pub fn new(config: EquivariantConvConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let EquivariantConvConfig {
            input_dim: input,
            output_dim: output,
            hidden_dim: hidden,
            ..
        } = config;

        // [h_i, h_j, radial, a_ij]
        let edge_in = 2 * input + 1 + config.edge_attr_dim;
        let edge_mlp = [
            linear(edge_in, hidden, vb.pp("edge_mlp_0"))?,
            linear(hidden, hidden, vb.pp("edge_mlp_1"))?,
        ];

        // [h_i, Σ m_ij, n_i]
        let node_in = input + hidden + config.node_attr_dim;
        let node_mlp = [
            linear(node_in, hidden, vb.pp("node_mlp_0"))?,
            linear(hidden, output, vb.pp("node_mlp_1"))?,
        ];

        let coord_hidden = linear(hidden, hidden, vb.pp("coord_mlp_0"))?;
        let bound = COORD_OUT_GAIN * (6.0 / (hidden + 1) as f64).sqrt();
        let coord_weight = vb.pp("coord_mlp_out").get_with_hints(
            (1, hidden),
            "weight",
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;
        let coord_out = Linear::new(coord_weight, None);

        let att_mlp = if config.attention {
            Some(linear(hidden, 1, vb.pp("att_mlp"))?)
        } else {
            None
        };

        Ok(Self {
            edge_mlp,
            node_mlp,
            coord_hidden,
            coord_out,
            att_mlp,
            config,
        })
    }

    pub fn config(&self) -> &EquivariantConvConfig {
        &self.config
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `h`: Node features (N x input_dim)
    /// - `edges`: Edge list; indices must be `< N`
    /// - `coords`: Node coordinates (N x 3)
    /// - `edge_attr`: Edge attributes (E x edge_attr_dim), required iff `edge_attr_dim > 0`
    /// - `node_attr`: Node attributes (N x node_attr_dim), required iff `node_attr_dim > 0`
    pub fn forward<'a>(
        &self,
        h: &Tensor,
        edges: &EdgeIndex,
        coords: &Tensor,
        edge_attr: Option<&'a Tensor>,
        node_attr: Option<&Tensor>,
    ) -> Result<ConvOutput<'a>> {
        let n = self.check_inputs(h, edges, coords, edge_attr, node_attr)?;

        let (radial, direction) = coord_to_radial(coords, edges, self.config.normalize)?;
        let source = h.index_select(edges.row(), 0)?;
        let target = h.index_select(edges.col(), 0)?;

        let messages = self.edge_model(&source, &target, &radial, edge_attr)?;
        let coords = self.coord_model(coords, edges, &direction, &messages, n)?;
        let features = self.node_model(h, edges, &messages, node_attr)?;

        Ok(ConvOutput {
            features,
            coords,
            edge_attr,
        })
    }

    fn edge_model(
        &self,
        source: &Tensor,
        target: &Tensor,
        radial: &Tensor,
        edge_attr: Option<&Tensor>,
    ) -> Result<Tensor> {
        let input = match edge_attr {
            Some(a) => Tensor::cat(&[source, target, radial, a], 1)?,
            None => Tensor::cat(&[source, target, radial], 1)?,
        };
        let act = self.config.activation;
        let m = act.apply(&self.edge_mlp[0].forward(&input)?)?;
        let m = act.apply(&self.edge_mlp[1].forward(&m)?)?;

        match &self.att_mlp {
            Some(att) => {
                let gate = candle_nn::ops::sigmoid(&att.forward(&m)?)?;
                Ok(m.broadcast_mul(&gate)?)
            }
            None => Ok(m),
        }
    }

    fn coord_model(
        &self,
        coords: &Tensor,
        edges: &EdgeIndex,
        direction: &Tensor,
        messages: &Tensor,
        n: usize,
    ) -> Result<Tensor> {
        let s = self.config.activation.apply(&self.coord_hidden.forward(messages)?)?;
        let mut scale = self.coord_out.forward(&s)?;
        if self.config.tanh {
            scale = scale.tanh()?;
        }
        let trans = direction.broadcast_mul(&scale)?;
        let agg = self.config.coords_agg.aggregate(&trans, edges.row(), n)?;
        Ok((coords + agg)?)
    }

    fn node_model(
        &self,
        h: &Tensor,
        edges: &EdgeIndex,
        messages: &Tensor,
        node_attr: Option<&Tensor>,
    ) -> Result<Tensor> {
        let agg = segment_sum(messages, edges.row(), h.dim(0)?)?;
        let input = match node_attr {
            Some(a) => Tensor::cat(&[h, &agg, a], 1)?,
            None => Tensor::cat(&[h, &agg], 1)?,
        };
        let out = self.config.activation.apply(&self.node_mlp[0].forward(&input)?)?;
        let out = self.node_mlp[1].forward(&out)?;
        if self.config.residual {
            Ok((h + out)?)
        } else {
            Ok(out)
        }
    }

    /// Shape checks; returns the node count.
    fn check_inputs(
        &self,
        h: &Tensor,
        edges: &EdgeIndex,
        coords: &Tensor,
        edge_attr: Option<&Tensor>,
        node_attr: Option<&Tensor>,
    ) -> Result<usize> {
        let (n, width) = h.dims2().map_err(|_| Error::ShapeMismatch {
            what: "node features",
            detail: format!("expected (N, F), got {:?}", h.dims()),
        })?;
        expect_width("node features", self.config.input_dim, width)?;

        let coord_rows = coords.dim(0)?;
        if coord_rows != n {
            return Err(Error::DimensionMismatch {
                what: "coordinate rows",
                expected: n,
                got: coord_rows,
            });
        }
        edges.check_nodes(n)?;

        check_optional("edge attributes", edge_attr, edges.len(), self.config.edge_attr_dim)?;
        check_optional("node attributes", node_attr, n, self.config.node_attr_dim)?;
        Ok(n)
    }
}

fn expect_width(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { what, expected, got })
    }
}

/// An optional attribute matrix must be present exactly when `width > 0`
/// and then be shaped `(rows, width)`.
fn check_optional(what: &'static str, attr: Option<&Tensor>, rows: usize, width: usize) -> Result<()> {
    match (attr, width) {
        (None, 0) => Ok(()),
        (None, _) => Err(Error::ShapeMismatch {
            what,
            detail: format!("layer expects width {width} but none were given"),
        }),
        (Some(a), 0) => Err(Error::ShapeMismatch {
            what,
            detail: format!("layer takes none but got {:?}", a.dims()),
        }),
        (Some(a), _) => {
            let (r, w) = a.dims2().map_err(|_| Error::ShapeMismatch {
                what,
                detail: format!("expected ({rows}, {width}), got {:?}", a.dims()),
            })?;
            expect_width(what, rows, r)?;
            expect_width(what, width, w)
        }
    }
}
