//! Graph batches and the data-source seam.

use candle_core::Tensor;
use eqgraph_nn::{radius_graph, EdgeIndex};

use crate::error::{Error, Result};

/// One graph (or a disjoint union of graphs) ready for the network.
#[derive(Debug, Clone)]
pub struct GraphBatch {
    /// Node features (N, F).
    pub features: Tensor,
    /// Node coordinates (N, 3).
    pub coords: Tensor,
    pub edges: EdgeIndex,
    /// Edge attributes (E, D_e).
    pub edge_attr: Option<Tensor>,
    /// Per-node regression targets (N, out).
    pub targets: Option<Tensor>,
}

impl GraphBatch {
    pub fn new(features: Tensor, coords: Tensor, edges: EdgeIndex) -> Self {
        Self {
            features,
            coords,
            edges,
            edge_attr: None,
            targets: None,
        }
    }

    /// Connect every pair of points within `cutoff`; the distance becomes
    /// the single edge attribute.
    pub fn from_point_cloud(features: Tensor, coords: Tensor, cutoff: f64) -> Result<Self> {
        let (edges, distances) = radius_graph(&coords, cutoff)?;
        Ok(Self::new(features, coords, edges).with_edge_attr(distances))
    }

    pub fn with_edge_attr(mut self, edge_attr: Tensor) -> Self {
        self.edge_attr = Some(edge_attr);
        self
    }

    pub fn with_targets(mut self, targets: Tensor) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn num_nodes(&self) -> usize {
        self.features.dims().first().copied().unwrap_or(0)
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }
}

/// Provider of training batches.
pub trait GraphSource {
    fn num_batches(&self) -> usize;

    /// Batch `index`, for `index < num_batches()`.
    fn batch(&self, index: usize) -> Result<GraphBatch>;
}

impl GraphSource for [GraphBatch] {
    fn num_batches(&self) -> usize {
        self.len()
    }

    fn batch(&self, index: usize) -> Result<GraphBatch> {
        self.get(index).cloned().ok_or(Error::BatchOutOfRange {
            index,
            len: self.len(),
        })
    }
}

impl GraphSource for Vec<GraphBatch> {
    fn num_batches(&self) -> usize {
        self.len()
    }

    fn batch(&self, index: usize) -> Result<GraphBatch> {
        self.as_slice().batch(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_from_point_cloud_builds_distance_attributes() {
        let device = Device::Cpu;
        let coords = Tensor::from_vec(vec![0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 5.0, 0.0, 0.0], (3, 3), &device).unwrap();
        let features = Tensor::ones((3, 2), DType::F32, &device).unwrap();

        let batch = GraphBatch::from_point_cloud(features, coords, 1.5).unwrap();
        assert_eq!(batch.num_nodes(), 3);
        assert_eq!(batch.edges.pairs().unwrap(), vec![(0, 1), (1, 0)]);
        let attr = batch.edge_attr.unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(attr, vec![vec![1.0], vec![1.0]]);
    }

    #[test]
    fn test_vec_source() {
        let device = Device::Cpu;
        let edges = EdgeIndex::from_pairs(&[(0, 1)], &device).unwrap();
        let b = GraphBatch::new(
            Tensor::zeros((2, 1), DType::F32, &device).unwrap(),
            Tensor::zeros((2, 3), DType::F32, &device).unwrap(),
            edges,
        );
        let source = vec![b.clone(), b];
        assert_eq!(source.num_batches(), 2);
        assert_eq!(source.batch(1).unwrap().num_edges(), 1);
    }
}
