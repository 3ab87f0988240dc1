//! Synthetic point clouds for the `train` command.
//!
//! Each graph is a Gaussian blob of atoms with random element labels. The
//! regression target of a node is its neighbor count inside the cutoff,
//! divided by the graph size, which is invariant to rigid motions. Coincident
//! points are not neighbors, matching [`eqgraph_nn::radius_graph`].

use anyhow::Result;
use candle_core::{Device, Tensor};
use eqgraph_train::GraphBatch;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::xyz::FEATURE_DIM;

/// Spread of in-distribution coordinates.
const COORD_STD: f64 = 1.0;

/// Width of the per-node regression target.
pub const TARGET_DIM: usize = 1;

/// Coordinate stretch applied to the out-of-distribution sample.
const OOD_STRETCH: f64 = 4.0;

pub struct SyntheticSet {
    rng: ChaCha8Rng,
    nodes: usize,
    cutoff: f64,
    device: Device,
}

impl SyntheticSet {
    pub fn new(seed: u64, nodes: usize, cutoff: f64, device: Device) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            nodes,
            cutoff,
            device,
        }
    }

    /// Draw `count` in-distribution graphs.
    pub fn graphs(&mut self, count: usize) -> Result<Vec<GraphBatch>> {
        (0..count).map(|_| self.graph(1.0, false)).collect()
    }

    /// One more in-distribution graph.
    pub fn in_distribution(&mut self) -> Result<GraphBatch> {
        self.graph(1.0, false)
    }

    /// A stretched graph made of unknown elements only.
    pub fn out_of_distribution(&mut self) -> Result<GraphBatch> {
        self.graph(OOD_STRETCH, true)
    }

    fn graph(&mut self, stretch: f64, unknown_elements: bool) -> Result<GraphBatch> {
        let n = self.nodes;
        let normal = Normal::new(0.0, COORD_STD * stretch)?;
        // Rounded through f32 so targets see the same points as the network.
        let points: Vec<[f64; 3]> = (0..n)
            .map(|_| [0; 3].map(|_| normal.sample(&mut self.rng) as f32 as f64))
            .collect();

        let mut features = vec![0f32; n * FEATURE_DIM];
        for i in 0..n {
            let channel = if unknown_elements {
                FEATURE_DIM - 1
            } else {
                self.rng.random_range(0..FEATURE_DIM - 1)
            };
            features[i * FEATURE_DIM + channel] = 1.0;
        }

        let targets = degree_targets(&points, self.cutoff);

        let coords: Vec<f32> = points.iter().flatten().map(|&v| v as f32).collect();
        let features = Tensor::from_vec(features, (n, FEATURE_DIM), &self.device)?;
        let coords = Tensor::from_vec(coords, (n, 3), &self.device)?;
        let targets = Tensor::from_vec(targets, (n, TARGET_DIM), &self.device)?;
        Ok(GraphBatch::from_point_cloud(features, coords, self.cutoff)?.with_targets(targets))
    }
}

/// Per-node count of distinct, non-coincident neighbors within `cutoff`, over `n`.
fn degree_targets(points: &[[f64; 3]], cutoff: f64) -> Vec<f32> {
    let n = points.len();
    points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let degree = points
                .iter()
                .enumerate()
                .filter(|&(j, q)| {
                    let d = distance(p, q);
                    j != i && d > 0.0 && d <= cutoff
                })
                .count();
            degree as f32 / n as f32
        })
        .collect()
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}
