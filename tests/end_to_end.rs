//! End-to-end checks across the workspace crates.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use eqgraph::nn::initialize_weights;
use eqgraph::{
    radius_graph, DensityModel, EdgeIndex, Egnn, EgnnConfig, GaussianMixture, GmmConfig, GraphBatch, Readout,
    Trainer, TrainingConfig,
};
use nalgebra::DMatrix;

fn square_network(seed: u64) -> Egnn {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = Egnn::new(EgnnConfig::new(3, 16, 4).with_layers(2), vb).unwrap();
    initialize_weights(&varmap, seed).unwrap();
    model
}

fn square_inputs() -> (Tensor, Tensor, EdgeIndex) {
    let device = Device::Cpu;
    let h = Tensor::from_vec(
        vec![1.0f32, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0],
        (4, 3),
        &device,
    )
    .unwrap();
    let x = Tensor::from_vec(
        vec![0.0f32, 0.0, 0.0, 1.0, 0.0, 0.2, 1.0, 1.0, -0.1, 0.0, 1.0, 0.3],
        (4, 3),
        &device,
    )
    .unwrap();
    let edges = EdgeIndex::from_pairs(&[(0, 1), (1, 2), (2, 3), (3, 0)], &device).unwrap();
    (h, x, edges)
}

/// 90 degrees about z: (x, y, z) -> (-y, x, z).
fn rotate_z(x: &Tensor) -> Tensor {
    let rows = x.to_vec2::<f32>().unwrap();
    let flat: Vec<f32> = rows.iter().flat_map(|r| [-r[1], r[0], r[2]]).collect();
    Tensor::from_vec(flat, (rows.len(), 3), x.device()).unwrap()
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
    let a = a.flatten_all().unwrap().to_vec1::<f32>().unwrap();
    let b = b.flatten_all().unwrap().to_vec1::<f32>().unwrap();
    a.iter().zip(&b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
}

#[test]
fn seeded_square_is_deterministic_and_equivariant() {
    let (h, x, edges) = square_inputs();

    let (h1, x1) = square_network(9).forward(&h, &x, &edges, None).unwrap();
    let (h2, x2) = square_network(9).forward(&h, &x, &edges, None).unwrap();
    assert_eq!(h1.dims(), &[4, 4]);
    assert_eq!(x1.dims(), &[4, 3]);
    assert_eq!(max_abs_diff(&h1, &h2), 0.0);
    assert_eq!(max_abs_diff(&x1, &x2), 0.0);

    let (h_rot, x_rot) = square_network(9).forward(&h, &rotate_z(&x), &edges, None).unwrap();
    assert!(max_abs_diff(&h1, &h_rot) < 1e-5);
    assert!(max_abs_diff(&rotate_z(&x1), &x_rot) < 1e-5);
}

#[test]
fn readout_fallback_matches_forward() {
    let (h, x, edges) = square_inputs();
    let model = square_network(2);
    let (out, _) = model.forward(&h, &x, &edges, None).unwrap();

    for readout in [Readout::Output, Readout::Layer(2), Readout::Layer(7)] {
        let got = model.hidden_representation(&h, &x, &edges, None, readout).unwrap();
        assert_eq!(max_abs_diff(&out, &got), 0.0);
    }
    let first = model.hidden_representation(&h, &x, &edges, None, Readout::Layer(0)).unwrap();
    assert_eq!(first.dims(), &[4, 16]);
}

#[test]
fn radius_graph_drops_coincident_pair() {
    let coords = Tensor::from_vec(vec![0.0f32, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0], (3, 3), &Device::Cpu).unwrap();
    let (edges, dist) = radius_graph(&coords, 2.0).unwrap();
    assert_eq!(edges.pairs().unwrap(), vec![(0, 2), (1, 2), (2, 0), (2, 1)]);
    assert_eq!(dist.dims(), &[4, 1]);
}

#[test]
fn mixture_ranks_far_sample_as_less_reliable() {
    let data = DMatrix::from_fn(60, 2, |i, j| ((i * 7 + j * 3) % 11) as f64 * 0.05);
    let mut gmm = GaussianMixture::new(GmmConfig::new(2));
    gmm.fit(&data).unwrap();

    let near = -gmm.score(&DMatrix::from_row_slice(1, 2, &[0.25, 0.25])).unwrap();
    let far = -gmm.score(&DMatrix::from_row_slice(1, 2, &[10.0, -10.0])).unwrap();
    assert!(far > near);
}

#[test]
fn trainer_scores_after_fit() {
    let device = Device::Cpu;
    let make = |offset: f32| {
        let coords = Tensor::from_vec(
            vec![0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.5, 0.8, 0.0, 0.5, 0.3, 0.8],
            (4, 3),
            &device,
        )
        .unwrap();
        let features = (Tensor::ones((4, 3), DType::F32, &device).unwrap() * offset as f64).unwrap();
        let targets = Tensor::zeros((4, 4), DType::F32, &device).unwrap();
        GraphBatch::from_point_cloud(features, coords, 1.5)
            .unwrap()
            .with_targets(targets)
    };

    let config = EgnnConfig::new(3, 16, 4).with_layers(2).with_edge_attr_dim(1);
    let (model, varmap) = Egnn::build(config).unwrap();
    initialize_weights(&varmap, 5).unwrap();
    let training = TrainingConfig::default()
        .with_epochs(4)
        .with_density_every(2)
        .with_readout(Readout::Layer(1))
        .with_mixture(GmmConfig::new(1));
    let mut trainer = Trainer::new(model, varmap, training).unwrap();

    assert!(trainer.reliability(&make(1.0)).is_err());
    let data = vec![make(1.0), make(1.1), make(0.9)];
    let report = trainer.train(&data).unwrap();
    assert_eq!(report.density_fits, vec![2, 4]);

    let nll = trainer.reliability(&make(1.0)).unwrap();
    assert!(nll.is_finite());
}
