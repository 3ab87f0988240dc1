//! The trainer through its seams: a custom data source, a custom density
//! model and a non-default optimizer.

use std::cell::Cell;

use candle_core::{DType, Device, Tensor};
use candle_nn::{Optimizer, SGD};
use eqgraph_density::{DensityModel, Error as DensityError};
use eqgraph_nn::{initialize_weights, Egnn, EgnnConfig};
use eqgraph_train::{Error, GraphBatch, GraphSource, Trainer, TrainingConfig};
use nalgebra::{DMatrix, DVector};

/// Scores every row by its negative squared norm; remembers fit sizes.
#[derive(Default)]
struct NormDensity {
    fits: Vec<(usize, usize)>,
}

impl DensityModel for NormDensity {
    fn fit(&mut self, data: &DMatrix<f64>) -> eqgraph_density::Result<()> {
        self.fits.push(data.shape());
        Ok(())
    }

    fn score_samples(&self, data: &DMatrix<f64>) -> eqgraph_density::Result<DVector<f64>> {
        if self.fits.is_empty() {
            return Err(DensityError::NotFitted);
        }
        Ok(DVector::from_iterator(
            data.nrows(),
            data.row_iter().map(|r| -r.norm_squared()),
        ))
    }

    fn is_fitted(&self) -> bool {
        !self.fits.is_empty()
    }
}

/// Generates point clouds on demand and counts requests.
struct Generated {
    graphs: usize,
    requests: Cell<usize>,
}

impl GraphSource for Generated {
    fn num_batches(&self) -> usize {
        self.graphs
    }

    fn batch(&self, index: usize) -> eqgraph_train::Result<GraphBatch> {
        self.requests.set(self.requests.get() + 1);
        let device = Device::Cpu;
        let shift = index as f32 * 0.1;
        let coords = Tensor::from_vec(
            vec![0.0f32, 0.0, 0.0, 1.0 + shift, 0.0, 0.0, 0.0, 1.0, 0.0],
            (3, 3),
            &device,
        )?;
        let features = Tensor::ones((3, 2), DType::F32, &device)?;
        let targets = Tensor::zeros((3, 1), DType::F32, &device)?;
        Ok(GraphBatch::from_point_cloud(features, coords, 2.0)?.with_targets(targets))
    }
}

fn model() -> (Egnn, candle_nn::VarMap) {
    let config = EgnnConfig::new(2, 8, 1).with_layers(2).with_edge_attr_dim(1);
    let (model, varmap) = Egnn::build(config).unwrap();
    initialize_weights(&varmap, 11).unwrap();
    (model, varmap)
}

#[test]
fn custom_density_and_source() {
    let (model, varmap) = model();
    let sgd = SGD::new(varmap.all_vars(), 0.01).unwrap();
    let config = TrainingConfig::default().with_epochs(4).with_density_every(2);
    let mut trainer = Trainer::with_parts(model, varmap, sgd, NormDensity::default(), config).unwrap();

    let source = Generated {
        graphs: 3,
        requests: Cell::new(0),
    };
    let report = trainer.train(&source).unwrap();

    assert_eq!(report.density_fits, vec![2, 4]);
    // 3 graphs x 3 nodes, output width 1.
    assert_eq!(trainer.density().fits, vec![(9, 1), (9, 1)]);
    // 4 training epochs plus 2 density passes over 3 graphs.
    assert_eq!(source.requests.get(), 18);

    let batch = source.batch(0).unwrap();
    let latent = trainer.latent(&batch).unwrap();
    let expected = latent.row_iter().map(|r| r.norm_squared()).sum::<f64>() / 3.0;
    let nll = trainer.reliability(&batch).unwrap();
    assert!((nll - expected).abs() < 1e-9);
}

#[test]
fn reliability_needs_a_fit() {
    let (model, varmap) = model();
    let sgd = SGD::new(varmap.all_vars(), 0.01).unwrap();
    let trainer = Trainer::with_parts(model, varmap, sgd, NormDensity::default(), TrainingConfig::default()).unwrap();
    let source = Generated {
        graphs: 1,
        requests: Cell::new(0),
    };
    assert!(matches!(
        trainer.reliability(&source.batch(0).unwrap()),
        Err(Error::DensityNotFitted)
    ));
}

#[test]
fn out_of_range_batch() {
    let batches: Vec<GraphBatch> = Vec::new();
    assert!(matches!(batches.batch(0), Err(Error::BatchOutOfRange { index: 0, len: 0 })));
}
