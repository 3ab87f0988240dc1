//! Supervised training with periodic latent-density fits.
//!
//! ```text
//! for epoch in 1..=epochs:
//!     for batch in source:  loss = mse(egnn(batch), targets); step
//!     if epoch % density_every == 0:
//!         Z = stack(hidden_representation(batch) for batch in source)
//!         density.fit(Z)
//! ```
//!
//! Once a density is fitted, [`Trainer::reliability`] scores a batch by the
//! mean negative log-likelihood of its latent rows. Higher means further from
//! the training distribution.

use candle_core::DType;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use eqgraph_density::{DensityModel, GaussianMixture, GmmConfig};
use eqgraph_nn::{Egnn, Readout};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::batch::{GraphBatch, GraphSource};
use crate::error::{Error, Result};

/// Training loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of passes over the source (default: 100).
    pub epochs: usize,
    /// Refit the density every this many epochs (default: 20).
    pub density_every: usize,
    /// AdamW learning rate (default: 1e-3).
    pub learning_rate: f64,
    /// AdamW decoupled weight decay (default: 0).
    pub weight_decay: f64,
    /// Which representation the density sees (default: final output).
    pub readout: Readout,
    pub mixture: GmmConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            density_every: 20,
            learning_rate: 1e-3,
            weight_decay: 0.0,
            readout: Readout::Output,
            mixture: GmmConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_density_every(mut self, density_every: usize) -> Self {
        self.density_every = density_every;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn with_readout(mut self, readout: Readout) -> Self {
        self.readout = readout;
        self
    }

    pub fn with_mixture(mut self, mixture: GmmConfig) -> Self {
        self.mixture = mixture;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be positive".into()));
        }
        if self.density_every == 0 {
            return Err(Error::InvalidConfig("density_every must be positive".into()));
        }
        Ok(())
    }
}

/// Summary of a [`Trainer::train`] run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Mean batch loss per epoch.
    pub epoch_losses: Vec<f64>,
    /// Epochs (1-based) after which the density was refitted.
    pub density_fits: Vec<usize>,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f64> {
        self.epoch_losses.last().copied()
    }
}

/// Owns the network, its parameters, the optimizer and the density model.
pub struct Trainer<O = AdamW, D = GaussianMixture> {
    model: Egnn,
    varmap: VarMap,
    optimizer: O,
    density: D,
    config: TrainingConfig,
}

impl Trainer<AdamW, GaussianMixture> {
    /// AdamW over every variable in `varmap`, mixture from `config.mixture`.
    pub fn new(model: Egnn, varmap: VarMap, config: TrainingConfig) -> Result<Self> {
        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: config.weight_decay,
            ..Default::default()
        };
        let optimizer = AdamW::new(varmap.all_vars(), params)?;
        let density = GaussianMixture::new(config.mixture.clone());
        Self::with_parts(model, varmap, optimizer, density, config)
    }
}

impl<O: Optimizer, D: DensityModel> Trainer<O, D> {
    pub fn with_parts(model: Egnn, varmap: VarMap, optimizer: O, density: D, config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model,
            varmap,
            optimizer,
            density,
            config,
        })
    }

    pub fn model(&self) -> &Egnn {
        &self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn density(&self) -> &D {
        &self.density
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// One optimizer step on `batch`; returns the MSE loss before the step.
    pub fn train_step(&mut self, batch: &GraphBatch) -> Result<f64> {
        let targets = batch.targets.as_ref().ok_or(Error::MissingTargets)?;
        let (pred, _) = self
            .model
            .forward(&batch.features, &batch.coords, &batch.edges, batch.edge_attr.as_ref())?;
        if pred.dims() != targets.dims() {
            return Err(eqgraph_nn::Error::ShapeMismatch {
                what: "targets",
                detail: format!("expected {:?}, got {:?}", pred.dims(), targets.dims()),
            }
            .into());
        }
        let loss = candle_nn::loss::mse(&pred, &targets.to_dtype(pred.dtype())?)?;
        self.optimizer.backward_step(&loss)?;
        Ok(loss.to_dtype(DType::F64)?.to_scalar::<f64>()?)
    }

    /// Run the full schedule over `source`.
    pub fn train<S: GraphSource + ?Sized>(&mut self, source: &S) -> Result<TrainingReport> {
        let n = source.num_batches();
        if n == 0 {
            return Err(Error::EmptySource);
        }
        let mut report = TrainingReport::default();

        for epoch in 1..=self.config.epochs {
            let mut total = 0.0;
            for i in 0..n {
                total += self.train_step(&source.batch(i)?)?;
            }
            let mean = total / n as f64;
            report.epoch_losses.push(mean);
            log::debug!("epoch {epoch}: loss {mean:.6}");

            if epoch % self.config.density_every == 0 {
                let samples = self.fit_density(source)?;
                report.density_fits.push(epoch);
                log::info!("epoch {epoch}: density fitted on {samples} latent vectors");
            }
        }
        Ok(report)
    }

    /// Fit the density on the stacked latent rows of every batch in `source`.
    ///
    /// Returns the number of rows fitted.
    pub fn fit_density<S: GraphSource + ?Sized>(&mut self, source: &S) -> Result<usize> {
        let n = source.num_batches();
        if n == 0 {
            return Err(Error::EmptySource);
        }
        let mut rows = 0;
        let mut width = 0;
        let mut values = Vec::new();
        for i in 0..n {
            let (r, w, mut v) = self.latent_rows(&source.batch(i)?)?;
            rows += r;
            width = w;
            values.append(&mut v);
        }
        let stacked = DMatrix::from_row_slice(rows, width, &values);
        self.density.fit(&stacked)?;
        Ok(rows)
    }

    /// Latent representation of `batch` at the configured readout, one row per node.
    pub fn latent(&self, batch: &GraphBatch) -> Result<DMatrix<f64>> {
        let (rows, width, values) = self.latent_rows(batch)?;
        Ok(DMatrix::from_row_slice(rows, width, &values))
    }

    /// Mean negative log-likelihood of `batch` under the fitted density.
    pub fn reliability(&self, batch: &GraphBatch) -> Result<f64> {
        if !self.density.is_fitted() {
            return Err(Error::DensityNotFitted);
        }
        let nll = -self.density.score(&self.latent(batch)?)?;
        log::info!("negative log-likelihood (NLL): {nll:.4}");
        Ok(nll)
    }

    fn latent_rows(&self, batch: &GraphBatch) -> Result<(usize, usize, Vec<f64>)> {
        let hidden = self
            .model
            .hidden_representation(
                &batch.features,
                &batch.coords,
                &batch.edges,
                batch.edge_attr.as_ref(),
                self.config.readout,
            )?
            .detach();
        let (rows, width) = hidden.dims2()?;
        let values = hidden.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()?;
        Ok((rows, width, values))
    }
}
