//! Density models over latent feature vectors.
//!
//! A density model learns where training representations live and scores
//! new ones by log-likelihood. Low likelihood means a sample sits away from
//! anything seen during training, which is read as low reliability.
//!
//! ```rust,ignore
//! use eqgraph_density::{DensityModel, GaussianMixture, GmmConfig};
//!
//! let mut gmm = GaussianMixture::new(GmmConfig::new(3));
//! gmm.fit(&train)?;                       // (n, d)
//! let log_lik = gmm.score_samples(&test)?; // (m,)
//! ```

pub mod error;
pub mod gmm;
mod kmeans;

use nalgebra::{DMatrix, DVector};

pub use error::{Error, Result};
pub use gmm::{Component, CovarianceType, GaussianMixture, GmmConfig};

/// A probability density fitted on rows of a matrix.
pub trait DensityModel {
    /// Fit on `data` (one sample per row), replacing any previous fit.
    fn fit(&mut self, data: &DMatrix<f64>) -> Result<()>;

    /// Per-row log-likelihood. Fails with [`Error::NotFitted`] before `fit`.
    fn score_samples(&self, data: &DMatrix<f64>) -> Result<DVector<f64>>;

    fn is_fitted(&self) -> bool;

    /// Mean log-likelihood over the rows of `data`.
    ///
    /// Fails with [`Error::EmptyInput`] when `data` has no rows.
    fn score(&self, data: &DMatrix<f64>) -> Result<f64> {
        let scores = self.score_samples(data)?;
        if scores.is_empty() {
            return Err(Error::EmptyInput);
        }
        Ok(scores.mean())
    }
}
