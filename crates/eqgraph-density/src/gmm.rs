//! Gaussian mixture model fitted by expectation-maximization.
//!
//! # Model
//!
//! ```text
//! p(x) = Σ_k π_k N(x | μ_k, Σ_k)
//! ```
//!
//! Fitting starts from a k-means++ / Lloyd hard assignment, then alternates
//! the E-step (responsibilities, normalized with log-sum-exp) and the M-step
//! (weights, means, covariances + `reg_covar · I`) until the mean
//! log-likelihood improves by less than `tol`.
//!
//! Log-densities go through the Cholesky factor `Σ_k = L Lᵀ`:
//!
//! ```text
//! log N(x) = -½ (d log 2π + 2 Σ_i log L_ii + ||L⁻¹ (x - μ)||²)
//! ```

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use nalgebra::{Cholesky, DMatrix, DVector};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kmeans::kmeans;
use crate::DensityModel;

/// Keeps empty components from dividing by zero.
const MIN_COMPONENT_MASS: f64 = 10.0 * f64::EPSILON;

/// Lloyd iterations for the initial assignment.
const KMEANS_MAX_ITER: usize = 100;

/// Covariance structure of each component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovarianceType {
    /// Dense `d x d` covariance per component.
    #[default]
    Full,
    /// Axis-aligned variances only.
    Diagonal,
}

impl fmt::Display for CovarianceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CovarianceType::Full => f.write_str("full"),
            CovarianceType::Diagonal => f.write_str("diagonal"),
        }
    }
}

impl FromStr for CovarianceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(CovarianceType::Full),
            "diag" | "diagonal" => Ok(CovarianceType::Diagonal),
            other => Err(Error::InvalidConfig(format!(
                "unknown covariance type `{other}` (expected full or diagonal)"
            ))),
        }
    }
}

/// Mixture configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GmmConfig {
    pub n_components: usize,
    pub covariance: CovarianceType,
    pub max_iter: usize,
    /// Convergence threshold on the change of the mean log-likelihood.
    pub tol: f64,
    /// Added to every covariance diagonal.
    pub reg_covar: f64,
    /// Seed for the k-means++ initialization.
    pub seed: u64,
}

impl Default for GmmConfig {
    fn default() -> Self {
        Self {
            n_components: 3,
            covariance: CovarianceType::Full,
            max_iter: 100,
            tol: 1e-3,
            reg_covar: 1e-6,
            seed: 0,
        }
    }
}

impl GmmConfig {
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            ..Default::default()
        }
    }

    pub fn with_covariance(mut self, covariance: CovarianceType) -> Self {
        self.covariance = covariance;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_reg_covar(mut self, reg_covar: f64) -> Self {
        self.reg_covar = reg_covar;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_components == 0 {
            return Err(Error::InvalidConfig("n_components must be positive".into()));
        }
        if self.max_iter == 0 {
            return Err(Error::InvalidConfig("max_iter must be positive".into()));
        }
        if !(self.tol >= 0.0) || !(self.reg_covar >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "tol and reg_covar must be non-negative (tol {}, reg_covar {})",
                self.tol, self.reg_covar
            )));
        }
        Ok(())
    }
}

/// Parameters of one component.
#[derive(Debug, Clone)]
pub struct Component {
    pub weight: f64,
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
    /// Lower Cholesky factor of `covariance`.
    chol: DMatrix<f64>,
    /// `Σ_i log L_ii`, half the log-determinant.
    half_log_det: f64,
}

impl Component {
    fn new(weight: f64, mean: DVector<f64>, covariance: DMatrix<f64>, index: usize) -> Result<Self> {
        let chol = Cholesky::new(covariance.clone())
            .ok_or(Error::IllConditioned { component: index })?
            .l();
        let half_log_det: f64 = chol.diagonal().iter().map(|v| v.ln()).sum();
        Ok(Self {
            weight,
            mean,
            covariance,
            chol,
            half_log_det,
        })
    }

    fn log_pdf(&self, x: &DVector<f64>) -> f64 {
        let d = x.len() as f64;
        let centered = x - &self.mean;
        let maha = self
            .chol
            .solve_lower_triangular(&centered)
            .map(|z| z.norm_squared())
            .unwrap_or(f64::INFINITY);
        -0.5 * (d * (2.0 * PI).ln() + maha) - self.half_log_det
    }
}

/// Fitted state.
#[derive(Debug, Clone)]
struct Fitted {
    components: Vec<Component>,
    dim: usize,
    converged: bool,
    n_iter: usize,
    lower_bound: f64,
}

/// Gaussian mixture density model.
#[derive(Debug, Clone, Default)]
pub struct GaussianMixture {
    config: GmmConfig,
    fitted: Option<Fitted>,
}

impl GaussianMixture {
    pub fn new(config: GmmConfig) -> Self {
        Self { config, fitted: None }
    }

    pub fn config(&self) -> &GmmConfig {
        &self.config
    }

    /// Fitted components; empty before `fit`.
    pub fn components(&self) -> &[Component] {
        match &self.fitted {
            Some(f) => &f.components,
            None => &[],
        }
    }

    /// Whether the last fit met `tol` within `max_iter` iterations.
    pub fn converged(&self) -> bool {
        self.fitted.as_ref().is_some_and(|f| f.converged)
    }

    /// EM iterations run by the last fit.
    pub fn n_iter(&self) -> usize {
        self.fitted.as_ref().map_or(0, |f| f.n_iter)
    }

    /// Mean log-likelihood of the training data at the last iteration.
    pub fn lower_bound(&self) -> Option<f64> {
        self.fitted.as_ref().map(|f| f.lower_bound)
    }

    /// Posterior component probabilities, one row per sample.
    pub fn predict_proba(&self, data: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let fitted = self.fitted.as_ref().ok_or(Error::NotFitted)?;
        check_data(data, Some(fitted.dim))?;
        let (resp, _) = e_step(data, &fitted.components);
        Ok(resp)
    }

    fn m_step(&self, data: &DMatrix<f64>, resp: &DMatrix<f64>) -> Result<Vec<Component>> {
        let (n, d) = data.shape();
        (0..resp.ncols())
            .map(|k| {
                let r = resp.column(k);
                let mass = r.sum() + MIN_COMPONENT_MASS;
                let mean: DVector<f64> = data.tr_mul(&r) / mass;

                let mut cov = DMatrix::zeros(d, d);
                for i in 0..n {
                    let centered = data.row(i).transpose() - &mean;
                    match self.config.covariance {
                        CovarianceType::Full => cov.ger(r[i], &centered, &centered, 1.0),
                        CovarianceType::Diagonal => {
                            for j in 0..d {
                                cov[(j, j)] += r[i] * centered[j] * centered[j];
                            }
                        }
                    }
                }
                cov /= mass;
                for j in 0..d {
                    cov[(j, j)] += self.config.reg_covar;
                }
                Component::new(mass / n as f64, mean, cov, k)
            })
            .collect()
    }
}

impl DensityModel for GaussianMixture {
    fn fit(&mut self, data: &DMatrix<f64>) -> Result<()> {
        self.config.validate()?;
        check_data(data, None)?;
        let (n, d) = data.shape();
        let k = self.config.n_components;
        if n < k {
            return Err(Error::InsufficientSamples {
                samples: n,
                components: k,
            });
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let labels = kmeans(data, k, KMEANS_MAX_ITER, &mut rng);
        let mut resp = DMatrix::zeros(n, k);
        for (i, &label) in labels.iter().enumerate() {
            resp[(i, label)] = 1.0;
        }
        let mut components = self.m_step(data, &resp)?;

        let mut lower_bound = f64::NEG_INFINITY;
        let mut converged = false;
        let mut n_iter = 0;
        for iter in 1..=self.config.max_iter {
            n_iter = iter;
            let prev = lower_bound;
            let (r, log_norm) = e_step(data, &components);
            lower_bound = log_norm.mean();
            components = self.m_step(data, &r)?;
            if (lower_bound - prev).abs() < self.config.tol {
                converged = true;
                break;
            }
        }
        if !converged {
            log::warn!(
                "gaussian mixture did not converge in {} iterations (lower bound {:.4})",
                self.config.max_iter,
                lower_bound
            );
        }
        log::debug!(
            "fitted {} {} components on {}x{} samples in {} iterations",
            k,
            self.config.covariance,
            n,
            d,
            n_iter
        );

        self.fitted = Some(Fitted {
            components,
            dim: d,
            converged,
            n_iter,
            lower_bound,
        });
        Ok(())
    }

    fn score_samples(&self, data: &DMatrix<f64>) -> Result<DVector<f64>> {
        let fitted = self.fitted.as_ref().ok_or(Error::NotFitted)?;
        check_data(data, Some(fitted.dim))?;
        Ok(e_step(data, &fitted.components).1)
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }
}

/// Responsibilities `(n, k)` and per-sample log-likelihood `(n,)`.
fn e_step(data: &DMatrix<f64>, components: &[Component]) -> (DMatrix<f64>, DVector<f64>) {
    let n = data.nrows();
    let mut weighted = DMatrix::from_fn(n, components.len(), |i, k| {
        let c = &components[k];
        c.weight.ln() + c.log_pdf(&data.row(i).transpose())
    });
    let log_norm = DVector::from_fn(n, |i, _| {
        let row: Vec<f64> = weighted.row(i).iter().copied().collect();
        log_sum_exp(&row)
    });
    for (i, mut row) in weighted.row_iter_mut().enumerate() {
        row.iter_mut().for_each(|v| *v = (*v - log_norm[i]).exp());
    }
    (weighted, log_norm)
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

fn check_data(data: &DMatrix<f64>, dim: Option<usize>) -> Result<()> {
    if let Some(expected) = dim {
        if data.ncols() != expected {
            return Err(Error::DimensionMismatch {
                expected,
                got: data.ncols(),
            });
        }
    } else if data.ncols() == 0 {
        return Err(Error::InvalidConfig("samples have no features".into()));
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err(Error::NonFinite);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::{Distribution, Normal};

    fn blob(n: usize, center: &[f64], std: f64, seed: u64) -> DMatrix<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, std).unwrap();
        DMatrix::from_fn(n, center.len(), |_, j| center[j] + normal.sample(&mut rng))
    }

    #[test]
    fn test_far_sample_scores_lower() {
        let mut gmm = GaussianMixture::new(GmmConfig::new(2));
        gmm.fit(&blob(200, &[0.0, 0.0, 0.0], 0.5, 1)).unwrap();

        let near = DMatrix::from_row_slice(1, 3, &[0.1, -0.1, 0.0]);
        let far = DMatrix::from_row_slice(1, 3, &[8.0, 8.0, 8.0]);
        let near = gmm.score_samples(&near).unwrap()[0];
        let far = gmm.score_samples(&far).unwrap()[0];
        assert!(-far > -near, "far NLL {} should exceed near NLL {}", -far, -near);
    }

    #[test]
    fn test_recovers_two_clusters() {
        let first = blob(100, &[0.0, 0.0], 0.3, 2);
        let second = blob(100, &[6.0, -6.0], 0.3, 3);
        let data = DMatrix::from_fn(200, 2, |i, j| if i < 100 { first[(i, j)] } else { second[(i - 100, j)] });

        let mut gmm = GaussianMixture::new(GmmConfig::new(2).with_seed(7));
        gmm.fit(&data).unwrap();
        assert!(gmm.converged());

        let mut means: Vec<f64> = gmm.components().iter().map(|c| c.mean[0]).collect();
        means.sort_by(f64::total_cmp);
        assert!(means[0].abs() < 0.3);
        assert!((means[1] - 6.0).abs() < 0.3);

        let total: f64 = gmm.components().iter().map(|c| c.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_responsibilities_sum_to_one() {
        let data = blob(50, &[1.0, 2.0], 1.0, 4);
        let mut gmm = GaussianMixture::new(GmmConfig::new(3).with_covariance(CovarianceType::Diagonal));
        gmm.fit(&data).unwrap();
        let proba = gmm.predict_proba(&data).unwrap();
        for row in proba.row_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_diagonal_covariance_is_diagonal() {
        let data = blob(80, &[0.0, 0.0, 0.0], 1.0, 5);
        let mut gmm = GaussianMixture::new(GmmConfig::new(1).with_covariance(CovarianceType::Diagonal));
        gmm.fit(&data).unwrap();
        let cov = &gmm.components()[0].covariance;
        assert_eq!(cov[(0, 1)], 0.0);
        assert_eq!(cov[(2, 0)], 0.0);
        assert!(cov[(1, 1)] > 0.5);
    }

    #[test]
    fn test_score_before_fit() {
        let gmm = GaussianMixture::default();
        let data = DMatrix::zeros(2, 2);
        assert!(matches!(gmm.score_samples(&data), Err(Error::NotFitted)));
        assert!(matches!(gmm.score(&data), Err(Error::NotFitted)));
        assert!(!gmm.is_fitted());
    }

    #[test]
    fn test_score_empty_batch() {
        let mut gmm = GaussianMixture::new(GmmConfig::new(1));
        gmm.fit(&blob(20, &[0.0, 0.0], 1.0, 3)).unwrap();

        let empty = DMatrix::<f64>::zeros(0, 2);
        assert_eq!(gmm.score_samples(&empty).unwrap().len(), 0);
        assert!(matches!(gmm.score(&empty), Err(Error::EmptyInput)));
    }

    #[test]
    fn test_too_few_samples() {
        let mut gmm = GaussianMixture::new(GmmConfig::new(5));
        let err = gmm.fit(&DMatrix::zeros(3, 2)).unwrap_err();
        assert!(matches!(err, Error::InsufficientSamples { samples: 3, components: 5 }));
    }

    #[test]
    fn test_constant_data_is_regularized() {
        let mut gmm = GaussianMixture::new(GmmConfig::new(1));
        gmm.fit(&DMatrix::from_element(10, 4, 2.0)).unwrap();
        let score = gmm.score_samples(&DMatrix::from_element(1, 4, 2.0)).unwrap()[0];
        assert!(score.is_finite());
    }

    #[test]
    fn test_zero_regularization_on_constant_data_fails() {
        let mut gmm = GaussianMixture::new(GmmConfig::new(1).with_reg_covar(0.0));
        let err = gmm.fit(&DMatrix::from_element(10, 2, 1.0)).unwrap_err();
        assert!(matches!(err, Error::IllConditioned { component: 0 }));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut gmm = GaussianMixture::new(GmmConfig::new(1));
        gmm.fit(&blob(10, &[0.0, 0.0], 1.0, 6)).unwrap();
        assert!(matches!(
            gmm.score_samples(&DMatrix::zeros(1, 3)),
            Err(Error::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut gmm = GaussianMixture::new(GmmConfig::new(1));
        let mut data = blob(10, &[0.0], 1.0, 8);
        data[(3, 0)] = f64::NAN;
        assert!(matches!(gmm.fit(&data), Err(Error::NonFinite)));
    }

    #[test]
    fn test_config_json() {
        let cfg: GmmConfig = serde_json::from_str(r#"{"n_components": 4, "covariance": "diagonal"}"#).unwrap();
        assert_eq!(cfg.n_components, 4);
        assert_eq!(cfg.covariance, CovarianceType::Diagonal);
        assert_eq!(cfg.reg_covar, 1e-6);
        assert_eq!("diag".parse::<CovarianceType>().unwrap(), CovarianceType::Diagonal);
        assert!("spherical".parse::<CovarianceType>().is_err());
    }
}
