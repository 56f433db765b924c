//! Forecast model capability and the statically configured ensemble.
//!
//! A [`ForecastModel`] is fitted on a [`StationSeries`] and yields a
//! [`FittedModel`], which estimates raw daily values. Bias correction and
//! confidence scoring are applied the same way for every variant by
//! [`FittedModel::predict`]; only the per-variant constants in
//! [`ModelSpec`] differ.

pub mod gpr;
pub mod linalg;
pub mod ridge;

pub use gpr::GprForecastModel;
pub use ridge::{RidgeForecastModel, ridge_models};

use chrono::NaiveDate;
use thiserror::Error;

use crate::bias::BiasAdjuster;
use crate::confidence::discount;
use crate::series::StationSeries;
use crate::types::ForecastPoint;

/// Errors raised while fitting a single model variant.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("insufficient data: need at least {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("matrix not positive definite")]
    NotPositiveDefinite,

    #[error("non-finite values in {0}")]
    NonFinite(&'static str),
}

/// Identity and scoring constants of one model variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub name: String,
    pub detail: String,
    /// Fraction of the live-observation anomaly added to the output.
    pub bias_weight: f64,
    /// Upper bound of the confidence penalty.
    pub uncertainty_cap: f64,
    /// Uncertainty that costs one full unit of confidence.
    pub uncertainty_scale: f64,
}

/// Raw output of a fitted model for one day, before bias and scoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyEstimate {
    pub tmin_c: f64,
    pub tmax_c: f64,
    pub prcp_mm: f64,
    pub uncertainty: f64,
}

/// Inputs of [`FittedModel::predict`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictRequest {
    pub base_date: NaiveDate,
    pub horizon_days: u32,
    pub current_temp_c: Option<f64>,
    pub last7_mean: Option<f64>,
    pub confidence_base: f64,
}

pub trait ForecastModel: Send + Sync {
    fn spec(&self) -> &ModelSpec;

    fn fit(&self, series: &StationSeries) -> Result<Box<dyn FittedModel>, ModelError>;
}

pub trait FittedModel {
    fn spec(&self) -> &ModelSpec;

    /// One estimate per day, starting at `base_date`.
    fn estimate(&self, base_date: NaiveDate, horizon_days: u32) -> Vec<DailyEstimate>;

    /// Produces `horizon_days` ordered forecast points with bias correction
    /// and confidence applied.
    fn predict(&self, request: &PredictRequest) -> Vec<ForecastPoint> {
        let spec = self.spec();
        let adjuster = BiasAdjuster::new(spec.bias_weight);
        let bias = adjuster.bias(request.current_temp_c, request.last7_mean);

        self.estimate(request.base_date, request.horizon_days)
            .into_iter()
            .enumerate()
            .map(|(day, est)| {
                let temps = adjuster.apply(est.tmin_c, est.tmax_c, bias);
                ForecastPoint {
                    date: request.base_date + chrono::Duration::days(day as i64),
                    as_of: request.base_date,
                    horizon_hours: day as i32 * 24,
                    tmin_c: temps.tmin_c,
                    tmax_c: temps.tmax_c,
                    tmean_c: temps.tmean_c,
                    prcp_mm: est.prcp_mm.max(0.0),
                    delta_c: temps.delta_c,
                    model_name: spec.name.clone(),
                    model_detail: spec.detail.clone(),
                    confidence: discount(
                        request.confidence_base,
                        est.uncertainty,
                        spec.uncertainty_cap,
                        spec.uncertainty_scale,
                    ),
                }
            })
            .collect()
    }
}

/// Tuning knobs of the ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleConfig {
    pub gpr_enabled: bool,
    pub gpr_max_points: usize,
    pub gpr_restarts: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            gpr_enabled: true,
            gpr_max_points: 80,
            gpr_restarts: 0,
        }
    }
}

/// The configured model variants, primary first.
pub fn ensemble(config: &EnsembleConfig) -> Vec<Box<dyn ForecastModel>> {
    let mut models: Vec<Box<dyn ForecastModel>> = Vec::new();
    if config.gpr_enabled {
        models.push(Box::new(GprForecastModel::new(
            config.gpr_max_points,
            config.gpr_restarts,
        )));
    }
    for ridge in ridge_models() {
        models.push(Box::new(ridge));
    }
    models
}
