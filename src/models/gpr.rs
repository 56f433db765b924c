//! Gaussian-process regression forecaster over the day index.
//!
//! Kernel: `amplitude · (RBF + ExpSineSquared) + White`, with a fixed
//! `alpha` added to the training diagonal and normalised targets. There is
//! no gradient optimiser; instead a short, fixed list of hyperparameter
//! candidates is scored by log marginal likelihood and the best one kept.
//! `restarts` controls how many candidates beyond the initial one are tried.

use chrono::NaiveDate;
use std::f64::consts::PI;

use super::linalg::{cholesky, solve_lower, solve_lower_transposed};
use super::{DailyEstimate, FittedModel, ForecastModel, ModelError, ModelSpec};
use crate::bias::PRIMARY_BIAS_WEIGHT;
use crate::features::{mean, stddev};
use crate::series::StationSeries;

pub const GPR_NAME: &str = "gpr-v1";
pub const GPR_DETAIL: &str = "gpr-v1 kernel=rbf+periodic+white";

const GP_ALPHA: f64 = 0.5;
const STD_CAP: f64 = 0.7;
const STD_SCALE: f64 = 25.0;
const MIN_TRAINING_POINTS: usize = 2;

/// Hyperparameters of the composite kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelParams {
    pub amplitude: f64,
    pub rbf_length: f64,
    pub periodic_length: f64,
    pub period: f64,
    pub noise: f64,
}

impl KernelParams {
    /// Covariance between two distinct inputs (no white-noise term).
    fn cov(&self, a: f64, b: f64) -> f64 {
        let d = a - b;
        let rbf = (-(d * d) / (2.0 * self.rbf_length * self.rbf_length)).exp();
        let s = (PI * d.abs() / self.period).sin();
        let periodic = (-2.0 * s * s / (self.periodic_length * self.periodic_length)).exp();
        self.amplitude * (rbf + periodic)
    }

    /// Prior variance at a single input, white noise included.
    fn prior_var(&self) -> f64 {
        2.0 * self.amplitude + self.noise
    }
}

const INITIAL_PARAMS: KernelParams = KernelParams {
    amplitude: 1.0,
    rbf_length: 30.0,
    periodic_length: 1.0,
    period: 365.25,
    noise: 0.1,
};

const RESTART_CANDIDATES: [KernelParams; 4] = [
    KernelParams {
        amplitude: 1.0,
        rbf_length: 60.0,
        periodic_length: 0.7,
        period: 365.25,
        noise: 0.05,
    },
    KernelParams {
        amplitude: 2.0,
        rbf_length: 15.0,
        periodic_length: 1.5,
        period: 365.25,
        noise: 0.2,
    },
    KernelParams {
        amplitude: 0.5,
        rbf_length: 120.0,
        periodic_length: 1.0,
        period: 365.25,
        noise: 0.5,
    },
    KernelParams {
        amplitude: 1.0,
        rbf_length: 7.0,
        periodic_length: 2.0,
        period: 365.25,
        noise: 1.0,
    },
];

fn candidates(restarts: usize) -> Vec<KernelParams> {
    std::iter::once(INITIAL_PARAMS)
        .chain(RESTART_CANDIDATES.iter().copied().take(restarts))
        .collect()
}

/// A GP fitted to one target variable.
#[derive(Debug, Clone)]
struct GpTarget {
    params: KernelParams,
    xs: Vec<f64>,
    chol: Vec<Vec<f64>>,
    weights: Vec<f64>,
    y_mean: f64,
    y_std: f64,
    log_marginal_likelihood: f64,
}

impl GpTarget {
    fn fit_with(params: KernelParams, xs: &[f64], ys: &[f64]) -> Result<Self, ModelError> {
        let y_mean = mean(ys);
        let sd = stddev(ys, y_mean);
        let y_std = if sd > 1e-12 { sd } else { 1.0 };
        let y: Vec<f64> = ys.iter().map(|v| (v - y_mean) / y_std).collect();

        let n = xs.len();
        let mut k = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..i {
                let c = params.cov(xs[i], xs[j]);
                k[i][j] = c;
                k[j][i] = c;
            }
            k[i][i] = params.prior_var() + GP_ALPHA;
        }

        let chol = cholesky(&k)?;
        let weights = solve_lower_transposed(&chol, &solve_lower(&chol, &y));
        let fit_term: f64 = y.iter().zip(&weights).map(|(a, b)| a * b).sum();
        let log_det: f64 = (0..n).map(|i| chol[i][i].ln()).sum();
        let log_marginal_likelihood =
            -0.5 * fit_term - log_det - 0.5 * n as f64 * (2.0 * PI).ln();
        if !log_marginal_likelihood.is_finite() {
            return Err(ModelError::NonFinite("gp marginal likelihood"));
        }

        Ok(Self {
            params,
            xs: xs.to_vec(),
            chol,
            weights,
            y_mean,
            y_std,
            log_marginal_likelihood,
        })
    }

    /// Fits every candidate and keeps the most likely one.
    fn fit(candidates: &[KernelParams], xs: &[f64], ys: &[f64]) -> Result<Self, ModelError> {
        let mut best: Option<GpTarget> = None;
        let mut last_err = ModelError::InsufficientData {
            needed: MIN_TRAINING_POINTS,
            got: xs.len(),
        };
        for params in candidates {
            match Self::fit_with(*params, xs, ys) {
                Ok(target) => {
                    let better = best
                        .as_ref()
                        .is_none_or(|b| target.log_marginal_likelihood > b.log_marginal_likelihood);
                    if better {
                        best = Some(target);
                    }
                }
                Err(e) => last_err = e,
            }
        }
        best.ok_or(last_err)
    }

    /// Posterior mean and standard deviation at `x`, in original units.
    fn predict(&self, x: f64) -> (f64, f64) {
        let k_star: Vec<f64> = self.xs.iter().map(|xi| self.params.cov(x, *xi)).collect();
        let mean_norm: f64 = k_star.iter().zip(&self.weights).map(|(a, b)| a * b).sum();
        let v = solve_lower(&self.chol, &k_star);
        let var_norm = (self.params.prior_var() - v.iter().map(|e| e * e).sum::<f64>()).max(0.0);
        (
            mean_norm * self.y_std + self.y_mean,
            var_norm.sqrt() * self.y_std,
        )
    }
}

/// GP forecaster trained on a downsampled copy of the series.
#[derive(Debug, Clone)]
pub struct GprForecastModel {
    spec: ModelSpec,
    max_points: usize,
    restarts: usize,
}

impl GprForecastModel {
    pub fn new(max_points: usize, restarts: usize) -> Self {
        Self {
            spec: ModelSpec {
                name: GPR_NAME.to_string(),
                detail: GPR_DETAIL.to_string(),
                bias_weight: PRIMARY_BIAS_WEIGHT,
                uncertainty_cap: STD_CAP,
                uncertainty_scale: STD_SCALE,
            },
            max_points,
            restarts,
        }
    }
}

impl ForecastModel for GprForecastModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn fit(&self, series: &StationSeries) -> Result<Box<dyn FittedModel>, ModelError> {
        let series = series.downsample(self.max_points);
        if series.len() < MIN_TRAINING_POINTS {
            return Err(ModelError::InsufficientData {
                needed: MIN_TRAINING_POINTS,
                got: series.len(),
            });
        }
        let base_date = series.first_date();
        let xs: Vec<f64> = series
            .dates()
            .iter()
            .map(|d| (*d - base_date).num_days() as f64)
            .collect();
        let log_prcp: Vec<f64> = series.prcp_mm().iter().map(|p| p.max(0.0).ln_1p()).collect();

        let candidates = candidates(self.restarts);
        Ok(Box::new(FittedGpr {
            spec: self.spec.clone(),
            base_date,
            tmin: GpTarget::fit(&candidates, &xs, series.tmin_c())?,
            tmax: GpTarget::fit(&candidates, &xs, series.tmax_c())?,
            prcp: GpTarget::fit(&candidates, &xs, &log_prcp)?,
        }))
    }
}

struct FittedGpr {
    spec: ModelSpec,
    base_date: NaiveDate,
    tmin: GpTarget,
    tmax: GpTarget,
    prcp: GpTarget,
}

impl FittedModel for FittedGpr {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn estimate(&self, base_date: NaiveDate, horizon_days: u32) -> Vec<DailyEstimate> {
        let base_x = (base_date - self.base_date).num_days() as f64;
        (0..horizon_days)
            .map(|h| {
                let x = base_x + f64::from(h);
                let (tmin, tmin_std) = self.tmin.predict(x);
                let (tmax, tmax_std) = self.tmax.predict(x);
                let (log_prcp, prcp_std) = self.prcp.predict(x);
                let uncertainty = if prcp_std.is_finite() {
                    mean(&[tmin_std, tmax_std, prcp_std])
                } else {
                    0.0
                };
                DailyEstimate {
                    tmin_c: tmin,
                    tmax_c: tmax,
                    prcp_mm: log_prcp.exp_m1(),
                    uncertainty,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PredictRequest;
    use crate::types::StationObservation;

    fn series(days: usize) -> StationSeries {
        let start = NaiveDate::from_ymd_opt(2022, 3, 1).unwrap();
        let rows: Vec<StationObservation> = (0..days)
            .map(|i| {
                let t = i as f64;
                let tmean = 10.0 + 8.0 * (2.0 * PI * t / 365.25).sin();
                let prcp = if i % 5 == 0 { 4.0 } else { 0.0 };
                StationObservation::new(
                    start + chrono::Duration::days(i as i64),
                    tmean + 4.0,
                    tmean - 4.0,
                    Some(prcp),
                )
            })
            .collect();
        StationSeries::from_rows(&rows, 30).unwrap()
    }

    #[test]
    fn test_candidate_count_follows_restarts() {
        assert_eq!(candidates(0), vec![INITIAL_PARAMS]);
        assert_eq!(candidates(2).len(), 3);
        assert_eq!(candidates(50).len(), 1 + RESTART_CANDIDATES.len());
    }

    #[test]
    fn test_gp_interpolates_training_data() {
        let xs: Vec<f64> = (0..40).map(|i| i as f64 * 3.0).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 5.0 + (x / 20.0).sin()).collect();
        let target = GpTarget::fit(&candidates(0), &xs, &ys).unwrap();
        let (m, sd) = target.predict(30.0);
        assert!((m - ys[10]).abs() < 0.5);
        assert!(sd >= 0.0 && sd.is_finite());
    }

    #[test]
    fn test_restarts_never_lower_likelihood() {
        let xs: Vec<f64> = (0..30).map(|i| i as f64 * 5.0).collect();
        let ys: Vec<f64> = xs.iter().map(|x| (x / 40.0).cos() * 3.0).collect();
        let single = GpTarget::fit(&candidates(0), &xs, &ys).unwrap();
        let many = GpTarget::fit(&candidates(4), &xs, &ys).unwrap();
        assert!(many.log_marginal_likelihood >= single.log_marginal_likelihood);
    }

    #[test]
    fn test_gpr_forecast_points_valid() {
        let series = series(400);
        let model = GprForecastModel::new(80, 1);
        let fitted = model.fit(&series).unwrap();
        let points = fitted.predict(&PredictRequest {
            base_date: series.last_date() + chrono::Duration::days(1),
            horizon_days: 11,
            current_temp_c: Some(30.0),
            last7_mean: Some(10.0),
            confidence_base: 1.0,
        });
        assert_eq!(points.len(), 11);
        for (i, p) in points.iter().enumerate() {
            assert_eq!(p.horizon_hours, i as i32 * 24);
            assert_eq!(p.model_name, GPR_NAME);
            assert_eq!(p.model_detail, GPR_DETAIL);
            assert!(p.tmin_c <= p.tmax_c);
            assert!(p.prcp_mm >= 0.0);
            assert!((0.1..=1.0).contains(&p.confidence));
        }
    }
}
