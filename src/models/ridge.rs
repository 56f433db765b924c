//! Ridge regression forecasters on seasonal and trend features.

use chrono::NaiveDate;

use super::linalg::solve_spd;
use super::{DailyEstimate, FittedModel, ForecastModel, ModelError, ModelSpec};
use crate::bias::SECONDARY_BIAS_WEIGHT;
use crate::features::{mean, ridge_features, rolling_means, stddev};
use crate::series::StationSeries;

const RIDGE_ALPHA: f64 = 1.0;
const RESIDUAL_CAP: f64 = 0.6;
const RESIDUAL_SCALE: f64 = 12.0;

/// Column standardisation fitted on the training design matrix.
/// Constant columns keep a scale of 1.
#[derive(Debug, Clone)]
struct Scaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl Scaler {
    fn fit(rows: &[Vec<f64>]) -> Self {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let mut means = Vec::with_capacity(width);
        let mut scales = Vec::with_capacity(width);
        for col in 0..width {
            let column: Vec<f64> = rows.iter().map(|r| r[col]).collect();
            let m = mean(&column);
            let sd = stddev(&column, m);
            means.push(m);
            scales.push(if sd > 1e-12 { sd } else { 1.0 });
        }
        Self { means, scales }
    }

    fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

/// `y ≈ intercept + coefs · x` on standardised inputs.
#[derive(Debug, Clone)]
struct RidgeFit {
    intercept: f64,
    coefs: Vec<f64>,
}

impl RidgeFit {
    /// Solves `(XᵀX + αI) β = Xᵀ(y − ȳ)`; the intercept is not penalised.
    fn fit(x: &[Vec<f64>], y: &[f64], alpha: f64) -> Result<Self, ModelError> {
        if x.len() != y.len() {
            return Err(ModelError::DimensionMismatch {
                expected: x.len(),
                got: y.len(),
            });
        }
        let width = x.first().map(Vec::len).unwrap_or(0);
        let y_mean = mean(y);
        let col_means: Vec<f64> = (0..width)
            .map(|c| mean(&x.iter().map(|r| r[c]).collect::<Vec<_>>()))
            .collect();

        let mut xtx = vec![vec![0.0; width]; width];
        let mut xty = vec![0.0; width];
        for (row, target) in x.iter().zip(y) {
            let centred: Vec<f64> = row.iter().zip(&col_means).map(|(v, m)| v - m).collect();
            for i in 0..width {
                xty[i] += centred[i] * (target - y_mean);
                for j in 0..width {
                    xtx[i][j] += centred[i] * centred[j];
                }
            }
        }
        for (i, row) in xtx.iter_mut().enumerate() {
            row[i] += alpha;
        }

        let coefs = solve_spd(&xtx, &xty)?;
        let intercept = y_mean
            - coefs
                .iter()
                .zip(&col_means)
                .map(|(b, m)| b * m)
                .sum::<f64>();
        Ok(Self { intercept, coefs })
    }

    fn predict(&self, row: &[f64]) -> f64 {
        self.intercept + self.coefs.iter().zip(row).map(|(b, v)| b * v).sum::<f64>()
    }
}

fn residual_std(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let residuals: Vec<f64> = actual.iter().zip(predicted).map(|(a, p)| a - p).collect();
    stddev(&residuals, mean(&residuals))
}

/// Ridge forecaster configured with a feature set.
#[derive(Debug, Clone)]
pub struct RidgeForecastModel {
    spec: ModelSpec,
    include_prcp_feature: bool,
}

impl RidgeForecastModel {
    pub fn new(name: &str, detail: &str, include_prcp_feature: bool) -> Self {
        Self {
            spec: ModelSpec {
                name: name.to_string(),
                detail: detail.to_string(),
                bias_weight: SECONDARY_BIAS_WEIGHT,
                uncertainty_cap: RESIDUAL_CAP,
                uncertainty_scale: RESIDUAL_SCALE,
            },
            include_prcp_feature,
        }
    }
}

impl ForecastModel for RidgeForecastModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn fit(&self, series: &StationSeries) -> Result<Box<dyn FittedModel>, ModelError> {
        if series.len() < 2 {
            return Err(ModelError::InsufficientData {
                needed: 2,
                got: series.len(),
            });
        }
        let base_date = series.first_date();
        let (_, last7_tmean) = rolling_means(series.tmean_c(), 7);
        let (_, last7_prcp) = rolling_means(series.prcp_mm(), 7);

        let raw = ridge_features(
            series.dates(),
            base_date,
            last7_tmean,
            last7_prcp,
            self.include_prcp_feature,
        );
        let scaler = Scaler::fit(&raw);
        let x: Vec<Vec<f64>> = raw.iter().map(|r| scaler.transform(r)).collect();

        let log_prcp: Vec<f64> = series.prcp_mm().iter().map(|p| p.max(0.0).ln_1p()).collect();
        let tmin = RidgeFit::fit(&x, series.tmin_c(), RIDGE_ALPHA)?;
        let tmax = RidgeFit::fit(&x, series.tmax_c(), RIDGE_ALPHA)?;
        let prcp = RidgeFit::fit(&x, &log_prcp, RIDGE_ALPHA)?;

        let fitted = |fit: &RidgeFit| x.iter().map(|r| fit.predict(r)).collect::<Vec<_>>();
        let resid_std = mean(&[
            residual_std(series.tmin_c(), &fitted(&tmin)),
            residual_std(series.tmax_c(), &fitted(&tmax)),
            residual_std(&log_prcp, &fitted(&prcp)),
        ]);
        if !resid_std.is_finite() {
            return Err(ModelError::NonFinite("ridge residuals"));
        }

        Ok(Box::new(FittedRidge {
            spec: self.spec.clone(),
            include_prcp_feature: self.include_prcp_feature,
            base_date,
            last7_tmean,
            last7_prcp,
            scaler,
            tmin,
            tmax,
            prcp,
            resid_std,
        }))
    }
}

struct FittedRidge {
    spec: ModelSpec,
    include_prcp_feature: bool,
    base_date: NaiveDate,
    last7_tmean: f64,
    last7_prcp: f64,
    scaler: Scaler,
    tmin: RidgeFit,
    tmax: RidgeFit,
    prcp: RidgeFit,
    resid_std: f64,
}

impl FittedModel for FittedRidge {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn estimate(&self, base_date: NaiveDate, horizon_days: u32) -> Vec<DailyEstimate> {
        let dates: Vec<NaiveDate> = (0..horizon_days)
            .map(|h| base_date + chrono::Duration::days(i64::from(h)))
            .collect();
        ridge_features(
            &dates,
            self.base_date,
            self.last7_tmean,
            self.last7_prcp,
            self.include_prcp_feature,
        )
        .iter()
        .map(|raw| {
            let row = self.scaler.transform(raw);
            DailyEstimate {
                tmin_c: self.tmin.predict(&row),
                tmax_c: self.tmax.predict(&row),
                prcp_mm: self.prcp.predict(&row).exp_m1(),
                uncertainty: self.resid_std,
            }
        })
        .collect()
    }
}

/// The ridge variants that run for every station.
pub fn ridge_models() -> Vec<RidgeForecastModel> {
    vec![
        RidgeForecastModel::new(
            "ridge-v1",
            "ridge-v1 features=doy_sin_cos,last7_tmean,last7_prcp,trend",
            true,
        ),
        RidgeForecastModel::new(
            "ridge-seasonal-v2",
            "ridge-seasonal doy_sin_cos+7day_mean+trend",
            false,
        ),
    ]
}
