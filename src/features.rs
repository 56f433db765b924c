//! Feature engineering and small statistics helpers for the models.

use chrono::{Datelike, NaiveDate};
use std::f64::consts::PI;

const DAYS_PER_YEAR: f64 = 365.25;

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Computes the population standard deviation given a pre-computed mean.
/// Returns 0.0 for empty input.
pub fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;

    variance.sqrt()
}

/// Trailing mean over `window` values for every position, plus the last one.
///
/// When the series is shorter than the window every position gets the mean
/// of the whole series.
pub fn rolling_means(values: &[f64], window: usize) -> (Vec<f64>, f64) {
    if values.len() < window {
        let m = mean(values);
        return (vec![m; values.len()], m);
    }
    let window = window.max(1);
    let out: Vec<f64> = (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            mean(&values[start..=i])
        })
        .collect();
    let last = out.last().copied().unwrap_or(0.0);
    (out, last)
}

/// `[sin(doy), cos(doy), trend]` for one date.
pub fn seasonal_row(date: NaiveDate, base_date: NaiveDate) -> [f64; 3] {
    let doy = date.ordinal() as f64;
    let angle = 2.0 * PI * doy / DAYS_PER_YEAR;
    let trend = (date - base_date).num_days() as f64 / DAYS_PER_YEAR;
    [angle.sin(), angle.cos(), trend]
}

/// Design matrix used by the ridge variants: seasonal terms, trend, the
/// trailing 7-day mean temperature and optionally the 7-day precipitation.
pub fn ridge_features(
    dates: &[NaiveDate],
    base_date: NaiveDate,
    last7_tmean: f64,
    last7_prcp: f64,
    include_prcp: bool,
) -> Vec<Vec<f64>> {
    dates
        .iter()
        .map(|d| {
            let mut row = seasonal_row(*d, base_date).to_vec();
            row.push(last7_tmean);
            if include_prcp {
                row.push(last7_prcp);
            }
            row
        })
        .collect()
}
