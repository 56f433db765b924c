//! Runs the model ensemble for a single station.

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::confidence::base_confidence;
use crate::features::rolling_means;
use crate::models::{EnsembleConfig, ForecastModel, PredictRequest, ensemble};
use crate::series::StationSeries;
use crate::types::{StationForecastSet, StationObservation};

pub const DEFAULT_HORIZON_DAYS: u32 = 11;

/// Result of forecasting one station.
#[derive(Debug)]
pub enum StationOutcome {
    Forecast(StationForecastSet),
    /// Not enough usable history to build a series.
    NoSeries,
    /// Every model variant failed or produced nothing.
    EmptyEnsemble,
}

/// Fits and runs every configured model variant for a station.
pub struct StationForecaster {
    models: Vec<Box<dyn ForecastModel>>,
    horizon_days: u32,
    min_rows: usize,
}

impl StationForecaster {
    pub fn new(config: &EnsembleConfig, horizon_days: u32, min_rows: usize) -> Self {
        Self::with_models(ensemble(config), horizon_days, min_rows)
    }

    pub fn with_models(
        models: Vec<Box<dyn ForecastModel>>,
        horizon_days: u32,
        min_rows: usize,
    ) -> Self {
        Self {
            models,
            horizon_days,
            min_rows,
        }
    }

    pub fn horizon_days(&self) -> u32 {
        self.horizon_days
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Forecasts `horizon_days` from `as_of` with every model variant.
    ///
    /// A variant that fails to fit is logged and left out; the station is
    /// only skipped when no variant produced output.
    pub fn forecast(
        &self,
        station_id: &str,
        rows: &[StationObservation],
        current_temp_c: Option<f64>,
        as_of: NaiveDate,
    ) -> StationOutcome {
        let Some(series) = StationSeries::from_rows(rows, self.min_rows) else {
            debug!(station_id, rows = rows.len(), "Not enough history for a series");
            return StationOutcome::NoSeries;
        };

        let (_, last7_mean) = rolling_means(series.tmean_c(), 7);
        let request = PredictRequest {
            base_date: as_of,
            horizon_days: self.horizon_days,
            current_temp_c,
            last7_mean: Some(last7_mean),
            confidence_base: base_confidence(as_of, series.last_date(), current_temp_c),
        };

        let mut points = Vec::with_capacity(self.models.len() * self.horizon_days as usize);
        for model in &self.models {
            match model.fit(&series) {
                Ok(fitted) => points.extend(fitted.predict(&request)),
                Err(e) => warn!(
                    station_id,
                    model = %model.spec().name,
                    error = %e,
                    "Model fit failed, skipping variant"
                ),
            }
        }

        if points.is_empty() {
            return StationOutcome::EmptyEnsemble;
        }
        StationOutcome::Forecast(StationForecastSet {
            station_id: station_id.to_string(),
            as_of,
            points,
        })
    }
}
