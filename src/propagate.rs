//! Combines neighbouring stations' forecasts into gridpoint forecasts.

use anyhow::Result;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tracing::debug;

use crate::confidence::{MAX_CONFIDENCE, MIN_CONFIDENCE};
use crate::store::PredictionStore;
use crate::types::{ForecastPoint, GridPoint, PredictionRecord, SourceType, StationForecastSet};

/// Distances below this count as this close, so a co-located station
/// cannot dominate without bound.
const MIN_DISTANCE_KM: f64 = 0.5;

/// Denominator used for the weighted mean of a `(model, horizon)` bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightNormalization {
    /// Sum of the weights of stations that have a point in the bucket.
    #[default]
    Bucket,
    /// Sum of the weights of every contributing station, even those
    /// missing from the bucket.
    AllStations,
}

impl FromStr for WeightNormalization {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bucket" => Ok(Self::Bucket),
            "all" | "all_stations" | "all-stations" => Ok(Self::AllStations),
            other => Err(anyhow::anyhow!("unknown weight normalization '{other}'")),
        }
    }
}

/// One neighbour's forecast and its distance to the gridpoint.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub station_id: String,
    pub distance_km: Option<f64>,
    pub points: Vec<ForecastPoint>,
}

impl Contribution {
    /// `1 / max(0.5, d)` for a known distance, 1.0 otherwise.
    pub fn weight(&self) -> f64 {
        match self.distance_km {
            Some(d) if d.is_finite() && d >= 0.0 => 1.0 / d.max(MIN_DISTANCE_KM),
            _ => 1.0,
        }
    }
}

/// Run-level parameters of the propagation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropagationParams {
    pub forecast_date: NaiveDate,
    pub truth_date: NaiveDate,
    pub max_km: f64,
    pub normalization: WeightNormalization,
}

/// Forecast points for one gridpoint.
#[derive(Debug, Clone)]
pub struct GridForecast {
    pub grid_id: String,
    pub lat: f64,
    pub lon: f64,
    pub contributors: usize,
    pub points: Vec<ForecastPoint>,
}

impl GridForecast {
    /// Rows to persist, carrying the gridpoint's identity.
    pub fn records(&self) -> Vec<PredictionRecord> {
        self.points
            .iter()
            .map(|p| {
                PredictionRecord::from_point(
                    SourceType::Gridpoint,
                    &self.grid_id,
                    self.lat,
                    self.lon,
                    p,
                )
            })
            .collect()
    }
}

/// Gathers the forecast of every candidate station of `grid`.
///
/// Sets computed earlier in the same run win; otherwise persisted rows for
/// the forecast date are loaded. Stations with nothing are dropped.
pub async fn collect_contributions(
    grid: &GridPoint,
    in_memory: &HashMap<String, StationForecastSet>,
    store: &dyn PredictionStore,
    forecast_date: NaiveDate,
    horizon_days: u32,
) -> Result<Vec<Contribution>> {
    let mut contributions = Vec::new();
    for candidate in grid.candidates() {
        let points = match in_memory.get(&candidate.station_id) {
            Some(set) if !set.is_empty() => set.points.clone(),
            _ => {
                store
                    .load(
                        SourceType::Station,
                        &candidate.station_id,
                        forecast_date,
                        horizon_days,
                    )
                    .await?
            }
        };
        if points.is_empty() {
            debug!(grid_id = %grid.id, station_id = %candidate.station_id, "Neighbour has no forecast");
            continue;
        }
        contributions.push(Contribution {
            station_id: candidate.station_id,
            distance_km: candidate.distance_km,
            points,
        });
    }
    Ok(contributions)
}

/// Builds the gridpoint forecast from its contributing stations.
///
/// Returns `None` when nothing contributes. A single contributor is copied
/// as is; several are merged per `(model_name, horizon_hours)` bucket with
/// inverse-distance weights.
pub fn propagate(
    grid: &GridPoint,
    contributions: &[Contribution],
    params: &PropagationParams,
) -> Option<GridForecast> {
    let points = match contributions {
        [] => return None,
        [single] => single.points.clone(),
        many => merge(many, params),
    };
    Some(GridForecast {
        grid_id: grid.id.clone(),
        lat: grid.lat,
        lon: grid.lon,
        contributors: contributions.len(),
        points,
    })
}

fn merge(contributions: &[Contribution], params: &PropagationParams) -> Vec<ForecastPoint> {
    let total_weight: f64 = contributions.iter().map(Contribution::weight).sum();

    let mut buckets: BTreeMap<(&str, i32), Vec<(&ForecastPoint, f64)>> = BTreeMap::new();
    for contribution in contributions {
        let weight = contribution.weight();
        for point in &contribution.points {
            buckets
                .entry((point.model_name.as_str(), point.horizon_hours))
                .or_default()
                .push((point, weight));
        }
    }

    let detail = format!(
        "cluster km<={} stations={} data_date={}",
        params.max_km,
        contributions.len(),
        params.truth_date
    );

    buckets
        .into_iter()
        .map(|((model_name, horizon_hours), items)| {
            let denominator = match params.normalization {
                WeightNormalization::Bucket => items.iter().map(|(_, w)| w).sum::<f64>(),
                WeightNormalization::AllStations => total_weight,
            };
            let weighted = |field: fn(&ForecastPoint) -> f64| {
                items.iter().map(|(p, w)| field(p) * w).sum::<f64>() / denominator
            };
            ForecastPoint {
                date: params.forecast_date + chrono::Duration::days(i64::from(horizon_hours / 24)),
                as_of: params.forecast_date,
                horizon_hours,
                tmin_c: weighted(|p| p.tmin_c),
                tmax_c: weighted(|p| p.tmax_c),
                tmean_c: weighted(|p| p.tmean_c),
                prcp_mm: weighted(|p| p.prcp_mm),
                delta_c: weighted(|p| p.delta_c),
                model_name: model_name.to_string(),
                model_detail: detail.clone(),
                confidence: weighted(|p| p.confidence).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE),
            }
        })
        .collect()
}
