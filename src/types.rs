//! Data types shared by the forecast pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw daily row for one station, as delivered by the history source.
///
/// Every field is optional because upstream rows can be incomplete; the
/// series builder decides what is usable.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StationObservation {
    pub date: Option<NaiveDate>,
    pub tmax_c: Option<f64>,
    pub tmin_c: Option<f64>,
    pub prcp_mm: Option<f64>,
}

impl StationObservation {
    pub fn new(date: NaiveDate, tmax_c: f64, tmin_c: f64, prcp_mm: Option<f64>) -> Self {
        Self {
            date: Some(date),
            tmax_c: Some(tmax_c),
            tmin_c: Some(tmin_c),
            prcp_mm,
        }
    }
}

/// One day of forecast output from a single model variant.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub as_of: NaiveDate,
    pub horizon_hours: i32,
    pub tmin_c: f64,
    pub tmax_c: f64,
    pub tmean_c: f64,
    pub prcp_mm: f64,
    pub delta_c: f64,
    pub model_name: String,
    pub model_detail: String,
    pub confidence: f64,
}

/// All points produced for one station and one as_of date.
#[derive(Debug, Clone)]
pub struct StationForecastSet {
    pub station_id: String,
    pub as_of: NaiveDate,
    pub points: Vec<ForecastPoint>,
}

impl StationForecastSet {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Whether a persisted row describes a station or a gridpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Station,
    Gridpoint,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Station => "station",
            SourceType::Gridpoint => "gridpoint",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Station location in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// A neighbouring station of a gridpoint. `distance_km` is `None` when the
/// station comes from the primary-station fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub station_id: String,
    pub distance_km: Option<f64>,
}

/// A location without observations that is served from nearby stations.
#[derive(Debug, Clone, PartialEq)]
pub struct GridPoint {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub primary_station_id: Option<String>,
    pub neighbors: Vec<Neighbor>,
}

impl GridPoint {
    /// Stations to pull forecasts from: the neighbour list when present,
    /// otherwise the primary station alone.
    pub fn candidates(&self) -> Vec<Neighbor> {
        if !self.neighbors.is_empty() {
            return self.neighbors.clone();
        }
        self.primary_station_id
            .iter()
            .map(|id| Neighbor {
                station_id: id.clone(),
                distance_km: None,
            })
            .collect()
    }
}

/// A persisted forecast row.
///
/// Rows are unique on `(source_type, source_id, lat, lon, as_of, horizon_hours)`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PredictionRecord {
    pub source_type: SourceType,
    pub source_id: String,
    pub lat: f64,
    pub lon: f64,
    pub as_of: NaiveDate,
    pub horizon_hours: i32,
    pub tmean_c: f64,
    pub prcp_mm: f64,
    pub tmin_c: f64,
    pub tmax_c: f64,
    pub delta_c: f64,
    pub model_name: String,
    pub model_detail: String,
    pub confidence: f64,
    pub written_at: DateTime<Utc>,
}

impl PredictionRecord {
    pub fn from_point(
        source_type: SourceType,
        source_id: &str,
        lat: f64,
        lon: f64,
        point: &ForecastPoint,
    ) -> Self {
        Self {
            source_type,
            source_id: source_id.to_string(),
            lat,
            lon,
            as_of: point.as_of,
            horizon_hours: point.horizon_hours,
            tmean_c: point.tmean_c,
            prcp_mm: point.prcp_mm,
            tmin_c: point.tmin_c,
            tmax_c: point.tmax_c,
            delta_c: point.delta_c,
            model_name: point.model_name.clone(),
            model_detail: point.model_detail.clone(),
            confidence: point.confidence,
            written_at: Utc::now(),
        }
    }

    /// Rebuilds the forecast point this row was written from. The target
    /// date is derived from `as_of` and the horizon.
    pub fn to_point(&self) -> ForecastPoint {
        ForecastPoint {
            date: self.as_of + chrono::Duration::days(i64::from(self.horizon_hours / 24)),
            as_of: self.as_of,
            horizon_hours: self.horizon_hours,
            tmin_c: self.tmin_c,
            tmax_c: self.tmax_c,
            tmean_c: self.tmean_c,
            prcp_mm: self.prcp_mm,
            delta_c: self.delta_c,
            model_name: self.model_name.clone(),
            model_detail: self.model_detail.clone(),
            confidence: self.confidence,
        }
    }
}
