//! Sources of station history, station metadata and gridpoints.
//!
//! [`InputSource`] is what the orchestrator reads from. [`InputSnapshot`]
//! holds everything in memory and is what the CSV loader produces;
//! [`PgInputs`] queries the weather database directly.

pub mod csv_dir;
mod postgres;

pub use postgres::PgInputs;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

use crate::types::{Coordinates, GridPoint, Neighbor, StationObservation};

/// Raw history rows keyed by station id, in station id order.
pub type HistoryByStation = BTreeMap<String, Vec<StationObservation>>;

#[async_trait]
pub trait InputSource: Send + Sync {
    /// Latest date that has any observation.
    async fn latest_history_date(&self) -> Result<Option<NaiveDate>>;

    /// Rows dated on or after `since`, per station.
    async fn station_history(&self, since: NaiveDate) -> Result<HistoryByStation>;

    async fn station_coords(&self) -> Result<HashMap<String, Coordinates>>;

    /// Live temperature per station. May be empty.
    async fn current_temps(&self) -> Result<HashMap<String, f64>>;

    /// Gridpoints with neighbours within `max_km`, closest first, at most
    /// `max_stations` each.
    async fn gridpoints(&self, max_km: f64, max_stations: usize) -> Result<Vec<GridPoint>>;
}

/// Keeps neighbours with a known distance of at most `max_km`, closest
/// first, capped at `max_stations`.
pub fn select_neighbors(
    mut neighbors: Vec<Neighbor>,
    max_km: f64,
    max_stations: usize,
) -> Vec<Neighbor> {
    neighbors.retain(|n| {
        n.distance_km
            .is_some_and(|d| d.is_finite() && d >= 0.0 && d <= max_km)
    });
    neighbors.sort_by(|a, b| {
        a.distance_km
            .unwrap_or(f64::MAX)
            .total_cmp(&b.distance_km.unwrap_or(f64::MAX))
    });
    neighbors.truncate(max_stations);
    neighbors
}

/// All inputs held in memory.
#[derive(Debug, Clone, Default)]
pub struct InputSnapshot {
    pub history: HistoryByStation,
    pub coords: HashMap<String, Coordinates>,
    pub current_temps: HashMap<String, f64>,
    /// Gridpoints with their unfiltered neighbour lists.
    pub gridpoints: Vec<GridPoint>,
}

#[async_trait]
impl InputSource for InputSnapshot {
    async fn latest_history_date(&self) -> Result<Option<NaiveDate>> {
        Ok(self
            .history
            .values()
            .flat_map(|rows| rows.iter().filter_map(|r| r.date))
            .max())
    }

    async fn station_history(&self, since: NaiveDate) -> Result<HistoryByStation> {
        Ok(self
            .history
            .iter()
            .map(|(id, rows)| {
                let recent: Vec<StationObservation> = rows
                    .iter()
                    .filter(|r| r.date.is_some_and(|d| d >= since))
                    .cloned()
                    .collect();
                (id.clone(), recent)
            })
            .filter(|(_, rows)| !rows.is_empty())
            .collect())
    }

    async fn station_coords(&self) -> Result<HashMap<String, Coordinates>> {
        Ok(self.coords.clone())
    }

    async fn current_temps(&self) -> Result<HashMap<String, f64>> {
        Ok(self.current_temps.clone())
    }

    async fn gridpoints(&self, max_km: f64, max_stations: usize) -> Result<Vec<GridPoint>> {
        Ok(self
            .gridpoints
            .iter()
            .map(|g| GridPoint {
                neighbors: select_neighbors(g.neighbors.clone(), max_km, max_stations),
                ..g.clone()
            })
            .collect())
    }
}
