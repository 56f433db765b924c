use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{HistoryByStation, InputSource, select_neighbors};
use crate::types::{Coordinates, GridPoint, Neighbor, StationObservation};

/// Reads inputs from the weather database (NOAA daily summaries, station
/// metadata, gridpoint mappings and the latest hourly forecast view).
#[derive(Clone)]
pub struct PgInputs {
    pool: PgPool,
}

impl PgInputs {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct HistoryRow {
    station_id: String,
    date: NaiveDate,
    tmax_c: Option<f64>,
    tmin_c: Option<f64>,
    prcp_mm: Option<f64>,
}

#[derive(FromRow)]
struct StationRow {
    station_id: String,
    lat: f64,
    lon: f64,
}

#[derive(FromRow)]
struct GridRow {
    grid_id: String,
    lat: f64,
    lon: f64,
    station_id: Option<String>,
}

#[derive(FromRow)]
struct NeighborRow {
    grid_id: String,
    station_id: String,
    distance_m: f64,
}

impl PgInputs {
    async fn neighbors(&self, max_km: f64) -> Result<HashMap<String, Vec<Neighbor>>> {
        let rows = sqlx::query_as::<_, NeighborRow>(
            "SELECT grid_id, station_id, distance_m::float8 AS distance_m \
             FROM gridpoint_station_map \
             WHERE distance_m IS NOT NULL AND station_id IS NOT NULL AND distance_m <= $1 \
             ORDER BY grid_id, distance_m ASC",
        )
        .bind(max_km * 1000.0)
        .fetch_all(&self.pool)
        .await
        .context("neighbour query failed")?;

        let mut by_grid: HashMap<String, Vec<Neighbor>> = HashMap::new();
        for row in rows {
            by_grid.entry(row.grid_id).or_default().push(Neighbor {
                station_id: row.station_id,
                distance_km: Some(row.distance_m / 1000.0),
            });
        }
        Ok(by_grid)
    }
}

#[async_trait]
impl InputSource for PgInputs {
    async fn latest_history_date(&self) -> Result<Option<NaiveDate>> {
        sqlx::query_scalar("SELECT MAX(date) FROM noaa_daily_summary")
            .fetch_one(&self.pool)
            .await
            .context("latest history date query failed")
    }

    #[tracing::instrument(skip(self))]
    async fn station_history(&self, since: NaiveDate) -> Result<HistoryByStation> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT station_id, date, tmax_c::float8 AS tmax_c, tmin_c::float8 AS tmin_c, \
             prcp_mm::float8 AS prcp_mm \
             FROM noaa_daily_summary WHERE date >= $1 \
             ORDER BY station_id, date",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("station history query failed")?;

        debug!(rows = rows.len(), "History rows loaded");
        let mut history = HistoryByStation::new();
        for row in rows {
            history
                .entry(row.station_id)
                .or_default()
                .push(StationObservation {
                    date: Some(row.date),
                    tmax_c: row.tmax_c,
                    tmin_c: row.tmin_c,
                    prcp_mm: row.prcp_mm,
                });
        }
        Ok(history)
    }

    async fn station_coords(&self) -> Result<HashMap<String, Coordinates>> {
        let rows = sqlx::query_as::<_, StationRow>(
            "SELECT station_id, ST_Y(geom)::float8 AS lat, ST_X(geom)::float8 AS lon \
             FROM noaa_station WHERE geom IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .context("station coordinates query failed")?;

        Ok(rows
            .into_iter()
            .map(|r| (r.station_id, Coordinates { lat: r.lat, lon: r.lon }))
            .collect())
    }

    async fn current_temps(&self) -> Result<HashMap<String, f64>> {
        let rows: Vec<(String, f64)> = sqlx::query_as(
            "SELECT m.station_id, f.temperature_c::float8 \
             FROM gridpoint_station_map m \
             JOIN v_latest_hourly_forecast f ON f.grid_id = m.grid_id \
             WHERE m.is_primary = true \
               AND f.start_time <= now() AND f.end_time > now() \
               AND f.temperature_c IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .context("current temperature query failed")?;

        Ok(rows.into_iter().collect())
    }

    #[tracing::instrument(skip(self))]
    async fn gridpoints(&self, max_km: f64, max_stations: usize) -> Result<Vec<GridPoint>> {
        let rows = sqlx::query_as::<_, GridRow>(
            "SELECT g.grid_id, ST_Y(g.geom)::float8 AS lat, ST_X(g.geom)::float8 AS lon, \
             m.station_id \
             FROM geo_gridpoint g \
             LEFT JOIN gridpoint_station_map m ON m.grid_id = g.grid_id AND m.is_primary = true \
             WHERE g.geom IS NOT NULL \
             ORDER BY g.grid_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("gridpoint query failed")?;

        let mut neighbors = match self.neighbors(max_km).await {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "Neighbour map unavailable, using primary stations");
                HashMap::new()
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| {
                let list = neighbors.remove(&row.grid_id).unwrap_or_default();
                GridPoint {
                    neighbors: select_neighbors(list, max_km, max_stations),
                    id: row.grid_id,
                    lat: row.lat,
                    lon: row.lon,
                    primary_station_id: row.station_id,
                }
            })
            .collect())
    }
}
