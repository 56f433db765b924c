//! One full forecast run: every station, then every gridpoint.

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::forecast::{StationForecaster, StationOutcome};
use crate::inputs::InputSource;
use crate::propagate::{PropagationParams, collect_contributions, propagate};
use crate::stats::RunStats;
use crate::store::PredictionStore;
use crate::types::{PredictionRecord, SourceType, StationForecastSet};

const PROGRESS_EVERY: usize = 200;

/// Today's date in UTC, the default forecast date of a run.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn cap(limit: usize) -> usize {
    if limit == 0 { usize::MAX } else { limit }
}

/// Runs a bootstrap and never fails: errors are logged and recorded in the
/// returned stats. Rows written before the failure stay in the store.
pub async fn run_logged(
    settings: &Settings,
    inputs: &dyn InputSource,
    store: &dyn PredictionStore,
    forecast_date: NaiveDate,
) -> RunStats {
    let mut stats = RunStats::default();
    if let Err(e) = run_into(settings, inputs, store, forecast_date, &mut stats).await {
        error!(error = %format!("{e:#}"), "Forecast bootstrap failed");
        stats.error_message = Some(format!("{e:#}"));
        stats.finish();
    }
    stats
}

/// Runs a bootstrap, returning the first error encountered.
pub async fn run(
    settings: &Settings,
    inputs: &dyn InputSource,
    store: &dyn PredictionStore,
    forecast_date: NaiveDate,
) -> Result<RunStats> {
    let mut stats = RunStats::default();
    run_into(settings, inputs, store, forecast_date, &mut stats).await?;
    Ok(stats)
}

#[tracing::instrument(skip_all, fields(forecast_date = %forecast_date))]
async fn run_into(
    settings: &Settings,
    inputs: &dyn InputSource,
    store: &dyn PredictionStore,
    forecast_date: NaiveDate,
    stats: &mut RunStats,
) -> Result<()> {
    if !settings.bootstrap_enabled {
        info!("Forecast bootstrap disabled via ML_BOOTSTRAP_ENABLED");
        return Ok(());
    }

    let truth_date = inputs
        .latest_history_date()
        .await?
        .unwrap_or(forecast_date - Duration::days(1));
    *stats = RunStats::start(forecast_date, truth_date);
    info!(truth_date = %truth_date, "Bootstrapping forecasts for stations and gridpoints");

    let since = truth_date - Duration::days(i64::from(settings.history_days) - 1);
    let history = inputs.station_history(since).await?;
    let coords = inputs.station_coords().await?;
    let current_temps = inputs.current_temps().await.unwrap_or_else(|e| {
        warn!(error = %e, "Current temperatures unavailable, forecasting without bias");
        HashMap::new()
    });

    let days = settings.horizon_days;
    let forecaster = StationForecaster::new(&settings.ensemble(), days, settings.min_rows);
    let mut in_memory: HashMap<String, StationForecastSet> = HashMap::new();

    for (station_id, rows) in history.iter().take(cap(settings.station_limit)) {
        stats.stations_seen += 1;
        if stats.stations_seen % PROGRESS_EVERY == 0 {
            stats.log_progress();
        }

        let location = coords.get(station_id);
        if settings.skip_existing
            && location.is_some()
            && store
                .exists(SourceType::Station, station_id, forecast_date, days)
                .await?
        {
            debug!(station_id = %station_id, "Station forecast already stored");
            stats.stations_existing += 1;
            continue;
        }

        let current = current_temps.get(station_id).copied();
        let set = match forecaster.forecast(station_id, rows, current, forecast_date) {
            StationOutcome::Forecast(set) => set,
            StationOutcome::NoSeries => {
                stats.stations_no_series += 1;
                continue;
            }
            StationOutcome::EmptyEnsemble => {
                stats.stations_empty_ensemble += 1;
                continue;
            }
        };
        stats.stations_forecast += 1;

        match location {
            Some(c) => {
                for point in &set.points {
                    let record =
                        PredictionRecord::from_point(SourceType::Station, station_id, c.lat, c.lon, point);
                    store.upsert(&record).await?;
                    stats.station_points_stored += 1;
                }
            }
            None => {
                debug!(station_id = %station_id, "Station has no coordinates, not stored");
                stats.stations_unlocated += 1;
            }
        }
        in_memory.insert(station_id.clone(), set);
    }

    let params = PropagationParams {
        forecast_date,
        truth_date,
        max_km: settings.max_km,
        normalization: settings.weight_normalization,
    };
    let gridpoints = inputs
        .gridpoints(settings.max_km, settings.max_stations)
        .await?;

    for grid in gridpoints.iter().take(cap(settings.grid_limit)) {
        stats.gridpoints_seen += 1;
        if settings.skip_existing
            && store
                .exists(SourceType::Gridpoint, &grid.id, forecast_date, days)
                .await?
        {
            stats.gridpoints_existing += 1;
            continue;
        }

        let contributions =
            collect_contributions(grid, &in_memory, store, forecast_date, days).await?;
        let Some(forecast) = propagate(grid, &contributions, &params) else {
            debug!(grid_id = %grid.id, "No contributing stations");
            stats.gridpoints_no_contributors += 1;
            continue;
        };

        stats.gridpoints_forecast += 1;
        for record in forecast.records() {
            store.upsert(&record).await?;
            stats.grid_points_stored += 1;
        }
    }

    stats.finish();
    stats.log_summary();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::InputSnapshot;
    use crate::store::MemoryStore;
    use crate::types::{Coordinates, ForecastPoint, GridPoint, Neighbor, StationObservation};
    use async_trait::async_trait;
    use std::f64::consts::PI;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn forecast_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 15).unwrap()
    }

    fn history(days: usize, offset: f64) -> Vec<StationObservation> {
        let end = forecast_date() - Duration::days(1);
        (0..days)
            .map(|i| {
                let date = end - Duration::days((days - 1 - i) as i64);
                let tmean = offset + 10.0 * (2.0 * PI * i as f64 / 365.25).cos();
                StationObservation::new(date, tmean + 5.0, tmean - 5.0, Some(0.0))
            })
            .collect()
    }

    fn settings() -> Settings {
        Settings {
            gpr_enabled: false,
            horizon_days: 3,
            ..Settings::default()
        }
    }

    fn snapshot() -> InputSnapshot {
        let mut inputs = InputSnapshot::default();
        inputs.history.insert("A".into(), history(120, 10.0));
        inputs.history.insert("B".into(), history(120, 20.0));
        inputs.history.insert("SHORT".into(), history(5, 0.0));
        inputs.coords.insert("A".into(), Coordinates { lat: 40.0, lon: -105.0 });
        inputs.coords.insert("SHORT".into(), Coordinates { lat: 41.0, lon: -104.0 });
        inputs.gridpoints = vec![
            GridPoint {
                id: "G-AB".into(),
                lat: 40.05,
                lon: -105.05,
                primary_station_id: Some("A".into()),
                neighbors: vec![
                    Neighbor { station_id: "A".into(), distance_km: Some(1.0) },
                    Neighbor { station_id: "B".into(), distance_km: Some(4.0) },
                ],
            },
            GridPoint {
                id: "G-LONELY".into(),
                lat: 45.0,
                lon: -100.0,
                primary_station_id: None,
                neighbors: vec![],
            },
        ];
        inputs
    }

    #[tokio::test]
    async fn test_disabled_run_is_noop() {
        let store = MemoryStore::new();
        let settings = Settings {
            bootstrap_enabled: false,
            ..settings()
        };
        let stats = run(&settings, &snapshot(), &store, forecast_date()).await.unwrap();
        assert_eq!(stats, RunStats::default());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_full_run_counts() {
        let store = MemoryStore::new();
        let stats = run(&settings(), &snapshot(), &store, forecast_date()).await.unwrap();

        assert_eq!(stats.truth_date, Some(forecast_date() - Duration::days(1)));
        assert_eq!(stats.stations_seen, 3);
        assert_eq!(stats.stations_forecast, 2);
        assert_eq!(stats.stations_no_series, 1);
        assert_eq!(stats.stations_unlocated, 1);
        // two ridge variants × three days, only station A is located
        assert_eq!(stats.station_points_stored, 6);
        assert_eq!(stats.gridpoints_forecast, 1);
        assert_eq!(stats.gridpoints_no_contributors, 1);
        assert_eq!(stats.grid_points_stored, 6);

        let grid_rows: Vec<_> = store
            .records()
            .await
            .into_iter()
            .filter(|r| r.source_type == SourceType::Gridpoint)
            .collect();
        assert!(grid_rows.iter().all(|r| r.model_detail.starts_with("cluster km<=5 stations=2")));
    }

    #[tokio::test]
    async fn test_second_run_skips_existing() {
        let store = MemoryStore::new();
        run(&settings(), &snapshot(), &store, forecast_date()).await.unwrap();
        let rows = store.len().await;

        let stats = run(&settings(), &snapshot(), &store, forecast_date()).await.unwrap();
        assert_eq!(stats.stations_existing, 1);
        assert_eq!(stats.gridpoints_existing, 1);
        assert_eq!(store.len().await, rows);
    }

    #[tokio::test]
    async fn test_limits_cap_work() {
        let store = MemoryStore::new();
        let settings = Settings {
            station_limit: 1,
            grid_limit: 1,
            ..settings()
        };
        let stats = run(&settings, &snapshot(), &store, forecast_date()).await.unwrap();
        assert_eq!(stats.stations_seen, 1);
        assert_eq!(stats.gridpoints_seen, 1);
    }

    /// Accepts a fixed number of writes, then fails.
    struct FlakyStore {
        inner: MemoryStore,
        writes_left: AtomicUsize,
    }

    #[async_trait]
    impl PredictionStore for FlakyStore {
        async fn exists(
            &self,
            source_type: SourceType,
            source_id: &str,
            as_of: NaiveDate,
            days: u32,
        ) -> Result<bool> {
            self.inner.exists(source_type, source_id, as_of, days).await
        }

        async fn upsert(&self, record: &PredictionRecord) -> Result<i64> {
            if self.writes_left.fetch_sub(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("connection reset");
            }
            self.inner.upsert(record).await
        }

        async fn load(
            &self,
            source_type: SourceType,
            source_id: &str,
            as_of: NaiveDate,
            days: u32,
        ) -> Result<Vec<ForecastPoint>> {
            self.inner.load(source_type, source_id, as_of, days).await
        }
    }

    #[tokio::test]
    async fn test_failure_keeps_written_rows() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            writes_left: AtomicUsize::new(4),
        };
        let stats = run_logged(&settings(), &snapshot(), &store, forecast_date()).await;
        assert!(stats.error_message.unwrap().contains("connection reset"));
        assert_eq!(stats.station_points_stored, 4);
        assert_eq!(store.inner.len().await, 4);
    }
}
