use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

/// Counters of one bootstrap run.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RunStats {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub forecast_date: Option<NaiveDate>,
    pub truth_date: Option<NaiveDate>,

    // stations
    pub stations_seen: usize,
    pub stations_forecast: usize,
    pub station_points_stored: usize,
    pub stations_no_series: usize,
    pub stations_empty_ensemble: usize,
    pub stations_existing: usize,
    pub stations_unlocated: usize,

    // gridpoints
    pub gridpoints_seen: usize,
    pub gridpoints_forecast: usize,
    pub grid_points_stored: usize,
    pub gridpoints_no_contributors: usize,
    pub gridpoints_existing: usize,

    pub error_message: Option<String>,
}

impl RunStats {
    pub fn start(forecast_date: NaiveDate, truth_date: NaiveDate) -> Self {
        Self {
            started_at: Some(Utc::now()),
            forecast_date: Some(forecast_date),
            truth_date: Some(truth_date),
            ..Default::default()
        }
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    pub fn stations_skipped(&self) -> usize {
        self.stations_no_series + self.stations_empty_ensemble + self.stations_existing
    }

    pub fn gridpoints_skipped(&self) -> usize {
        self.gridpoints_no_contributors + self.gridpoints_existing
    }

    /// Share of seen stations that produced a forecast this run.
    pub fn station_coverage_pct(&self) -> f64 {
        Self::pct(self.stations_forecast, self.stations_seen)
    }

    pub fn log_progress(&self) {
        info!(
            stations_seen = self.stations_seen,
            station_points = self.station_points_stored,
            skipped = self.stations_skipped(),
            "Forecast bootstrap progress"
        );
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn log_summary(&self) {
        info!(
            station_points = self.station_points_stored,
            grid_points = self.grid_points_stored,
            stations_forecast = self.stations_forecast,
            stations_no_series = self.stations_no_series,
            stations_empty_ensemble = self.stations_empty_ensemble,
            stations_existing = self.stations_existing,
            stations_unlocated = self.stations_unlocated,
            gridpoints_forecast = self.gridpoints_forecast,
            gridpoints_no_contributors = self.gridpoints_no_contributors,
            gridpoints_existing = self.gridpoints_existing,
            coverage_pct = %format!("{:.1}", self.station_coverage_pct()),
            "Forecast bootstrap complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pct_with_zero_total() {
        assert_eq!(RunStats::pct(10, 0), 0.0);
    }

    #[test]
    fn test_pct_normal_values() {
        assert_eq!(RunStats::pct(50, 100), 50.0);
        assert_eq!(RunStats::pct(1, 4), 25.0);
    }

    #[test]
    fn test_skip_totals() {
        let stats = RunStats {
            stations_seen: 10,
            stations_forecast: 6,
            stations_no_series: 2,
            stations_empty_ensemble: 1,
            stations_existing: 1,
            gridpoints_no_contributors: 3,
            gridpoints_existing: 2,
            ..Default::default()
        };
        assert_eq!(stats.stations_skipped(), 4);
        assert_eq!(stats.gridpoints_skipped(), 5);
        assert_eq!(stats.station_coverage_pct(), 60.0);
    }

    #[test]
    fn test_start_and_finish_stamp_times() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let mut stats = RunStats::start(day, day.pred_opt().unwrap());
        assert!(stats.started_at.is_some());
        assert!(stats.finished_at.is_none());
        stats.finish();
        assert!(stats.finished_at >= stats.started_at);
    }
}
