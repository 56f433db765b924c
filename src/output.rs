//! CSV export of forecast points and run statistics.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::{debug, info};

use crate::stats::RunStats;
use crate::types::ForecastPoint;

/// Logs a forecast set as pretty-printed JSON.
pub fn print_json(points: &[ForecastPoint]) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(points)?);
    Ok(())
}

/// Appends `rows` to a CSV file, writing the header only when the file is
/// created.
pub fn append_records<T: Serialize>(path: &str, rows: &[T]) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, rows = rows.len(), "Appending CSV records");

    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("failed to open '{path}'"))?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}

/// Appends one forecast point per row.
pub fn append_forecast(path: &str, points: &[ForecastPoint]) -> Result<()> {
    append_records(path, points)
}

/// Appends a run summary row.
pub fn append_run_stats(path: &str, stats: &RunStats) -> Result<()> {
    append_records(path, std::slice::from_ref(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    fn point(horizon_hours: i32) -> ForecastPoint {
        let as_of = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        ForecastPoint {
            date: as_of + chrono::Duration::days(i64::from(horizon_hours / 24)),
            as_of,
            horizon_hours,
            tmin_c: 1.0,
            tmax_c: 11.0,
            tmean_c: 6.0,
            prcp_mm: 0.5,
            delta_c: 10.0,
            model_name: "ridge-v1".into(),
            model_detail: "detail".into(),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&[point(0)]).unwrap();
    }

    #[test]
    fn test_append_forecast_writes_header_once() {
        let path = temp_path("wx_forecast_test_header.csv");
        let _ = fs::remove_file(&path);

        append_forecast(&path, &[point(0), point(24)]).unwrap();
        append_forecast(&path, &[point(48)]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let header_count = content.lines().filter(|l| l.contains("horizon_hours")).count();
        assert_eq!(header_count, 1);
        assert_eq!(content.lines().count(), 4);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_append_run_stats_creates_file() {
        let path = temp_path("wx_forecast_test_stats.csv");
        let _ = fs::remove_file(&path);

        append_run_stats(&path, &RunStats::default()).unwrap();

        assert!(Path::new(&path).exists());
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("started_at,"));

        fs::remove_file(&path).unwrap();
    }
}
