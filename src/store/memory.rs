use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use csv::WriterBuilder;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{PredictionStore, horizon_slots};
use crate::types::{ForecastPoint, PredictionRecord, SourceType};

/// Conflict key. Coordinates are compared by bit pattern.
type RowKey = (SourceType, String, u64, u64, NaiveDate, i32);

fn row_key(record: &PredictionRecord) -> RowKey {
    (
        record.source_type,
        record.source_id.clone(),
        record.lat.to_bits(),
        record.lon.to_bits(),
        record.as_of,
        record.horizon_hours,
    )
}

#[derive(Debug, Default)]
struct Rows {
    by_key: BTreeMap<RowKey, (i64, PredictionRecord)>,
    next_id: i64,
}

impl Rows {
    fn matching(
        &self,
        source_type: SourceType,
        source_id: &str,
        as_of: NaiveDate,
        days: u32,
    ) -> impl Iterator<Item = &PredictionRecord> {
        let max_horizon = (days as i32 - 1) * 24;
        let id = source_id.to_string();
        let lo: RowKey = (source_type, id.clone(), 0, 0, NaiveDate::MIN, i32::MIN);
        let hi: RowKey = (source_type, id, u64::MAX, u64::MAX, NaiveDate::MAX, i32::MAX);
        self.by_key
            .range(lo..=hi)
            .map(|(_, (_, r))| r)
            .filter(move |r| r.as_of == as_of && (0..=max_horizon).contains(&r.horizon_hours))
    }

    fn insert(&mut self, record: PredictionRecord) -> i64 {
        match self.by_key.get_mut(&row_key(&record)) {
            Some((id, existing)) => {
                *existing = record;
                *id
            }
            None => {
                self.next_id += 1;
                let id = self.next_id;
                self.by_key.insert(row_key(&record), (id, record));
                id
            }
        }
    }
}

/// In-process store. Can be seeded from and saved to a CSV file so forecasts
/// survive between runs without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Rows>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads rows written by [`MemoryStore::save_csv`]. A missing file yields
    /// an empty store.
    pub fn from_csv(path: &str) -> Result<Self> {
        let mut rows = Rows::default();
        if Path::new(path).exists() {
            let mut reader = csv::Reader::from_path(path)
                .with_context(|| format!("failed to open store file '{path}'"))?;
            for record in reader.deserialize::<PredictionRecord>() {
                rows.insert(record.with_context(|| format!("bad row in '{path}'"))?);
            }
            info!(path, rows = rows.by_key.len(), "Store file loaded");
        } else {
            debug!(path, "Store file not found, starting empty");
        }
        Ok(Self {
            rows: Mutex::new(rows),
        })
    }

    /// Overwrites `path` with every row, in key order.
    pub async fn save_csv(&self, path: &str) -> Result<()> {
        let rows = self.rows.lock().await;
        let mut writer = WriterBuilder::new()
            .has_headers(true)
            .from_path(path)
            .with_context(|| format!("failed to create store file '{path}'"))?;
        for (_, record) in rows.by_key.values() {
            writer.serialize(record)?;
        }
        writer.flush()?;
        info!(path, rows = rows.by_key.len(), "Store file saved");
        Ok(())
    }

    /// Snapshot of every row, in key order.
    pub async fn records(&self) -> Vec<PredictionRecord> {
        let rows = self.rows.lock().await;
        rows.by_key.values().map(|(_, r)| r.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.by_key.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PredictionStore for MemoryStore {
    async fn exists(
        &self,
        source_type: SourceType,
        source_id: &str,
        as_of: NaiveDate,
        days: u32,
    ) -> Result<bool> {
        let rows = self.rows.lock().await;
        let present: HashSet<i32> = rows
            .matching(source_type, source_id, as_of, days)
            .map(|r| r.horizon_hours)
            .collect();
        Ok(horizon_slots(days).all(|h| present.contains(&h)))
    }

    async fn upsert(&self, record: &PredictionRecord) -> Result<i64> {
        let mut record = record.clone();
        record.written_at = Utc::now();
        let id = self.rows.lock().await.insert(record);
        Ok(id)
    }

    async fn load(
        &self,
        source_type: SourceType,
        source_id: &str,
        as_of: NaiveDate,
        days: u32,
    ) -> Result<Vec<ForecastPoint>> {
        let rows = self.rows.lock().await;
        let mut points: Vec<ForecastPoint> = rows
            .matching(source_type, source_id, as_of, days)
            .map(PredictionRecord::to_point)
            .collect();
        points.sort_by(|a, b| {
            a.horizon_hours
                .cmp(&b.horizon_hours)
                .then_with(|| a.model_name.cmp(&b.model_name))
        });
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ForecastPoint;
    use std::env;
    use std::fs;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
    }

    fn record(horizon_hours: i32, tmean_c: f64) -> PredictionRecord {
        let point = ForecastPoint {
            date: as_of() + chrono::Duration::days(i64::from(horizon_hours / 24)),
            as_of: as_of(),
            horizon_hours,
            tmin_c: tmean_c - 4.0,
            tmax_c: tmean_c + 4.0,
            tmean_c,
            prcp_mm: 0.0,
            delta_c: 8.0,
            model_name: "ridge-v1".into(),
            model_detail: "detail".into(),
            confidence: 0.7,
        };
        PredictionRecord::from_point(SourceType::Station, "USW0001", 39.7, -104.9, &point)
    }

    #[tokio::test]
    async fn test_double_upsert_keeps_second_values() {
        let store = MemoryStore::new();
        let first = store.upsert(&record(0, 10.0)).await.unwrap();
        let second = store.upsert(&record(0, 14.0)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len().await, 1);
        let rows = store.records().await;
        assert_eq!(rows[0].tmean_c, 14.0);
    }

    #[tokio::test]
    async fn test_exists_requires_every_slot() {
        let store = MemoryStore::new();
        for h in [0, 24, 72] {
            store.upsert(&record(h, 10.0)).await.unwrap();
        }
        assert!(!store.exists(SourceType::Station, "USW0001", as_of(), 4).await.unwrap());
        assert!(store.exists(SourceType::Station, "USW0001", as_of(), 2).await.unwrap());

        store.upsert(&record(48, 10.0)).await.unwrap();
        assert!(store.exists(SourceType::Station, "USW0001", as_of(), 4).await.unwrap());
        assert!(!store.exists(SourceType::Gridpoint, "USW0001", as_of(), 4).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_sorted_and_windowed() {
        let store = MemoryStore::new();
        for h in [48, 0, 24, 96] {
            store.upsert(&record(h, f64::from(h))).await.unwrap();
        }
        let points = store
            .load(SourceType::Station, "USW0001", as_of(), 3)
            .await
            .unwrap();
        let horizons: Vec<i32> = points.iter().map(|p| p.horizon_hours).collect();
        assert_eq!(horizons, vec![0, 24, 48]);
        assert_eq!(points[2].date, as_of() + chrono::Duration::days(2));
    }

    #[tokio::test]
    async fn test_lookup_limited_to_one_source() {
        let store = MemoryStore::new();
        for (source_type, id) in [
            (SourceType::Station, "USW000"),
            (SourceType::Station, "USW00010"),
            (SourceType::Gridpoint, "USW0001"),
        ] {
            let mut other = record(0, 99.0);
            other.source_type = source_type;
            other.source_id = id.into();
            store.upsert(&other).await.unwrap();
        }
        store.upsert(&record(0, 10.0)).await.unwrap();
        let mut moved = record(24, 11.0);
        moved.lat = 40.1;
        store.upsert(&moved).await.unwrap();

        let points = store
            .load(SourceType::Station, "USW0001", as_of(), 2)
            .await
            .unwrap();
        let temps: Vec<f64> = points.iter().map(|p| p.tmean_c).collect();
        assert_eq!(temps, vec![10.0, 11.0]);
        assert!(store.exists(SourceType::Station, "USW0001", as_of(), 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_csv_round_trip() {
        let path = format!("{}/wx_forecast_store_test.csv", env::temp_dir().display());
        let _ = fs::remove_file(&path);

        let store = MemoryStore::from_csv(&path).unwrap();
        assert!(store.is_empty().await);
        store.upsert(&record(0, 11.5)).await.unwrap();
        store.upsert(&record(24, 12.5)).await.unwrap();
        store.save_csv(&path).await.unwrap();

        let reloaded = MemoryStore::from_csv(&path).unwrap();
        assert_eq!(reloaded.records().await, store.records().await);

        fs::remove_file(&path).unwrap();
    }
}
