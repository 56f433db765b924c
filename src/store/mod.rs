//! Idempotent persistence of forecast rows.
//!
//! [`PredictionStore`] is the async trait the orchestrator writes through.
//! [`MemoryStore`] keeps rows in process (optionally backed by a CSV file);
//! [`PgStore`] writes to PostgreSQL.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgStore, connect_pool};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::types::{ForecastPoint, PredictionRecord, SourceType};

/// Day slots `0, 24, …, (days - 1) * 24` covered by a `days`-long forecast.
pub fn horizon_slots(days: u32) -> impl Iterator<Item = i32> {
    (0..days as i32).map(|d| d * 24)
}

/// Durable storage of [`PredictionRecord`]s.
///
/// Rows are unique on `(source_type, source_id, lat, lon, as_of, horizon_hours)`;
/// writing the same key again overwrites every value field.
#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Whether every day slot of a `days`-long forecast has at least one row.
    async fn exists(
        &self,
        source_type: SourceType,
        source_id: &str,
        as_of: NaiveDate,
        days: u32,
    ) -> Result<bool>;

    /// Inserts or overwrites a row and returns its id. Ids are stable across
    /// overwrites of the same key.
    async fn upsert(&self, record: &PredictionRecord) -> Result<i64>;

    /// Rows for the given source and date, ordered by horizon.
    async fn load(
        &self,
        source_type: SourceType,
        source_id: &str,
        as_of: NaiveDate,
        days: u32,
    ) -> Result<Vec<ForecastPoint>>;
}
