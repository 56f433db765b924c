use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{FromRow, PgPool, postgres::PgPoolOptions};
use tracing::debug;

use super::PredictionStore;
use crate::types::{ForecastPoint, PredictionRecord, SourceType};

/// Opens a small connection pool to `database_url`.
pub async fn connect_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to PostgreSQL")
}

/// Forecast rows in the `ml_weather_prediction` table.
///
/// The table and its unique index on
/// `(source_type, source_id, lat, lon, as_of_date, horizon_hours)` are
/// managed outside this crate.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct PointRow {
    as_of_date: NaiveDate,
    horizon_hours: i32,
    tmean_c: f64,
    prcp_mm: Option<f64>,
    tmin_c: Option<f64>,
    tmax_c: Option<f64>,
    delta_c: Option<f64>,
    model_name: String,
    model_detail: Option<String>,
    confidence: Option<f64>,
}

impl From<PointRow> for ForecastPoint {
    fn from(row: PointRow) -> Self {
        let tmin_c = row.tmin_c.unwrap_or(row.tmean_c);
        let tmax_c = row.tmax_c.unwrap_or(row.tmean_c);
        ForecastPoint {
            date: row.as_of_date + chrono::Duration::days(i64::from(row.horizon_hours / 24)),
            as_of: row.as_of_date,
            horizon_hours: row.horizon_hours,
            tmin_c,
            tmax_c,
            tmean_c: row.tmean_c,
            prcp_mm: row.prcp_mm.unwrap_or(0.0),
            delta_c: row.delta_c.unwrap_or(tmax_c - tmin_c),
            model_name: row.model_name,
            model_detail: row.model_detail.unwrap_or_default(),
            confidence: row.confidence.unwrap_or(0.1),
        }
    }
}

impl PgStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PredictionStore for PgStore {
    #[tracing::instrument(skip(self, source_type), fields(source_type = %source_type))]
    async fn exists(
        &self,
        source_type: SourceType,
        source_id: &str,
        as_of: NaiveDate,
        days: u32,
    ) -> Result<bool> {
        let slots: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT horizon_hours) FROM ml_weather_prediction \
             WHERE source_type = $1 AND source_id = $2 AND as_of_date = $3 \
             AND horizon_hours BETWEEN 0 AND (($4 - 1) * 24) \
             AND horizon_hours % 24 = 0",
        )
        .bind(source_type.as_str())
        .bind(source_id)
        .bind(as_of)
        .bind(days as i32)
        .fetch_one(&self.pool)
        .await
        .context("forecast existence query failed")?;

        Ok(slots >= i64::from(days))
    }

    async fn upsert(&self, record: &PredictionRecord) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO ml_weather_prediction (
                source_type, source_id, lat, lon, as_of_date, horizon_hours,
                tmean_c, prcp_mm, model_name,
                tmin_c, tmax_c, delta_c, model_detail, confidence, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9,
                $10, $11, $12, $13, $14, now()
            )
            ON CONFLICT (source_type, source_id, lat, lon, as_of_date, horizon_hours)
            DO UPDATE SET
                tmean_c = EXCLUDED.tmean_c,
                prcp_mm = EXCLUDED.prcp_mm,
                model_name = EXCLUDED.model_name,
                tmin_c = EXCLUDED.tmin_c,
                tmax_c = EXCLUDED.tmax_c,
                delta_c = EXCLUDED.delta_c,
                model_detail = EXCLUDED.model_detail,
                confidence = EXCLUDED.confidence,
                created_at = now()
            RETURNING id::BIGINT
            "#,
        )
        .bind(record.source_type.as_str())
        .bind(&record.source_id)
        .bind(record.lat)
        .bind(record.lon)
        .bind(record.as_of)
        .bind(record.horizon_hours)
        .bind(record.tmean_c)
        .bind(record.prcp_mm)
        .bind(&record.model_name)
        .bind(record.tmin_c)
        .bind(record.tmax_c)
        .bind(record.delta_c)
        .bind(&record.model_detail)
        .bind(record.confidence)
        .fetch_one(&self.pool)
        .await
        .with_context(|| {
            format!(
                "upsert failed for {} {} horizon {}",
                record.source_type, record.source_id, record.horizon_hours
            )
        })?;

        debug!(
            id,
            source_type = %record.source_type,
            source_id = %record.source_id,
            horizon_hours = record.horizon_hours,
            "Stored prediction"
        );
        Ok(id)
    }

    #[tracing::instrument(skip(self, source_type), fields(source_type = %source_type))]
    async fn load(
        &self,
        source_type: SourceType,
        source_id: &str,
        as_of: NaiveDate,
        days: u32,
    ) -> Result<Vec<ForecastPoint>> {
        let rows = sqlx::query_as::<_, PointRow>(
            "SELECT as_of_date, horizon_hours, tmean_c, prcp_mm, tmin_c, tmax_c, delta_c, \
             model_name, model_detail, confidence \
             FROM ml_weather_prediction \
             WHERE source_type = $1 AND source_id = $2 AND as_of_date = $3 \
             AND horizon_hours BETWEEN 0 AND (($4 - 1) * 24) \
             ORDER BY horizon_hours ASC, model_name ASC",
        )
        .bind(source_type.as_str())
        .bind(source_id)
        .bind(as_of)
        .bind(days as i32)
        .fetch_all(&self.pool)
        .await
        .context("forecast load query failed")?;

        Ok(rows.into_iter().map(ForecastPoint::from).collect())
    }
}
