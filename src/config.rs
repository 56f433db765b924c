//! Environment-driven settings.

use std::fmt::Display;
use std::str::FromStr;
use tracing::warn;

use crate::models::EnsembleConfig;
use crate::propagate::WeightNormalization;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub horizon_days: u32,
    pub history_days: u32,
    pub min_rows: usize,
    pub gpr_enabled: bool,
    pub gpr_max_points: usize,
    pub gpr_restarts: usize,
    pub bootstrap_enabled: bool,
    /// 0 = every station.
    pub station_limit: usize,
    /// 0 = every gridpoint.
    pub grid_limit: usize,
    pub skip_existing: bool,
    pub max_km: f64,
    pub max_stations: usize,
    pub weight_normalization: WeightNormalization,
    /// 0 = only re-run on demand.
    pub interval_secs: u64,
    pub database_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            horizon_days: 11,
            history_days: 730,
            min_rows: 30,
            gpr_enabled: true,
            gpr_max_points: 80,
            gpr_restarts: 0,
            bootstrap_enabled: true,
            station_limit: 0,
            grid_limit: 0,
            skip_existing: true,
            max_km: 5.0,
            max_stations: 4,
            weight_normalization: WeightNormalization::Bucket,
            interval_secs: 0,
            database_url: None,
        }
    }
}

/// `1 true yes y on`, case-insensitive.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key).map_or(default, |v| is_truthy(&v))
    }

    fn parse<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + Display,
        T::Err: Display,
    {
        let Some(raw) = self.get(key) else {
            return default;
        };
        match raw.parse() {
            Ok(v) => v,
            Err(e) => {
                warn!(key, value = %raw, error = %e, %default, "Invalid setting, using default");
                default
            }
        }
    }

    /// Like [`Env::parse`], but values failing `valid` also fall back.
    fn parse_checked<T>(&self, key: &str, default: T, valid: impl Fn(&T) -> bool) -> T
    where
        T: FromStr + Display + Copy,
        T::Err: Display,
    {
        let value = self.parse(key, default);
        if valid(&value) {
            value
        } else {
            warn!(key, %value, %default, "Out-of-range setting, using default");
            default
        }
    }
}

impl Settings {
    /// Reads settings from the process environment. Call `dotenvy::dotenv()`
    /// first to pick up a `.env` file.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env { lookup };
        let d = Self::default();
        Self {
            horizon_days: env.parse_checked("ML_FORECAST_DAYS", d.horizon_days, |v| *v > 0),
            history_days: env.parse_checked("ML_HISTORY_DAYS", d.history_days, |v| *v > 0),
            min_rows: env.parse_checked("ML_MIN_ROWS", d.min_rows, |v| *v > 0),
            gpr_enabled: env.flag("ML_GPR_ENABLED", d.gpr_enabled),
            gpr_max_points: env.parse("ML_GPR_MAX_POINTS", d.gpr_max_points),
            gpr_restarts: env.parse("ML_GPR_RESTARTS", d.gpr_restarts),
            bootstrap_enabled: env.flag("ML_BOOTSTRAP_ENABLED", d.bootstrap_enabled),
            station_limit: env.parse("ML_BOOTSTRAP_STATION_LIMIT", d.station_limit),
            grid_limit: env.parse("ML_BOOTSTRAP_GRID_LIMIT", d.grid_limit),
            skip_existing: env.flag("ML_SKIP_EXISTING", d.skip_existing),
            max_km: env.parse_checked("GRID_MAX_KM", d.max_km, |v| v.is_finite() && *v > 0.0),
            max_stations: env.parse_checked("GRID_MAX_STATIONS", d.max_stations, |v| *v > 0),
            weight_normalization: env
                .get("GRID_WEIGHT_NORMALIZATION")
                .and_then(|raw| match raw.parse() {
                    Ok(v) => Some(v),
                    Err(e) => {
                        warn!(value = %raw, error = %e, "Invalid GRID_WEIGHT_NORMALIZATION, using bucket");
                        None
                    }
                })
                .unwrap_or(d.weight_normalization),
            interval_secs: env.parse("BOOTSTRAP_INTERVAL_SECS", d.interval_secs),
            database_url: env.get("DATABASE_URL"),
        }
    }

    pub fn ensemble(&self) -> EnsembleConfig {
        EnsembleConfig {
            gpr_enabled: self.gpr_enabled,
            gpr_max_points: self.gpr_max_points,
            gpr_restarts: self.gpr_restarts,
        }
    }
}
