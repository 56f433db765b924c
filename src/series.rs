//! Cleaned, date-ordered daily series for one station.

use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::debug;

use crate::types::StationObservation;

/// Default number of cleaned rows a station needs before it is forecast.
pub const DEFAULT_MIN_ROWS: usize = 30;

/// Aligned daily arrays for one station, ordered by date.
///
/// Built once per run with [`StationSeries::from_rows`] and never mutated;
/// [`StationSeries::downsample`] returns a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct StationSeries {
    dates: Vec<NaiveDate>,
    tmin_c: Vec<f64>,
    tmax_c: Vec<f64>,
    prcp_mm: Vec<f64>,
    tmean_c: Vec<f64>,
}

impl StationSeries {
    /// Cleans raw rows into a series.
    ///
    /// Rows without a date or a finite tmax and tmin are dropped. Missing
    /// or non-finite precipitation counts as 0. When several rows share a date the first
    /// one in input order is kept. Returns `None` when fewer than
    /// `min_rows` rows survive.
    pub fn from_rows(rows: &[StationObservation], min_rows: usize) -> Option<Self> {
        let mut seen = HashSet::new();
        let mut duplicates = 0usize;
        let mut cleaned: Vec<(NaiveDate, f64, f64, f64)> = Vec::with_capacity(rows.len());

        for row in rows {
            let finite = |v: Option<f64>| v.filter(|v| v.is_finite());
            let (Some(date), Some(tmax), Some(tmin)) = (row.date, finite(row.tmax_c), finite(row.tmin_c))
            else {
                continue;
            };
            if !seen.insert(date) {
                duplicates += 1;
                continue;
            }
            cleaned.push((date, tmax, tmin, finite(row.prcp_mm).unwrap_or(0.0)));
        }

        if duplicates > 0 {
            debug!(duplicates, "Dropped duplicate history dates");
        }
        if cleaned.is_empty() || cleaned.len() < min_rows {
            return None;
        }

        cleaned.sort_by_key(|r| r.0);

        let n = cleaned.len();
        let mut series = StationSeries {
            dates: Vec::with_capacity(n),
            tmin_c: Vec::with_capacity(n),
            tmax_c: Vec::with_capacity(n),
            prcp_mm: Vec::with_capacity(n),
            tmean_c: Vec::with_capacity(n),
        };
        for (date, tmax, tmin, prcp) in cleaned {
            series.dates.push(date);
            series.tmax_c.push(tmax);
            series.tmin_c.push(tmin);
            series.prcp_mm.push(prcp);
            series.tmean_c.push((tmax + tmin) / 2.0);
        }
        Some(series)
    }

    /// Keeps at most `max_points` rows at evenly spaced indices. The first
    /// and last rows are retained, except that a single point keeps only the
    /// most recent row.
    pub fn downsample(&self, max_points: usize) -> StationSeries {
        let n = self.len();
        if n <= max_points || max_points == 0 {
            return self.clone();
        }
        let idx: Vec<usize> = if max_points == 1 {
            vec![n - 1]
        } else {
            (0..max_points)
                .map(|i| i * (n - 1) / (max_points - 1))
                .collect()
        };

        let pick = |values: &[f64]| idx.iter().map(|&i| values[i]).collect::<Vec<_>>();
        StationSeries {
            dates: idx.iter().map(|&i| self.dates[i]).collect(),
            tmin_c: pick(&self.tmin_c),
            tmax_c: pick(&self.tmax_c),
            prcp_mm: pick(&self.prcp_mm),
            tmean_c: pick(&self.tmean_c),
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn tmin_c(&self) -> &[f64] {
        &self.tmin_c
    }

    pub fn tmax_c(&self) -> &[f64] {
        &self.tmax_c
    }

    pub fn prcp_mm(&self) -> &[f64] {
        &self.prcp_mm
    }

    pub fn tmean_c(&self) -> &[f64] {
        &self.tmean_c
    }

    pub fn first_date(&self) -> NaiveDate {
        self.dates[0]
    }

    /// Date of the most recent observation ("truth" for this station).
    pub fn last_date(&self) -> NaiveDate {
        self.dates[self.dates.len() - 1]
    }
}
