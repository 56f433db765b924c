//! Recency- and uncertainty-based forecast confidence.

use chrono::NaiveDate;

pub const MIN_CONFIDENCE: f64 = 0.1;
pub const MAX_CONFIDENCE: f64 = 1.0;

/// Days after which stale history alone drives confidence to the floor.
const STALENESS_DAYS: f64 = 30.0;
const LIVE_OBSERVATION_BONUS: f64 = 0.1;

/// Confidence before any model-specific discount.
///
/// Decays linearly with the days between the last observation and the
/// forecast date, and gains a small bonus when a live reading is available.
pub fn base_confidence(
    as_of: NaiveDate,
    last_truth_date: NaiveDate,
    current_temp_c: Option<f64>,
) -> f64 {
    let days_since_truth = (as_of - last_truth_date).num_days().max(0) as f64;
    let mut confidence = (1.0 - days_since_truth / STALENESS_DAYS).max(MIN_CONFIDENCE);
    if current_temp_c.is_some_and(f64::is_finite) {
        confidence += LIVE_OBSERVATION_BONUS;
    }
    confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

/// Lowers `base` by a model's own uncertainty, `min(cap, uncertainty/scale)`.
pub fn discount(base: f64, uncertainty: f64, cap: f64, scale: f64) -> f64 {
    let penalty = if uncertainty.is_finite() && scale > 0.0 {
        (uncertainty.max(0.0) / scale).min(cap)
    } else {
        0.0
    };
    (base - penalty).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}
