//! Shifts model output toward a live temperature observation.

/// Bias weight of the primary (periodic) model.
pub const PRIMARY_BIAS_WEIGHT: f64 = 0.6;
/// Bias weight of every secondary model.
pub const SECONDARY_BIAS_WEIGHT: f64 = 0.4;

/// Temperatures after bias correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustedTemps {
    pub tmin_c: f64,
    pub tmax_c: f64,
    pub tmean_c: f64,
    pub delta_c: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasAdjuster {
    weight: f64,
}

impl BiasAdjuster {
    pub fn new(weight: f64) -> Self {
        Self { weight }
    }

    /// `(current − last7_mean) × weight`, or 0 without a usable observation.
    pub fn bias(&self, current_temp_c: Option<f64>, last7_mean: Option<f64>) -> f64 {
        match (current_temp_c, last7_mean) {
            (Some(current), Some(mean)) if current.is_finite() && mean.is_finite() => {
                (current - mean) * self.weight
            }
            _ => 0.0,
        }
    }

    /// Adds `bias` to both extremes, restores `tmin <= tmax` and recomputes
    /// the derived values.
    pub fn apply(&self, tmin_c: f64, tmax_c: f64, bias: f64) -> AdjustedTemps {
        let mut tmin = tmin_c + bias;
        let mut tmax = tmax_c + bias;
        if tmin > tmax {
            std::mem::swap(&mut tmin, &mut tmax);
        }
        AdjustedTemps {
            tmin_c: tmin,
            tmax_c: tmax,
            tmean_c: (tmin + tmax) / 2.0,
            delta_c: tmax - tmin,
        }
    }
}
