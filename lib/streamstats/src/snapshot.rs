//! Immutable point-in-time copies of aggregate readings.

use crate::stats::LiveStats;

/// A named, immutable copy of every reading a [`LiveStats`] exposes.
///
/// Snapshots are plain values for reporting: once taken they never change, and they hold no
/// reference back to the aggregate. Mean, variance, skewness and kurtosis are `None` when the
/// underlying reading is NaN (zero observations), so serialized snapshots carry nulls instead of
/// non-finite floats.
///
/// Because the aggregate's accumulators and each percentile estimator are independent write units,
/// a snapshot taken under concurrent writers may skew by at most one pending insertion per unit.
///
/// # Features
///
/// With the `serde` cargo feature enabled, `Snapshot` derives `Serialize`/`Deserialize`. Every
/// field is copied out verbatim, so a round-trip through a lossless format preserves the exact
/// floating point readings.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Snapshot {
    /// The name of the statistic this snapshot was taken from.
    pub name: String,

    /// Exact lifetime observation count.
    pub n: u64,

    /// Decayed observation count.
    pub decayed_n: f64,

    /// Number of decay steps applied.
    pub decays: u64,

    /// Lifetime minimum; `+Inf` with no observations.
    pub min: f64,

    /// Lifetime maximum; `-Inf` with no observations.
    pub max: f64,

    /// Decayed minimum.
    pub decayed_min: f64,

    /// Decayed maximum.
    pub decayed_max: f64,

    /// Decayed mean, or `None` with no observations.
    pub mean: Option<f64>,

    /// Decayed population variance, or `None` with no observations.
    pub variance: Option<f64>,

    /// Decayed skewness.
    pub skewness: Option<f64>,

    /// Decayed excess kurtosis.
    pub kurtosis: Option<f64>,

    /// `(percentile, estimate)` pairs in configured order.
    pub quantiles: Vec<(f64, f64)>,
}

impl Snapshot {
    /// Copies the current readings of `stats` into an immutable snapshot.
    pub fn capture(name: impl Into<String>, stats: &LiveStats) -> Self {
        Self {
            name: name.into(),
            n: stats.num(),
            decayed_n: stats.decayed_num(),
            decays: stats.decay_count(),
            min: stats.minimum(),
            max: stats.maximum(),
            decayed_min: stats.decayed_minimum(),
            decayed_max: stats.decayed_maximum(),
            mean: nan_to_none(stats.mean()),
            variance: nan_to_none(stats.variance()),
            skewness: nan_to_none(stats.skewness()),
            kurtosis: nan_to_none(stats.kurtosis()),
            quantiles: stats.quantiles(),
        }
    }
}

fn nan_to_none(value: f64) -> Option<f64> {
    (!value.is_nan()).then_some(value)
}
