//! Shared distribution generators and exact reference statistics for the correctness tests.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Normal};

pub const TEST_TILES: [f64; 7] = [0.25, 0.5, 0.75, 0.9, 0.99, 0.999, 0.9999];

pub fn rng() -> SmallRng {
    SmallRng::seed_from_u64(0xC0FFEE)
}

/// The integers `0..count`, shuffled.
pub fn uniform(count: usize) -> Vec<f64> {
    let mut data: Vec<f64> = (0..count).map(|i| i as f64).collect();
    data.shuffle(&mut rng());
    data
}

pub fn gaussian(count: usize) -> Vec<f64> {
    let normal = Normal::new(0.0, 1.0).expect("valid normal distribution");
    normal.sample_iter(rng()).take(count).collect()
}

pub fn exponential(count: usize, lambda: f64) -> Vec<f64> {
    let exp = Exp::new(lambda).expect("valid exponential distribution");
    exp.sample_iter(rng()).take(count).collect()
}

/// Maps a uniform draw in `[0, 1)` onto a triangular distribution.
pub fn triangular_value(base: f64, low: f64, high: f64, mode: f64) -> f64 {
    let pivot = (mode - low) / (high - low);
    if base <= pivot {
        low + (base * (high - low) * (mode - low)).sqrt()
    } else {
        high - ((1.0 - base) * (high - low) * (high - mode)).sqrt()
    }
}

pub fn triangular(count: usize, low: f64, high: f64, mode: f64) -> Vec<f64> {
    let mut rng = rng();
    (0..count).map(|_| triangular_value(rng.random::<f64>(), low, high, mode)).collect()
}

/// A 50/50 mixture of two triangular distributions.
pub fn bimodal(count: usize) -> Vec<f64> {
    let mut rng = rng();
    (0..count)
        .map(|_| {
            let base = rng.random::<f64>();
            if rng.random::<bool>() {
                triangular_value(base, 0.0, 1000.0, 500.0)
            } else {
                triangular_value(base, 500.0, 1500.0, 1400.0)
            }
        })
        .collect()
}

/// Exact statistics computed in two passes over the full sample.
pub struct Reference {
    pub n: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub variance: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    /// Exact sorted-array quantile per entry of [`TEST_TILES`].
    pub quantiles: Vec<(f64, f64)>,
}

impl Reference {
    pub fn compute(data: &[f64]) -> Self {
        let mut sorted = data.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let (mut s2, mut s3, mut s4) = (0.0, 0.0, 0.0);
        for &x in &sorted {
            let d = x - mean;
            s2 += d * d;
            s3 += d * d * d;
            s4 += d * d * d * d;
        }
        let u2 = s2 / n as f64;
        let u3 = s3 / n as f64;
        let u4 = s4 / n as f64;

        Self {
            n,
            min: sorted[0],
            max: sorted[n - 1],
            mean,
            variance: u2,
            skewness: if u3 == 0.0 { 0.0 } else { u3 / u2.powf(1.5) },
            kurtosis: if u4 == 0.0 { 0.0 } else { u4 / (u2 * u2) - 3.0 },
            quantiles: TEST_TILES.iter().map(|&p| (p, sorted[(n as f64 * p) as usize])).collect(),
        }
    }

    pub fn quantile(&self, percentile: f64) -> f64 {
        self.quantiles
            .iter()
            .find(|(p, _)| *p == percentile)
            .map(|(_, q)| *q)
            .expect("percentile not tracked")
    }
}

/// Percent error of `live` against `real`, scaled by `denominator` (typically the value itself for
/// relative error, or the data range for location statistics).
pub fn percent_error(live: f64, real: f64, denominator: f64) -> f64 {
    if live == real {
        return 0.0;
    }
    if denominator == 0.0 {
        return f64::INFINITY;
    }
    (100.0 * (live - real) / denominator).abs()
}
