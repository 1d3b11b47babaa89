//! Streaming quantile estimation via the P² (piecewise-parabolic) algorithm.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::seqlock::SeqLock;

const N_MARKERS: usize = 5;

/// The mutable marker state, kept together so readers can snapshot it in one validated copy.
///
/// `position_deltas` and `ideal_positions` have one slot fewer than the markers because marker 0's
/// ideal rank is always 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Markers {
    pub(crate) ideal_positions: [f64; N_MARKERS - 1],
    pub(crate) positions: [f64; N_MARKERS],
    pub(crate) heights: [f64; N_MARKERS],
}

/// A single tracked percentile, estimated with the [P² algorithm][p2] extended for decay.
///
/// Five markers approximate the shape of the distribution around the target percentile: marker 0
/// tracks the minimum, marker 4 the maximum, and marker 2 converges on the target quantile. No
/// observation is ever stored; each insertion is O(1).
///
/// The first five observations are buffered (and kept sorted) before the marker machinery engages,
/// so below that threshold `quantile()` returns one of the actually-observed values.
///
/// All methods are safe to call concurrently. Writers serialize per estimator; `quantile()` uses an
/// optimistic read and never blocks a writer.
///
/// [p2]: https://www.cse.wustl.edu/~jain/papers/ftp/psqr.pdf
#[derive(Debug)]
pub struct P2Quantile {
    percentile: f64,
    /// How far each ideal position moves per insertion. Immutable once constructed.
    position_deltas: [f64; N_MARKERS - 1],
    markers: SeqLock<Markers>,
    /// Published with release ordering by the writer that stores it, so a relaxed-path reader can
    /// check "is this estimator warmed up" without touching the marker lock.
    initialized_markers: AtomicUsize,
}

impl P2Quantile {
    /// Creates an estimator for the given target percentile.
    ///
    /// Percentiles of exactly 0 or 1 are permitted; they degenerate into min/max trackers.
    pub fn new(percentile: f64) -> Self {
        Self {
            percentile,
            position_deltas: [percentile / 2.0, percentile, (1.0 + percentile) / 2.0, 1.0],
            markers: SeqLock::new(Markers {
                ideal_positions: [
                    1.0 + 2.0 * percentile,
                    1.0 + 4.0 * percentile,
                    3.0 + 2.0 * percentile,
                    5.0,
                ],
                positions: [1.0, 2.0, 3.0, 4.0, 5.0],
                heights: [0.0; N_MARKERS],
            }),
            initialized_markers: AtomicUsize::new(0),
        }
    }

    /// Returns the percentile this estimator tracks.
    pub fn percentile(&self) -> f64 {
        self.percentile
    }

    /// Returns the current approximation of the configured percentile.
    ///
    /// Before five observations have been absorbed this is a midpoint of the sorted buffer; with
    /// zero observations the result is meaningless and callers must gate on their own count.
    pub fn quantile(&self) -> f64 {
        let initialized = self.initialized_markers.load(Ordering::Acquire);
        let markers = self.markers.read();
        markers.heights[initialized / 2]
    }

    /// Inserts one observation.
    ///
    /// `target_min` and `target_max` are the owning aggregate's decayed bounds as of this
    /// insertion; they pull the extreme markers inward or outward so the estimator follows a
    /// decay-shrunk range without violating marker ordering.
    pub fn add(&self, value: f64, target_min: f64, target_max: f64) {
        let mut guard = self.markers.write();
        let markers = &mut *guard;

        let initialized = self.initialized_markers.load(Ordering::Relaxed);
        if initialized < N_MARKERS {
            markers.heights[initialized] = value;
            self.initialized_markers.store(initialized + 1, Ordering::Release);
            // Keep the buffer sorted so quantile() has something sensible to return pre-init.
            markers.heights[..initialized + 1].sort_by(f64::total_cmp);
            return;
        }

        // Refresh the extreme markers from the decayed bounds, bumping by one ULP past the
        // neighboring marker when the bound has been decayed inside it.
        if target_max > markers.heights[N_MARKERS - 2] {
            markers.heights[N_MARKERS - 1] = target_max;
        } else {
            markers.heights[N_MARKERS - 1] = markers.heights[N_MARKERS - 2].next_up();
        }
        if target_min < markers.heights[1] {
            markers.heights[0] = target_min;
        } else {
            markers.heights[0] = markers.heights[1].next_down();
        }

        // Marker 4 is the maximum, so it sees every insertion as at or below it. Walk downward
        // from marker 3, bumping the rank of every marker sitting above the new observation.
        markers.positions[N_MARKERS - 1] += 1.0;
        for i in (0..N_MARKERS - 1).rev() {
            if markers.heights[i] <= value {
                break;
            }
            markers.positions[i] += 1.0;
        }

        for i in 0..N_MARKERS - 1 {
            markers.ideal_positions[i] += self.position_deltas[i];
        }

        adjust(markers);
    }

    /// Scales the rank-space of an initialized estimator, weighting subsequent insertions toward
    /// recent data. A multiplier of 1 is a no-op.
    ///
    /// The extreme marker heights are not touched here; the owning aggregate feeds its decayed
    /// bounds back through `add` instead.
    pub fn decay(&self, multiplier: f64) {
        if multiplier == 1.0 {
            return;
        }

        let mut guard = self.markers.write();
        let markers = &mut *guard;
        if self.initialized_markers.load(Ordering::Relaxed) == N_MARKERS {
            for i in 0..N_MARKERS - 1 {
                markers.ideal_positions[i] *= multiplier;
                markers.positions[i + 1] *= multiplier;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn snapshot_markers(&self) -> Markers {
        self.markers.read()
    }
}

/// The P² adjustment step: nudge each interior marker one rank toward its ideal position when it
/// has drifted at least a full rank and the neighboring marker leaves room.
fn adjust(markers: &mut Markers) {
    for i in 1..N_MARKERS - 1 {
        let position = markers.positions[i];
        let position_delta = markers.ideal_positions[i - 1] - position;

        if (position_delta >= 1.0 && markers.positions[i + 1] > position + 1.0)
            || (position_delta <= -1.0 && markers.positions[i - 1] < position - 1.0)
        {
            let direction = if position_delta > 0.0 { 1.0 } else { -1.0 };

            let height_below = markers.heights[i - 1];
            let height = markers.heights[i];
            let height_above = markers.heights[i + 1];
            let new_height = parabolic(
                direction,
                height_below,
                height,
                height_above,
                markers.positions[i - 1],
                position,
                markers.positions[i + 1],
            );

            if height_below < new_height && new_height < height_above {
                markers.heights[i] = new_height;
            } else {
                // The parabola escaped the neighboring heights; fall back to linear
                // interpolation toward the neighbor in the direction of motion.
                let neighbor = if direction > 0.0 { i + 1 } else { i - 1 };
                let rise = markers.heights[neighbor] - height;
                let run = markers.positions[neighbor] - position;
                markers.heights[i] = height + (rise / run).copysign(direction);
            }

            markers.positions[i] = position + direction;
        }
    }
}

/// The piecewise-parabolic interpolation formula from the P² paper:
///
/// q + d / (n(i+1) - n(i-1)) *
///     ((n - n(i-1) + d) * (q(i+1) - q) / (n(i+1) - n) + (n(i+1) - n - d) * (q - q(i-1)) / (n - n(i-1)))
#[allow(clippy::too_many_arguments)]
fn parabolic(
    direction: f64, height_below: f64, height: f64, height_above: f64, position_below: f64, position: f64,
    position_above: f64,
) -> f64 {
    let x_below = position - position_below;
    let x_above = position_above - position;
    let below_scale = (x_above - direction) / x_below;
    let above_scale = (x_below + direction) / x_above;
    let lower_half = below_scale * (height - height_below);
    let upper_half = above_scale * (height_above - height);
    height + ((upper_half + lower_half) / (position_above - position_below)).copysign(direction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(quantile: &P2Quantile, values: &[f64]) {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &value in values {
            min = min.min(value);
            max = max.max(value);
            quantile.add(value, min, max);
        }
    }

    #[test]
    fn pre_init_returns_observed_values() {
        let quantile = P2Quantile::new(0.5);
        let values = [4.0, 1.0, 3.0, 2.0];
        for (i, &value) in values.iter().enumerate() {
            quantile.add(value, 0.0, 0.0);
            let estimate = quantile.quantile();
            assert!(
                values[..=i].contains(&estimate),
                "pre-init estimate {} not among observed {:?}",
                estimate,
                &values[..=i]
            );
        }
    }

    #[test]
    fn pre_init_buffer_is_sorted() {
        let quantile = P2Quantile::new(0.5);
        fill(&quantile, &[5.0, 1.0, 4.0, 2.0, 3.0]);
        let markers = quantile.snapshot_markers();
        assert_eq!(markers.heights, [1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(markers.positions, [1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn median_of_sequential_values() {
        let quantile = P2Quantile::new(0.5);
        let values: Vec<f64> = (1..=101).map(f64::from).collect();
        fill(&quantile, &values);
        let estimate = quantile.quantile();
        assert!((estimate - 51.0).abs() < 5.0, "median estimate {} too far from 51", estimate);
    }

    #[test]
    fn heights_stay_ordered() {
        let mut state = 0x2545F4914F6CDD1Du64;
        let mut next = || {
            // xorshift is plenty for an ordering check
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 11) as f64 / (1u64 << 53) as f64
        };

        let quantile = P2Quantile::new(0.9);
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for n in 0..10_000 {
            let value = next() * 1000.0;
            min = min.min(value);
            max = max.max(value);
            quantile.add(value, min, max);
            if n < 5 {
                // Still buffering; the tail of the heights array is untouched.
                continue;
            }

            let markers = quantile.snapshot_markers();
            for i in 0..4 {
                assert!(
                    markers.heights[i] <= markers.heights[i + 1],
                    "heights out of order: {:?}",
                    markers.heights
                );
                assert!(
                    markers.positions[i] < markers.positions[i + 1],
                    "positions not strictly increasing: {:?}",
                    markers.positions
                );
            }
        }
    }

    #[test]
    fn noop_decay_is_bit_identical() {
        let quantile = P2Quantile::new(0.75);
        fill(&quantile, &[3.0, 1.0, 4.0, 1.5, 9.0, 2.6, 5.3]);

        let before = quantile.snapshot_markers();
        quantile.decay(1.0);
        assert_eq!(before, quantile.snapshot_markers());
    }

    #[test]
    fn decay_shrinks_rank_space() {
        let quantile = P2Quantile::new(0.5);
        fill(&quantile, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);

        let before = quantile.snapshot_markers();
        quantile.decay(0.5);
        let after = quantile.snapshot_markers();

        assert_eq!(after.positions[0], before.positions[0]);
        for i in 1..5 {
            assert_eq!(after.positions[i], before.positions[i] * 0.5);
        }
        for i in 0..4 {
            assert_eq!(after.ideal_positions[i], before.ideal_positions[i] * 0.5);
        }
    }

    #[test]
    fn decay_before_init_leaves_buffer_untouched() {
        let quantile = P2Quantile::new(0.5);
        fill(&quantile, &[2.0, 1.0, 3.0]);

        let before = quantile.snapshot_markers();
        quantile.decay(0.5);
        assert_eq!(before, quantile.snapshot_markers());
    }

    #[test]
    fn extreme_percentiles_do_not_panic() {
        for percentile in [0.0, 1.0] {
            let quantile = P2Quantile::new(percentile);
            fill(&quantile, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
            let estimate = quantile.quantile();
            assert!(estimate.is_finite());
        }
    }

    #[test]
    fn zero_observations_returns_buffer_default() {
        let quantile = P2Quantile::new(0.5);
        assert_eq!(quantile.quantile(), 0.0);
    }
}
