//! A keyed registry of [`LiveStats`] aggregates for per-operation timing.
//!
//! [`StatsRegistry`] maps string keys to independent [`LiveStats`] instances, creating them on
//! first use. Callers feed it durations directly ([`record`][StatsRegistry::record],
//! [`complete`][StatsRegistry::complete]) or wrap closures
//! ([`time`][StatsRegistry::time] and friends), which file the elapsed time under
//! `name/success`, `name/failure` or `name/error` depending on the outcome.
//!
//! Reporting happens through [`Snapshot`]s: [`snapshots`][StatsRegistry::snapshots] copies the
//! current readings non-destructively, while [`drain`][StatsRegistry::drain] consumes the
//! collected statistics, leaving the registry empty.
#![deny(warnings)]
#![deny(missing_docs)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use streamstats::{DecayConfig, LiveStats, Snapshot};
use tracing::{debug, trace, Level};

// Re-exported so callers can produce the `start` for `complete` without their own quanta
// dependency.
pub use quanta::Instant;

/// The key under which the registry records its own bookkeeping overhead when trace logging is
/// enabled.
pub const OVERHEAD_KEY: &str = "overhead";

/// The outcome of a timed operation, appended to the base name as a `/`-separated subkey.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Outcome {
    Success,
    Failure,
    Error,
}

impl Outcome {
    fn subkey(self, name: &str) -> String {
        let suffix = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
        };
        format!("{}/{}", name, suffix)
    }
}

struct Entry {
    stats: LiveStats,
    /// Nanoseconds since registry construction at last use, for idle pruning.
    last_used: AtomicU64,
}

/// A concurrent registry of named [`LiveStats`], geared toward operation timing.
///
/// Aggregates are created lazily per key from a default [`DecayConfig`] (with optional per-key
/// overrides) and a shared percentile list. All operations are safe to call from any number of
/// threads; the key map is lock-free and each aggregate synchronizes independently.
pub struct StatsRegistry {
    entries: papaya::HashMap<String, Arc<Entry>>,
    percentiles: Vec<f64>,
    default_decay: DecayConfig,
    decay_overrides: HashMap<String, DecayConfig>,
    idle_timeout: Option<Duration>,
    started: Instant,
}

impl StatsRegistry {
    /// Creates a registry whose aggregates track the given percentiles under the given default
    /// decay policy.
    pub fn new(default_decay: DecayConfig, percentiles: &[f64]) -> Self {
        Self {
            entries: papaya::HashMap::new(),
            percentiles: percentiles.to_vec(),
            default_decay,
            decay_overrides: HashMap::new(),
            idle_timeout: None,
            started: Instant::now(),
        }
    }

    /// Overrides the decay policy for one key. Applies only to aggregates created after the call,
    /// so configure overrides before recording.
    pub fn with_decay_override(mut self, key: impl Into<String>, decay: DecayConfig) -> Self {
        self.decay_overrides.insert(key.into(), decay);
        self
    }

    /// Drops aggregates untouched for `timeout` during [`prune_idle`][Self::prune_idle] and
    /// [`drain`][Self::drain].
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// The number of distinct keys currently tracked.
    pub fn len(&self) -> usize {
        self.entries.pin().len()
    }

    /// Whether the registry currently tracks no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records a timing observation of `duration` for `key`.
    pub fn record(&self, key: &str, duration: Duration) {
        let recorded = Instant::now();
        self.add_timing(key, duration.as_nanos() as f64);

        // Self-accounting is only worth its own cost when someone is tracing.
        if tracing::enabled!(Level::TRACE) {
            let overhead = recorded.elapsed();
            trace!(key, overhead_nanos = overhead.as_nanos() as u64, "recorded timing");
            self.add_timing(OVERHEAD_KEY, overhead.as_nanos() as f64);
        }
    }

    /// Records the time elapsed since `start` for `key`.
    pub fn complete(&self, key: &str, start: Instant) {
        self.record(key, start.elapsed());
    }

    /// Times `f`, recording under `name/success`, or `name/error` if `f` panics (the panic still
    /// propagates).
    pub fn time<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        self.time_with(name, f, |_| true)
    }

    /// Times a fallible `f`, recording under `name/success` for `Ok` and `name/failure` for
    /// `Err` (`name/error` on panic). The result is returned unchanged.
    pub fn time_result<T, E>(&self, name: &str, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        self.time_with(name, f, Result::is_ok)
    }

    /// Times `f`, classifying the returned value with `successful` into `name/success` or
    /// `name/failure`. A panicking `f` records under `name/error` and the panic propagates.
    pub fn time_with<T>(
        &self, name: &str, f: impl FnOnce() -> T, successful: impl FnOnce(&T) -> bool,
    ) -> T {
        let start = Instant::now();
        let mut panic_guard = PanicTiming { registry: self, name, start, armed: true };

        let result = f();
        panic_guard.armed = false;

        // The classification check counts as overhead, so take the end time afterwards.
        let outcome = if successful(&result) { Outcome::Success } else { Outcome::Failure };
        self.complete(&outcome.subkey(name), start);
        result
    }

    /// Copies the current readings of the named keys (or all keys, when `names` is empty) into
    /// snapshots, sorted by name. Time-owed decay is applied before capturing; manual-policy keys
    /// are never decayed here, so taking snapshots is non-destructive.
    pub fn snapshots(&self, names: &[&str]) -> Vec<Snapshot> {
        let entries = self.entries.pin();
        let mut snapshots: Vec<Snapshot> = entries
            .iter()
            .filter(|(key, _)| names.is_empty() || names.contains(&key.as_str()))
            .map(|(key, entry)| capture_current(key.clone(), &entry.stats))
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Consumes every tracked aggregate, returning final snapshots sorted by name and leaving the
    /// registry empty. Aggregates past the idle timeout are dropped without being reported.
    pub fn drain(&self) -> Vec<Snapshot> {
        let pruned = self.prune_idle();
        if pruned > 0 {
            debug!(pruned, "dropped idle keys before drain");
        }

        let entries = self.entries.pin();
        let keys: Vec<String> = entries.keys().cloned().collect();

        let mut snapshots: Vec<Snapshot> = keys
            .into_iter()
            .filter_map(|key| {
                entries.remove(&key).map(|entry| capture_current(key, &entry.stats))
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(count = snapshots.len(), "drained registry");
        snapshots
    }

    /// Drops aggregates untouched for longer than the configured idle timeout, returning how many
    /// were dropped. A no-op without an idle timeout.
    pub fn prune_idle(&self) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };
        let now = self.elapsed_nanos();
        let cutoff = now.saturating_sub(timeout.as_nanos() as u64);

        let entries = self.entries.pin();
        let idle_keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.last_used.load(Ordering::Relaxed) < cutoff)
            .map(|(key, _)| key.clone())
            .collect();

        let mut pruned = 0;
        for key in idle_keys {
            // Re-check under removal: the entry may have been touched since the scan.
            if let Some(entry) = entries.get(&key) {
                if entry.last_used.load(Ordering::Relaxed) >= cutoff {
                    continue;
                }
            }
            if entries.remove(&key).is_some() {
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(pruned, "pruned idle keys");
        }
        pruned
    }

    fn add_timing(&self, key: &str, nanos: f64) {
        let entry = self.entry(key);
        entry.stats.add(nanos);
        entry.last_used.store(self.elapsed_nanos(), Ordering::Relaxed);
    }

    fn entry(&self, key: &str) -> Arc<Entry> {
        let entries = self.entries.pin();
        if let Some(entry) = entries.get(key) {
            return Arc::clone(entry);
        }

        let decay = self.decay_overrides.get(key).copied().unwrap_or(self.default_decay);
        let entry = entries.get_or_insert_with(key.to_owned(), || {
            Arc::new(Entry {
                stats: LiveStats::new(decay, &self.percentiles),
                last_used: AtomicU64::new(self.elapsed_nanos()),
            })
        });
        Arc::clone(entry)
    }

    fn elapsed_nanos(&self) -> u64 {
        self.started.elapsed().as_nanos() as u64
    }
}

/// Catches up any decay owed by elapsed time, then captures. Manual-policy aggregates only decay
/// on their own explicit triggers, so reporting never consumes a step.
fn capture_current(key: String, stats: &LiveStats) -> Snapshot {
    if stats.decay_config().is_time_based() {
        stats.decay();
    }
    Snapshot::capture(key, stats)
}

/// Records `name/error` if dropped while still armed, i.e. when the timed closure unwound.
struct PanicTiming<'a> {
    registry: &'a StatsRegistry,
    name: &'a str,
    start: Instant,
    armed: bool,
}

impl Drop for PanicTiming<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.complete(&Outcome::Error.subkey(self.name), self.start);
        }
    }
}
