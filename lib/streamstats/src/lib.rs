//! Streaming summary statistics with exponential decay.
//!
//! `streamstats` estimates percentiles, mean, variance, skewness, kurtosis and min/max over an
//! unbounded stream of observations without storing any of them. Percentiles use the P²
//! (piecewise-parabolic) five-marker algorithm, generalized so that statistics can forget old data
//! through time- or count-based exponential decay.
//!
//! The crate is built for high-frequency concurrent writers with occasional concurrent readers:
//! writers serialize per write unit, and readers use optimistic sequence-validated reads that
//! never block a writer.
//!
//! ```
//! use streamstats::{DecayConfig, LiveStats};
//!
//! let stats = LiveStats::new(DecayConfig::never(), &[0.5, 0.95, 0.99]);
//! for i in 0..10_000 {
//!     stats.add(i as f64);
//! }
//!
//! assert_eq!(stats.num(), 10_000);
//! let p50 = stats.quantile(0.5).unwrap();
//! assert!((p50 - 5_000.0).abs() < 500.0);
//! ```
#![deny(warnings)]
#![deny(missing_docs)]

mod config;
mod quantile;
mod seqlock;
mod snapshot;
mod stats;

pub use self::config::{ConfigError, DecayConfig};
pub use self::quantile::P2Quantile;
pub use self::snapshot::Snapshot;
pub use self::stats::LiveStats;
