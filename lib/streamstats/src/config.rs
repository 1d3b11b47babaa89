//! Decay policy configuration.

use std::fmt;
use std::time::Duration;

/// Errors raised when constructing an invalid decay policy.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The decay multiplier is outside `[0, 1)`.
    InvalidMultiplier {
        /// The rejected multiplier.
        actual: f64,
    },

    /// Time-based decay was requested with a zero-length period.
    InvalidPeriod,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMultiplier { actual } => {
                write!(f, "decay multiplier must be in [0, 1): {}", actual)
            }
            Self::InvalidPeriod => write!(f, "decay period must be positive"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// When and how aggregated statistics forget old data.
///
/// A decay step scales every decayable accumulator by the configured multiplier. Steps are either
/// owed by elapsed wall-clock time (one per elapsed period) or applied one at a time by an explicit
/// [`LiveStats::decay`][crate::LiveStats::decay] call when no period is configured.
///
/// [`DecayConfig::never`] disables decay entirely; it is the default.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecayConfig {
    multiplier: f64,
    period_nanos: u64,
}

impl DecayConfig {
    /// A policy that never decays. All decay triggers become no-ops.
    pub fn never() -> Self {
        Self { multiplier: 1.0, period_nanos: 0 }
    }

    /// A policy that applies one decay step per explicit `decay()` call.
    ///
    /// # Errors
    ///
    /// If `multiplier` is outside `[0, 1)`, an error is returned.
    pub fn manual(multiplier: f64) -> Result<Self, ConfigError> {
        check_multiplier(multiplier)?;
        Ok(Self { multiplier, period_nanos: 0 })
    }

    /// A policy that owes one decay step per elapsed `period` of wall-clock time, caught up lazily
    /// on the next insertion or explicit decay trigger.
    ///
    /// # Errors
    ///
    /// If `multiplier` is outside `[0, 1)` or `period` is zero, an error is returned.
    pub fn windowed(multiplier: f64, period: Duration) -> Result<Self, ConfigError> {
        check_multiplier(multiplier)?;
        if period.is_zero() {
            return Err(ConfigError::InvalidPeriod);
        }

        let period_nanos = u64::try_from(period.as_nanos()).map_err(|_| ConfigError::InvalidPeriod)?;
        Ok(Self { multiplier, period_nanos })
    }

    /// The per-step decay multiplier; 1 for the never-decay policy.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// The decay period in nanoseconds; 0 for manual or never-decay policies.
    pub(crate) fn period_nanos(&self) -> u64 {
        self.period_nanos
    }

    /// Whether this policy ever decays anything.
    pub fn is_never(&self) -> bool {
        self.multiplier == 1.0
    }

    /// Whether decay steps accrue with elapsed time.
    pub fn is_time_based(&self) -> bool {
        !self.is_never() && self.period_nanos > 0
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self::never()
    }
}

fn check_multiplier(multiplier: f64) -> Result<(), ConfigError> {
    // NaN fails both comparisons and is rejected here too.
    if multiplier >= 0.0 && multiplier < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidMultiplier { actual: multiplier })
    }
}
