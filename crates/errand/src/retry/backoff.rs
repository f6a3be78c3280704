// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::min;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_BACKOFF_MAX, DEFAULT_BACKOFF_MIN};
use crate::rnd::Rnd;

/// How long to wait before the next attempt.
///
/// Durations are (de)serialized as milliseconds:
///
/// ```
/// use std::time::Duration;
///
/// use errand::Backoff;
///
/// let backoff: Backoff = serde_json::from_str(r#"{"type":"jittered","min":100,"max":300}"#).unwrap();
/// assert_eq!(
///     backoff,
///     Backoff::Jittered {
///         min: Duration::from_millis(100),
///         max: Duration::from_millis(300),
///     }
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// A uniformly random delay in `[min, max]`, independent of the attempt.
    Jittered {
        /// The shortest delay.
        #[serde(with = "crate::millis")]
        min: Duration,
        /// The longest delay.
        #[serde(with = "crate::millis")]
        max: Duration,
    },

    /// `base * 2^attempt` plus a uniformly random `[0, jitter)`, clamped to `max`.
    Exponential {
        /// The delay before the first retry.
        #[serde(with = "crate::millis")]
        base: Duration,
        /// The upper bound of the random component.
        #[serde(with = "crate::millis")]
        jitter: Duration,
        /// The longest delay.
        #[serde(with = "crate::millis")]
        max: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Jittered {
            min: DEFAULT_BACKOFF_MIN,
            max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl Backoff {
    /// Computes the delay that follows the failed `attempt` (0-based).
    pub(crate) fn delay(&self, attempt: u32, rnd: Rnd) -> Duration {
        match *self {
            Self::Jittered { min, max } => {
                let spread = max.saturating_sub(min);
                min.saturating_add(rnd.scale(spread))
            }
            Self::Exponential { base, jitter, max } => {
                let exponential = base.saturating_mul(2_u32.saturating_pow(attempt));
                let delay = exponential.saturating_add(rnd.scale(jitter));
                min(delay, max)
            }
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_jittered_between_50_and_500_ms() {
        assert_eq!(
            Backoff::default(),
            Backoff::Jittered {
                min: Duration::from_millis(50),
                max: Duration::from_millis(500),
            }
        );
    }

    #[test]
    fn jittered_spans_range() {
        let backoff = Backoff::default();

        assert_eq!(backoff.delay(0, Rnd::Fixed(0.0)), Duration::from_millis(50));
        assert_eq!(backoff.delay(7, Rnd::Fixed(0.5)), Duration::from_millis(275));
    }

    #[test]
    fn jittered_inverted_range_uses_min() {
        let backoff = Backoff::Jittered {
            min: Duration::from_millis(80),
            max: Duration::from_millis(10),
        };

        assert_eq!(backoff.delay(0, Rnd::Fixed(0.9)), Duration::from_millis(80));
    }

    #[test]
    fn jittered_real_rnd_stays_in_bounds() {
        let backoff = Backoff::default();

        for attempt in 0..50 {
            let delay = backoff.delay(attempt, Rnd::Thread);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn exponential_doubles_then_clamps() {
        let backoff = Backoff::Exponential {
            base: Duration::from_secs(1),
            jitter: Duration::from_secs(1),
            max: Duration::from_secs(10),
        };
        let rnd = Rnd::Fixed(0.0);

        assert_eq!(backoff.delay(0, rnd), Duration::from_secs(1));
        assert_eq!(backoff.delay(1, rnd), Duration::from_secs(2));
        assert_eq!(backoff.delay(2, rnd), Duration::from_secs(4));
        assert_eq!(backoff.delay(4, rnd), Duration::from_secs(10));
        assert_eq!(backoff.delay(u32::MAX, rnd), Duration::from_secs(10));
    }

    #[test]
    fn exponential_adds_jitter() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            jitter: Duration::from_millis(100),
            max: Duration::from_secs(60),
        };

        assert_eq!(backoff.delay(1, Rnd::Fixed(0.5)), Duration::from_millis(250));
    }

    #[test]
    fn serde_round_trip() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(1000),
            jitter: Duration::from_millis(1000),
            max: Duration::from_millis(30_000),
        };

        let json = serde_json::to_string(&backoff).unwrap();

        assert_eq!(json, r#"{"type":"exponential","base":1000,"jitter":1000,"max":30000}"#);
        assert_eq!(serde_json::from_str::<Backoff>(&json).unwrap(), backoff);
    }
}
