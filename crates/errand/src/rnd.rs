// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// Source of backoff jitter.
///
/// Jitter does not need cryptographic randomness, so the thread-local `fastrand`
/// generator is used. Tests pin the fraction to assert exact delays.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) enum Rnd {
    #[default]
    Thread,

    #[cfg(test)]
    Fixed(f64),
}

impl Rnd {
    fn fraction(self) -> f64 {
        match self {
            Self::Thread => fastrand::f64(),
            #[cfg(test)]
            Self::Fixed(fraction) => fraction,
        }
    }

    /// Returns a random part of `span`, at most `span` itself.
    pub(crate) fn scale(self, span: Duration) -> Duration {
        span.mul_f64(self.fraction())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_stays_within_span() {
        let span = Duration::from_millis(450);

        for _ in 0..100 {
            assert!(Rnd::Thread.scale(span) <= span);
        }
    }

    #[test]
    fn fixed_scales_exactly() {
        assert_eq!(Rnd::Fixed(0.5).scale(Duration::from_millis(300)), Duration::from_millis(150));
        assert_eq!(Rnd::Fixed(0.0).scale(Duration::from_secs(9)), Duration::ZERO);
        assert_eq!(Rnd::default(), Rnd::Thread);
    }
}
