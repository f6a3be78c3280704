// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Arguments for the [`should_renew`][super::RetryBuilder::should_renew] predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewArgs {
    pub(super) attempt: u32,
    pub(super) max_retries: u32,
}

impl RenewArgs {
    /// Returns the 0-based index of the attempt that produced the response.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns how many retries remain after this attempt.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.max_retries.saturating_sub(self.attempt)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_counts_down() {
        let args = RenewArgs {
            attempt: 1,
            max_retries: 3,
        };

        assert_eq!(args.attempt(), 1);
        assert_eq!(args.remaining(), 2);
    }
}
