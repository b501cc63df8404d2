// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconnection backoff for persistent connections.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for exponential reconnection backoff.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use device_lifecycle::device::BackoffPolicy;
///
/// // Default policy: 2s doubling up to 30s, retry forever
/// let policy = BackoffPolicy::default();
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
///
/// // Custom policy
/// let policy = BackoffPolicy::new()
///     .with_initial_delay(Duration::from_millis(500))
///     .with_max_delay(Duration::from_secs(10))
///     .with_max_retries(5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Maximum number of retries after consecutive failures (`None` = infinite).
    pub max_retries: Option<u32>,
}

impl BackoffPolicy {
    /// Default delay after the first failure.
    pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(2);
    /// Default cap on the delay.
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delay after the first failure.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets infinite retries.
    #[must_use]
    pub fn with_infinite_retries(mut self) -> Self {
        self.max_retries = None;
        self
    }

    /// Returns the delay to wait after `failures` consecutive failures.
    ///
    /// Equals `min(initial_delay * 2^(failures - 1), max_delay)`; zero
    /// failures yields the initial delay.
    #[must_use]
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        1u32.checked_shl(exponent)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Returns true if another attempt is allowed after `failures` failures.
    #[must_use]
    pub fn should_retry(&self, failures: u32) -> bool {
        self.max_retries.is_none_or(|max| failures <= max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Self::DEFAULT_INITIAL_DELAY,
            max_delay: Self::DEFAULT_MAX_DELAY,
            max_retries: None,
        }
    }
}

/// Consecutive-failure counter driven by a [`BackoffPolicy`].
///
/// Starts at the base delay, doubles with every recorded failure up to the
/// cap, and returns to the base delay on [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl Backoff {
    /// Creates a counter with no recorded failures.
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Returns the number of consecutive failures recorded.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Returns the current backoff delay.
    ///
    /// This is the delay waited after the most recent failure, or the base
    /// delay when no failure has been recorded since the last reset.
    #[must_use]
    pub fn current(&self) -> Duration {
        self.policy.delay_for_attempt(self.failures.max(1))
    }

    /// Records a failure and returns the delay to wait before the next attempt.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.current()
    }

    /// Returns true if the policy allows another attempt.
    #[must_use]
    pub fn should_retry(&self) -> bool {
        self.policy.should_retry(self.failures)
    }

    /// Resets the counter to the base delay.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
