// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Redial schedule for a link that was lost after it had been established.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When and how often a lost link is redialed.
///
/// Attempts are counted per outage: the count starts at 0 when a link
/// drops and goes back to 0 once a redial succeeds. A failed initial
/// connect is never retried; it is returned to the caller of `connect`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use scadable::connection::ReconnectionPolicy;
///
/// // 250 ms, 500 ms, 1 s, 2 s, 2 s, then give up
/// let policy = ReconnectionPolicy::new()
///     .with_initial_delay(Duration::from_millis(250))
///     .with_max_delay(Duration::from_secs(2))
///     .with_max_attempts(5);
///
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
/// assert!(policy.should_retry(4));
/// assert!(!policy.should_retry(5));
///
/// // End the receive loop on the first disconnect
/// assert!(!ReconnectionPolicy::disabled().should_retry(0));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionPolicy {
    enabled: bool,
    /// `None` redials until stopped.
    max_attempts: Option<u32>,
    #[serde(with = "millis")]
    initial_delay: Duration,
    #[serde(with = "millis")]
    max_delay: Duration,
    backoff: f64,
}

impl ReconnectionPolicy {
    /// Returns the default schedule: up to 10 redials per outage, starting
    /// at 1 s and doubling up to 60 s.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never redials.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Gives up after `attempts` failed redials in one outage.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Redials until the connection is stopped.
    #[must_use]
    pub fn with_unlimited_attempts(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Wait before the first redial of an outage.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Cap on the wait between redials.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Factor applied to the wait after each failed redial.
    #[must_use]
    pub fn with_backoff(mut self, factor: f64) -> Self {
        self.backoff = factor;
        self
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Wait before redial number `attempt` of an outage, counted from 0.
    ///
    /// `initial_delay * backoff^attempt`, never above `max_delay`. Results
    /// that do not fit a `Duration` land on `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether redial number `attempt` of an outage, counted from 0, may
    /// happen. Always `false` when disabled.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && self.max_attempts.is_none_or(|max| attempt < max)
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: Some(10),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff: 2.0,
        }
    }
}

/// Durations as integer milliseconds in configuration files.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule() {
        let policy = ReconnectionPolicy::default();

        assert!(policy.is_enabled());
        assert_eq!(policy.max_attempts(), Some(10));
        assert_eq!(policy.initial_delay(), Duration::from_secs(1));
        assert_eq!(policy.max_delay(), Duration::from_secs(60));
    }

    #[test]
    fn disabled_never_redials() {
        let policy = ReconnectionPolicy::disabled();

        assert!(!policy.is_enabled());
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn delay_grows_until_capped() {
        let policy = ReconnectionPolicy::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff(2.0)
            .with_max_delay(Duration::from_secs(10));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(10));
        // Overflows to infinity and lands on the cap
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn initial_delay_above_cap_is_capped() {
        let policy = ReconnectionPolicy::new()
            .with_initial_delay(Duration::from_secs(30))
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(5));
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = ReconnectionPolicy::new().with_max_attempts(3);

        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn unlimited_attempts() {
        let policy = ReconnectionPolicy::new().with_unlimited_attempts();

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1000));
    }

    #[test]
    fn partial_config_uses_defaults() {
        let policy: ReconnectionPolicy =
            serde_json::from_str(r#"{"max_attempts": null, "initial_delay": 250}"#).unwrap();

        assert!(policy.is_enabled());
        assert_eq!(policy.max_attempts(), None);
        assert_eq!(policy.initial_delay(), Duration::from_millis(250));
        assert_eq!(policy.max_delay(), Duration::from_secs(60));
    }
}
