// crates/epayroll-core/src/runtime/retry.rs
// ============================================================================
// Module: Retry Policy
// Description: Attempt ceiling and exponential backoff with jitter.
// Purpose: Decide how often and how long to wait before retrying transient failures.
// Dependencies: rand, serde
// ============================================================================

//! ## Overview
//! The delay before retry `n` (1-based count of failures so far) is
//! `initial_backoff_ms * multiplier^(n-1)`, capped at `max_backoff_ms`. With
//! jitter enabled the delay is drawn uniformly from `[delay/2, delay]`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default attempt ceiling per submission run.
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default first backoff delay.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
/// Default backoff cap.
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
/// Default backoff multiplier.
const DEFAULT_MULTIPLIER: u32 = 2;

/// Returns the default attempt ceiling.
const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Returns the default first backoff delay.
const fn default_initial_backoff_ms() -> u64 {
    DEFAULT_INITIAL_BACKOFF_MS
}

/// Returns the default backoff cap.
const fn default_max_backoff_ms() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

/// Returns the default backoff multiplier.
const fn default_multiplier() -> u32 {
    DEFAULT_MULTIPLIER
}

/// Returns the default jitter setting.
const fn default_jitter() -> bool {
    true
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Retry policy for transient authority failures.
///
/// # Invariants
/// - `max_attempts >= 1` counts every attempt, the first one included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Attempt ceiling per submission run.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    /// Randomizes each delay within `[delay/2, delay]`.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            multiplier: DEFAULT_MULTIPLIER,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Returns a policy that never waits, for tests and dry runs.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1,
            jitter: false,
        }
    }

    /// Returns the delay before the retry that follows `failures` failed attempts.
    #[must_use]
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let factor = u64::from(self.multiplier.max(1)).checked_pow(exponent).unwrap_or(u64::MAX);
        let delay = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        if !self.jitter || delay < 2 {
            return Duration::from_millis(delay);
        }
        let floor = delay / 2;
        Duration::from_millis(rand::thread_rng().gen_range(floor..=delay))
    }

    /// Returns true when another attempt is allowed after `attempts` attempts.
    #[must_use]
    pub const fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            multiplier: 2,
            jitter: false,
        };
        let delays: Vec<u128> = (1..=6).map(|n| policy.backoff_delay(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: true,
            initial_backoff_ms: 400,
            ..RetryPolicy::default()
        };
        for _ in 0..64 {
            let delay = policy.backoff_delay(1).as_millis();
            assert!((200..=400).contains(&delay));
        }
    }

    #[test]
    fn ceiling_counts_first_attempt() {
        let policy = RetryPolicy::immediate(3);
        assert!(policy.allows_another(2));
        assert!(!policy.allows_another(3));
    }
}
