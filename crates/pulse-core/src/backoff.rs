//! Reconnect backoff policy.
//!
//! The delay before reconnect attempt `n` (zero-based) is
//! `min(base_delay_ms * 2^n, max_delay_ms)`. With the defaults this yields
//! 1s, 2s, 4s, 8s, 16s and then 30s for every later attempt.
//!
//! Jitter is optional and off by default. When enabled it spreads the delay
//! symmetrically around the exponential value and is clamped to the cap again,
//! so a jitter factor of `0.0` reproduces the doubling law exactly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default number of consecutive failures before a client stops reconnecting.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Capped exponential backoff shared by the stream and socket clients.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffPolicy {
    /// Delay before the first reconnect, in ms.
    pub base_delay_ms: u64,
    /// Upper bound for any delay, in ms.
    pub max_delay_ms: u64,
    /// Symmetric jitter range, 0.0–1.0.
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: 0.0,
        }
    }
}

impl BackoffPolicy {
    /// Policy with the given base and cap and no jitter.
    #[must_use]
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            jitter_factor: 0.0,
        }
    }

    /// Enable symmetric jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Reject policies that would never wait or whose cap is below the base.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_ms == 0 {
            return Err(ConfigError::new("baseDelayMs", "must be greater than zero"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::new(
                "maxDelayMs",
                format!(
                    "{} is below baseDelayMs {}",
                    self.max_delay_ms, self.base_delay_ms
                ),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::new(
                "jitterFactor",
                format!("{} is outside 0.0..=1.0", self.jitter_factor),
            ));
        }
        Ok(())
    }

    /// Deterministic delay for a zero-based attempt, in ms.
    #[must_use]
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(1u64 << attempt.min(31))
            .min(self.max_delay_ms)
    }

    /// Delay with jitter applied from an explicit random value in `[0.0, 1.0)`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_with_random(&self, attempt: u32, random: f64) -> u64 {
        let capped = self.delay_ms(attempt);
        if self.jitter_factor <= 0.0 {
            return capped;
        }
        // Maps random [0,1) to [-jitter, +jitter]
        let jitter = 1.0 + (random * 2.0 - 1.0) * self.jitter_factor;
        let jittered = ((capped as f64) * jitter).round().max(0.0) as u64;
        jittered.min(self.max_delay_ms)
    }

    /// Delay to wait before the given attempt, drawing jitter from the thread RNG.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = if self.jitter_factor > 0.0 {
            self.delay_with_random(attempt, rand::random::<f64>())
        } else {
            self.delay_ms(attempt)
        };
        Duration::from_millis(ms)
    }
}

/// Default-policy delay for a zero-based attempt, in ms.
#[must_use]
pub fn delay_ms(attempt: u32) -> u64 {
    BackoffPolicy::default().delay_ms(attempt)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn first_attempt_waits_base() {
        assert_eq!(delay_ms(0), 1000);
    }

    #[test]
    fn doubles_until_cap() {
        let delays: Vec<u64> = (0..6).map(delay_ms).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16_000, 30_000]);
    }

    #[test]
    fn attempt_five_hits_cap() {
        assert_eq!(delay_ms(5), 30_000);
        assert_eq!(delay_ms(9), 30_000);
    }

    #[test]
    fn huge_attempt_saturates() {
        assert_eq!(delay_ms(u32::MAX), 30_000);
        let policy = BackoffPolicy::new(u64::MAX / 2, u64::MAX);
        assert_eq!(policy.delay_ms(40), u64::MAX);
    }

    #[test]
    fn zero_jitter_matches_doubling_law() {
        let policy = BackoffPolicy::default();
        for attempt in 0..10 {
            assert_eq!(policy.delay_with_random(attempt, 0.99), policy.delay_ms(attempt));
            assert_eq!(policy.delay(attempt), Duration::from_millis(policy.delay_ms(attempt)));
        }
    }

    #[test]
    fn jitter_spreads_symmetrically() {
        let policy = BackoffPolicy::default().with_jitter(0.2);
        assert_eq!(policy.delay_with_random(0, 0.0), 800);
        assert_eq!(policy.delay_with_random(0, 0.5), 1000);
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let policy = BackoffPolicy::default().with_jitter(0.5);
        assert_eq!(policy.delay_with_random(8, 0.999), 30_000);
    }

    #[test]
    fn default_policy_is_valid() {
        assert_eq!(BackoffPolicy::default().validate(), Ok(()));
    }

    #[test]
    fn zero_base_rejected() {
        let err = BackoffPolicy::new(0, 30_000).validate().unwrap_err();
        assert_eq!(err.field, "baseDelayMs");
    }

    #[test]
    fn cap_below_base_rejected() {
        assert_matches!(
            BackoffPolicy::new(5000, 1000).validate(),
            Err(ConfigError { field: "maxDelayMs", .. })
        );
    }

    #[test]
    fn jitter_out_of_range_rejected() {
        let policy = BackoffPolicy::default().with_jitter(1.5);
        assert_matches!(
            policy.validate(),
            Err(ConfigError { field: "jitterFactor", .. })
        );
    }

    #[test]
    fn serde_defaults_fill_missing_fields() {
        let policy: BackoffPolicy = serde_json::from_str(r#"{"baseDelayMs": 500}"#).unwrap();
        assert_eq!(policy.base_delay_ms, 500);
        assert_eq!(policy.max_delay_ms, 30_000);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn doubling_law_holds(attempt in 0u32..10) {
                let expected = (1000u64 * 2u64.pow(attempt)).min(30_000);
                prop_assert_eq!(delay_ms(attempt), expected);
            }

            #[test]
            fn delay_is_monotonic_and_capped(
                base in 1u64..10_000,
                extra in 0u64..100_000,
                attempt in 0u32..64,
            ) {
                let policy = BackoffPolicy::new(base, base + extra);
                let current = policy.delay_ms(attempt);
                prop_assert!(current <= policy.max_delay_ms);
                prop_assert!(current >= base);
                prop_assert!(policy.delay_ms(attempt + 1) >= current);
            }

            #[test]
            fn jittered_delay_stays_within_cap(
                attempt in 0u32..20,
                jitter in 0.0f64..=1.0,
                random in 0.0f64..1.0,
            ) {
                let policy = BackoffPolicy::default().with_jitter(jitter);
                prop_assert!(policy.delay_with_random(attempt, random) <= 30_000);
            }
        }
    }
}
