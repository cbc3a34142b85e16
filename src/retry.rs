// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Backoff
//!
//! Exponential backoff with jitter, shared by the consumer supervisor and the
//! job runtime's retry scheduling.

use rand::Rng;
use std::time::Duration;

/// Ceiling of publish retries after the first failed attempt.
pub const MAX_PUBLISH_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomization in `0.0..=1.0`, applied as +/- that fraction
    pub jitter_factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.25,
        }
    }
}

impl Backoff {
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Backoff {
        Backoff {
            base_delay,
            max_delay,
            ..Backoff::default()
        }
    }

    pub fn without_jitter(mut self) -> Backoff {
        self.jitter_factor = 0.0;
        self
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`, then jittered and capped again.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let raw = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(exponent));
        let capped = raw.min(self.max_delay);

        apply_jitter(capped, self.jitter_factor).min(self.max_delay)
    }
}

fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let range = duration.as_secs_f64() * jitter_factor.clamp(0.0, 1.0);
    let offset = rand::rng().random_range(-range..=range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_capped() {
        let backoff =
            Backoff::exponential(Duration::from_millis(100), Duration::from_secs(1)).without_jitter();

        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
        assert_eq!(backoff.delay(5), Duration::from_secs(1));
        assert_eq!(backoff.delay(60), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let backoff = Backoff {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.25,
        };

        for _ in 0..200 {
            let delay = backoff.delay(3);
            assert!(delay >= Duration::from_secs(3), "{delay:?}");
            assert!(delay <= Duration::from_secs(5), "{delay:?}");
        }
    }

    #[test]
    fn jitter_never_exceeds_max_delay() {
        let backoff = Backoff {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            jitter_factor: 1.0,
        };

        for _ in 0..200 {
            assert!(backoff.delay(1) <= Duration::from_secs(10));
        }
    }
}
