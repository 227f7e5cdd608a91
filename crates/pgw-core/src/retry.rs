//! Backoff policy for delta-stream resubscription.
//!
//! The streaming phase never gives up on the config store: transient
//! stream failures are retried with exponential backoff plus jitter,
//! capped at an environment-specific maximum delay. The policy is a small
//! value object so it can be tuned from settings and exercised directly
//! in tests.

use crate::settings::Environment;
use std::time::Duration;

/// Exponent cap; beyond this the delay is saturated at `max_delay` anyway.
const MAX_EXPONENT: u32 = 64;

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts before giving up. Defaults to effectively
    /// unbounded; the stream contract is "never give up".
    max_attempts: u32,
    /// Delay before the first retry.
    initial_delay: Duration,
    /// Upper bound for any single delay (pre-jitter).
    max_delay: Duration,
    /// Multiplier applied per attempt.
    multiplier: f64,
    /// Jitter fraction: the final delay is scaled by a random factor in
    /// `[1.0, 1.0 + jitter]`.
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: u32::MAX,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.4,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given initial delay and default bounds.
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            ..Default::default()
        }
    }

    /// Creates the policy for an environment: defaults capped at the
    /// environment's maximum stream backoff.
    pub fn for_environment(environment: Environment) -> Self {
        Self::default().with_max_delay(environment.max_stream_backoff())
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the maximum per-attempt delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter fraction.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Maximum per-attempt delay (pre-jitter).
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Computes the delay for an attempt number (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(MAX_EXPONENT) as i32;
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let jittered = if self.jitter > 0.0 {
            capped * (1.0 + rand_fraction() * self.jitter)
        } else {
            capped
        };

        Duration::from_millis(jittered as u64)
    }
}

/// Pseudo-random fraction in `[0.0, 1.0)` from the clock's sub-second
/// nanos; good enough to decorrelate retry storms.
fn rand_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}
