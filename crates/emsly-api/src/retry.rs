//! Retry policy with exponential backoff and jitter.

use std::time::Duration;

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay: Duration },
    /// `base * factor^attempt`, capped at `max`.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        /// Scale each delay by a random factor in `[0.5, 1.5)`.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let capped = seconds.min(max.as_secs_f64()).max(0.0);

                let scaled = if jitter {
                    capped * (0.5 + fastrand::f64())
                } else {
                    capped
                };
                Duration::from_secs_f64(scaled)
            }
        }
    }
}

/// Bounds for the retrying client.
///
/// Transport failures and 5xx responses share `max_retries`; 429 responses
/// have their own allowance. `budget` caps the wall-clock time of one
/// logical request, attempts and waits included, regardless of which
/// allowance is left.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after a transport failure or a 5xx response.
    pub max_retries: u32,
    /// Retries after a 429 response.
    pub max_rate_limit_retries: u32,
    pub backoff: Backoff,
    /// No retry is scheduled if it would end past this much time since the
    /// first attempt started.
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_rate_limit_retries: 5,
            backoff: Backoff::default(),
            budget: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Exponential policy with the default backoff and `max_retries`.
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Fixed-delay policy, mostly for tests.
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            max_rate_limit_retries: max_retries,
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    /// No retries at all.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            max_rate_limit_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}
