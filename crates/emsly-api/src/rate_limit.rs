// Admission control per cost class
//
// Each class owns an independent GCRA limiter. GCRA with a burst allowance
// behaves as a continuously refilled token bucket: `burst` acquisitions go
// through immediately, after which one slot opens every `1 / rate` seconds.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use governor::{Quota, RateLimiter as Gcra};
use strum::{Display, EnumString};
use tracing::trace;

use crate::error::Error;

type DirectLimiter = Gcra<NotKeyed, InMemoryState, DefaultClock>;

/// Which bucket a request draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum CostClass {
    /// Metadata lookups: systems, databases, fields, analytics, assets.
    Discovery,
    /// Record queries and analytics time series.
    Query,
}

/// Bucket parameters: `rate` tokens per second, capacity `burst`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub rate_per_sec: f64,
    pub burst: u32,
}

impl RateLimit {
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        Self {
            rate_per_sec,
            burst,
        }
    }

    fn quota(self) -> Result<Quota, Error> {
        if !(self.rate_per_sec.is_finite() && self.rate_per_sec > 0.0) {
            return Err(Error::Configuration(format!(
                "rate limit must be a positive number of requests per second, got {}",
                self.rate_per_sec
            )));
        }
        let burst = NonZeroU32::new(self.burst)
            .ok_or_else(|| Error::Configuration("rate limit burst must be at least 1".into()))?;
        let period = Duration::try_from_secs_f64(1.0 / self.rate_per_sec)
            .ok()
            .filter(|period| u64::try_from(period.as_nanos()).is_ok())
            .ok_or_else(|| {
                Error::Configuration(format!("rate {} per second is too low", self.rate_per_sec))
            })?;
        let quota = Quota::with_period(period).ok_or_else(|| {
            Error::Configuration(format!("rate {} per second is too high", self.rate_per_sec))
        })?;
        Ok(quota.allow_burst(burst))
    }
}

/// Token-bucket limiter for one cost class.
///
/// Never rejects: [`acquire`](Self::acquire) suspends the caller until a
/// token is available. Cloning shares the bucket.
#[derive(Clone)]
pub struct RateLimiter {
    class: CostClass,
    limit: RateLimit,
    inner: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("class", &self.class)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(class: CostClass, limit: RateLimit) -> Result<Self, Error> {
        Ok(Self {
            class,
            limit,
            inner: Arc::new(Gcra::direct(limit.quota()?)),
        })
    }

    /// Wait until one token is available, then take it.
    pub async fn acquire(&self) {
        if self.inner.check().is_ok() {
            return;
        }
        trace!(cost = %self.class, "rate limiter throttling");
        self.inner.until_ready().await;
    }

    /// Take a token only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.inner.check().is_ok()
    }

    pub fn class(&self) -> CostClass {
        self.class
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }
}

/// Limits for both cost classes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimits {
    pub discovery: RateLimit,
    pub query: RateLimit,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            discovery: RateLimit::new(10.0, 20),
            query: RateLimit::new(2.0, 4),
        }
    }
}

/// The pair of limiters an `EmsClient` consults.
#[derive(Debug, Clone)]
pub(crate) struct Limiters {
    discovery: RateLimiter,
    query: RateLimiter,
}

impl Limiters {
    pub(crate) fn new(limits: RateLimits) -> Result<Self, Error> {
        Ok(Self {
            discovery: RateLimiter::new(CostClass::Discovery, limits.discovery)?,
            query: RateLimiter::new(CostClass::Query, limits.query)?,
        })
    }

    pub(crate) fn for_class(&self, class: CostClass) -> &RateLimiter {
        match class {
            CostClass::Discovery => &self.discovery,
            CostClass::Query => &self.query,
        }
    }
}
