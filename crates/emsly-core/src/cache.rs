// ── TTL entity cache ──
//
// Keyed storage for discovery data with lazy expiry and single-flight
// fetches. Values live in one `DashMap`; a second map holds a per-key
// gate so concurrent misses on the same key share one fetch while misses
// on different keys proceed independently.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use emsly_api::{Error as ApiError, SharedClock};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::CoreError;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }
}

/// Per-key fetch gate.
///
/// `epoch` moves every time a fetch under the gate completes, which lets a
/// waiter tell "the fetch I queued behind just failed" apart from "nobody
/// has fetched yet". `generation` moves when the key is invalidated so a
/// fetch started earlier does not write its result back.
#[derive(Debug, Default)]
struct Flight {
    epoch: AtomicU64,
    generation: AtomicU64,
    last_error: Mutex<Option<CoreError>>,
}

/// How long a fetched value lives, and how long a caller queues behind
/// another caller's fetch of the same key before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub ttl: Duration,
    pub wait: Duration,
}

impl Lookup {
    pub fn new(ttl: Duration, wait: Duration) -> Self {
        Self { ttl, wait }
    }
}

/// A concurrent TTL cache with single-flight misses.
///
/// Expired entries are dropped when they are next read; [`purge_expired`]
/// exists for callers that want to sweep eagerly. Failed fetches are never
/// cached, but callers already waiting on the failing fetch receive its
/// error instead of retrying it themselves. A gate lives only while some
/// caller is using it.
///
/// [`purge_expired`]: Self::purge_expired
pub struct EntityCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    flights: DashMap<K, Arc<Flight>>,
    /// Bumped by `clear` so no fetch started before it writes back.
    cleared: AtomicU64,
    clock: SharedClock,
}

impl<K, V> EntityCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            flights: DashMap::new(),
            cleared: AtomicU64::new(0),
            clock,
        }
    }

    /// Return the cached value for `key`, or run `fetch` and cache its
    /// result for `lookup.ttl`.
    ///
    /// Queueing behind a concurrent fetch of the same key is bounded by
    /// `lookup.wait`; past it the caller gets [`ApiError::Timeout`] while
    /// the other fetch carries on.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, lookup: Lookup, fetch: F) -> Result<V, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CoreError>>,
    {
        if let Some(value) = self.get(&key) {
            trace!("cache hit");
            return Ok(value);
        }

        let flight = Arc::clone(&*self.flights.entry(key.clone()).or_default());
        let outcome = self.fetch_under(&key, &flight, lookup, fetch).await;
        self.release(&key, &flight);
        outcome
    }

    async fn fetch_under<F, Fut>(
        &self,
        key: &K,
        flight: &Flight,
        lookup: Lookup,
        fetch: F,
    ) -> Result<V, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CoreError>>,
    {
        let observed = flight.epoch.load(Ordering::Acquire);
        let Ok(mut last_error) = tokio::time::timeout(lookup.wait, flight.last_error.lock()).await
        else {
            debug!(wait = ?lookup.wait, "gave up waiting on concurrent fetch");
            return Err(ApiError::Timeout {
                deadline: lookup.wait,
            }
            .into());
        };

        // Someone else filled the slot while we waited.
        if let Some(value) = self.get(key) {
            trace!("cache filled by concurrent fetch");
            return Ok(value);
        }
        let fetched_while_waiting = flight.epoch.load(Ordering::Acquire) != observed;
        if let (true, Some(err)) = (fetched_while_waiting, last_error.as_ref()) {
            return Err(err.clone());
        }

        trace!("cache miss, fetching");
        let generation = flight.generation.load(Ordering::Acquire);
        let cleared = self.cleared.load(Ordering::Acquire);
        let outcome = fetch().await;
        flight.epoch.fetch_add(1, Ordering::AcqRel);

        match outcome {
            Ok(value) => {
                *last_error = None;
                let current = flight.generation.load(Ordering::Acquire) == generation
                    && self.cleared.load(Ordering::Acquire) == cleared;
                if current {
                    self.insert(key.clone(), value.clone(), lookup.ttl);
                }
                Ok(value)
            }
            Err(err) => {
                *last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Drop the gate for `key` if the map and `flight` hold the only
    /// references. A caller arriving afterwards creates a new one.
    fn release(&self, key: &K, flight: &Arc<Flight>) {
        self.flights.remove_if(key, |_, held| {
            Arc::ptr_eq(held, flight) && Arc::strong_count(held) <= 2
        });
    }

    /// Peek at a live entry without fetching.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired_at(now) {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired_at(now));
        None
    }

    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: self.clock.now(),
                ttl,
            },
        );
    }

    /// Remove one entry. Returns `true` if it was present.
    pub fn invalidate(&self, key: &K) -> bool {
        if let Some(flight) = self.flights.get(key) {
            flight.generation.fetch_add(1, Ordering::AcqRel);
        }
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.cleared.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        before.saturating_sub(self.entries.len())
    }
}

impl<K: Eq + Hash, V> std::fmt::Debug for EntityCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("entries", &self.entries.len())
            .field("in_flight", &self.flights.len())
            .finish_non_exhaustive()
    }
}
