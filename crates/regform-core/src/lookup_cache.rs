use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::singleflight::{FlightWaiter, Flights};

#[derive(Default)]
struct CacheState {
    values: HashMap<String, bool>,
    flights: Flights<bool>,
}

/// Session-scoped memo of existence results plus the in-flight reservation
/// set.
///
/// Keys are the exact candidate strings; no trimming or case folding is
/// applied. Entries are never evicted. Values and reservations share one lock
/// so a caller sees either a recorded result, a reservation to join, or
/// neither, and never an in-between state.
#[derive(Default)]
pub struct LookupCache {
    state: Mutex<CacheState>,
    stats: CacheCounters,
}

/// Outcome of [`LookupCache::begin`].
pub enum Flight<'a> {
    /// A result was already recorded.
    Cached(bool),
    /// The caller reserved the key and must perform the lookup.
    Leader(FlightTicket<'a>),
    /// Another caller holds the reservation; wait for its outcome.
    Follower(FlightWaiter<bool>),
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.state().values.get(key).copied()
    }

    pub fn set(&self, key: &str, exists: bool) {
        self.state().values.insert(key.to_string(), exists);
    }

    pub fn has_in_flight(&self, key: &str) -> bool {
        self.state().flights.contains(key)
    }

    /// Reserve `key` for a lookup. Returns `false` if it was already reserved.
    pub fn reserve_in_flight(&self, key: &str) -> bool {
        self.state().flights.reserve(key)
    }

    /// Drop the reservation for `key` and wake everyone waiting on it with
    /// whatever result has been recorded by then.
    pub fn release_in_flight(&self, key: &str) {
        let mut state = self.state();
        if let Some(flight) = state.flights.release(key) {
            let outcome = state.values.get(key).copied();
            flight.settle(outcome);
        }
    }

    /// Look up, join, or reserve `key` in a single critical section.
    pub fn begin(&self, key: &str) -> Flight<'_> {
        let mut state = self.state();
        if let Some(exists) = state.values.get(key).copied() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Flight::Cached(exists);
        }
        if let Some(waiter) = state.flights.join(key) {
            self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
            return Flight::Follower(waiter);
        }
        state.flights.reserve(key);
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        Flight::Leader(FlightTicket {
            cache: self,
            key: key.to_string(),
            settled: false,
        })
    }

    pub fn stats(&self) -> LookupCacheStats {
        let state = self.state();
        LookupCacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            coalesced: self.stats.coalesced.load(Ordering::Relaxed),
            entries: state.values.len() as u64,
            in_flight: state.flights.len() as u64,
        }
    }
}

/// Reservation held by the caller that performs a lookup.
///
/// Dropping the ticket without calling [`FlightTicket::complete`] releases
/// the reservation, and followers retry on their own.
pub struct FlightTicket<'a> {
    cache: &'a LookupCache,
    key: String,
    settled: bool,
}

impl FlightTicket<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Record the result, then release the reservation before any follower
    /// observes it.
    pub fn complete(mut self, exists: bool) {
        let mut state = self.cache.state();
        state.values.insert(self.key.clone(), exists);
        if let Some(flight) = state.flights.release(&self.key) {
            flight.settle(Some(exists));
        }
        self.settled = true;
    }
}

impl Drop for FlightTicket<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(key = %self.key, "lookup abandoned before completion");
            self.cache.release_in_flight(&self.key);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LookupCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub entries: u64,
    pub in_flight: u64,
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}
