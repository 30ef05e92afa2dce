//! Request-time cache with TTL freshness and single-flight.
//!
//! Concurrent misses for the same repository collapse to one in-flight
//! computation; the extra callers block on its result (or their own
//! cancellation). An invalidation during a flight removes the entry, so
//! the flight's result is handed to its waiters but never re-enters the
//! map.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::cancel::Cancel;
use crate::core::RepoId;
use crate::error::ErrorKind;

const WAIT_SLICE: Duration = Duration::from_millis(25);

/// Error observed by a waiter whose leader failed.
#[derive(Debug, Error, Clone)]
#[error("shared computation failed: {message}")]
pub struct SharedFailure {
    pub kind: ErrorKind,
    pub message: String,
}

pub struct TtlCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<RepoId, Slot<T>>>,
}

enum Slot<T> {
    Ready { value: Arc<T>, computed_at: Instant },
    InFlight(Arc<Flight<T>>),
}

struct Flight<T> {
    state: Mutex<Option<Outcome<T>>>,
    done: Condvar,
}

enum Outcome<T> {
    Ok(Arc<T>),
    Failed(SharedFailure),
}

impl<T> Flight<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn resolve(&self, outcome: Outcome<T>) {
        *lock(&self.state) = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self, cancel: &Cancel) -> crate::Result<Arc<T>> {
        let mut state = lock(&self.state);
        loop {
            match state.as_ref() {
                Some(Outcome::Ok(value)) => return Ok(Arc::clone(value)),
                Some(Outcome::Failed(failure)) => return Err(failure.clone().into()),
                None => {}
            }
            cancel.checkpoint()?;
            state = self
                .done
                .wait_timeout(state, WAIT_SLICE)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl<T> TtlCache<T> {
    /// A TTL of zero means entries are never fresh: every request
    /// recomputes (still single-flight under concurrency).
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get_if_fresh(&self, repo: RepoId) -> Option<Arc<T>> {
        match lock(&self.entries).get(&repo) {
            Some(Slot::Ready { value, computed_at }) if computed_at.elapsed() < self.ttl => {
                Some(Arc::clone(value))
            }
            _ => None,
        }
    }

    /// Return a fresh entry, or compute one.
    ///
    /// Exactly one caller per repository runs `compute` at a time; the
    /// rest share its outcome.
    pub fn get_or_compute<F>(&self, repo: RepoId, cancel: &Cancel, compute: F) -> crate::Result<Arc<T>>
    where
        F: FnOnce() -> crate::Result<T>,
    {
        let flight = {
            let mut entries = lock(&self.entries);
            match entries.get(&repo) {
                Some(Slot::Ready { value, computed_at }) if computed_at.elapsed() < self.ttl => {
                    return Ok(Arc::clone(value));
                }
                Some(Slot::InFlight(flight)) => {
                    let flight = Arc::clone(flight);
                    drop(entries);
                    return flight.wait(cancel);
                }
                _ => {
                    let flight = Arc::new(Flight::new());
                    entries.insert(repo, Slot::InFlight(Arc::clone(&flight)));
                    flight
                }
            }
        };

        // Leader path: compute without holding the map lock.
        match compute() {
            Ok(value) => {
                let value = Arc::new(value);
                let mut entries = lock(&self.entries);
                flight.resolve(Outcome::Ok(Arc::clone(&value)));
                let still_current = matches!(
                    entries.get(&repo),
                    Some(Slot::InFlight(current)) if Arc::ptr_eq(current, &flight)
                );
                // An invalidation during the flight removed the slot;
                // the result goes to the waiters but not into the map.
                if still_current {
                    entries.insert(
                        repo,
                        Slot::Ready {
                            value: Arc::clone(&value),
                            computed_at: Instant::now(),
                        },
                    );
                }
                Ok(value)
            }
            Err(err) => {
                let mut entries = lock(&self.entries);
                flight.resolve(Outcome::Failed(SharedFailure {
                    kind: err.kind(),
                    message: err.to_string(),
                }));
                let still_current = matches!(
                    entries.get(&repo),
                    Some(Slot::InFlight(current)) if Arc::ptr_eq(current, &flight)
                );
                if still_current {
                    entries.remove(&repo);
                }
                Err(err)
            }
        }
    }

    /// Drop the in-memory entry; an in-flight computation keeps running
    /// but its result will not be cached.
    pub fn remove(&self, repo: RepoId) {
        lock(&self.entries).remove(&repo);
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fresh_entry_is_returned_without_recompute() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let repo = RepoId::new(1);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cache
                .get_or_compute(repo, &Cancel::new(), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7usize)
                })
                .unwrap();
            assert_eq!(*value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_ttl_always_recomputes() {
        let cache = TtlCache::new(Duration::ZERO);
        let repo = RepoId::new(1);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            cache
                .get_or_compute(repo, &Cancel::new(), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stale_entry_triggers_recompute() {
        let cache = TtlCache::new(Duration::from_millis(20));
        let repo = RepoId::new(1);
        cache
            .get_or_compute(repo, &Cancel::new(), || Ok(1usize))
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let value = cache
            .get_or_compute(repo, &Cancel::new(), || Ok(2usize))
            .unwrap();
        assert_eq!(*value, 2);
    }

    #[test]
    fn invalidation_forces_fresh_computation() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let repo = RepoId::new(1);
        cache
            .get_or_compute(repo, &Cancel::new(), || Ok(1usize))
            .unwrap();
        cache.remove(repo);
        let value = cache
            .get_or_compute(repo, &Cancel::new(), || Ok(2usize))
            .unwrap();
        assert_eq!(*value, 2);
    }

    #[test]
    fn concurrent_cold_reads_collapse_to_one_flight() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60)));
        let repo = RepoId::new(1);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(std::thread::spawn(move || {
                let value = cache
                    .get_or_compute(repo, &Cancel::new(), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(50));
                        Ok(41usize)
                    })
                    .unwrap();
                assert_eq!(*value, 41);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn waiters_observe_leader_failure() {
        let cache = Arc::new(TtlCache::<usize>::new(Duration::from_secs(60)));
        let repo = RepoId::new(1);

        let leader = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                let result = cache.get_or_compute(repo, &Cancel::new(), || {
                    std::thread::sleep(Duration::from_millis(60));
                    Err(crate::cancel::Cancelled.into())
                });
                assert!(result.is_err());
            })
        };
        std::thread::sleep(Duration::from_millis(10));
        let waiter = cache.get_or_compute(repo, &Cancel::new(), || Ok(1));
        assert!(waiter.is_err());
        leader.join().unwrap();

        // The failed entry is gone; the next caller computes.
        let value = cache.get_or_compute(repo, &Cancel::new(), || Ok(5)).unwrap();
        assert_eq!(*value, 5);
    }

    #[test]
    fn cancelled_waiter_returns_promptly() {
        let cache = Arc::new(TtlCache::<usize>::new(Duration::from_secs(60)));
        let repo = RepoId::new(1);

        let leader = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                let _ = cache.get_or_compute(repo, &Cancel::new(), || {
                    std::thread::sleep(Duration::from_millis(200));
                    Ok(1)
                });
            })
        };
        std::thread::sleep(Duration::from_millis(10));
        let cancel = Cancel::new();
        cancel.cancel();
        let err = cache.get_or_compute(repo, &cancel, || Ok(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
        leader.join().unwrap();
    }

    #[test]
    fn invalidation_during_flight_is_not_overwritten() {
        let cache = Arc::new(TtlCache::<usize>::new(Duration::from_secs(60)));
        let repo = RepoId::new(1);

        let leader = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                cache
                    .get_or_compute(repo, &Cancel::new(), || {
                        std::thread::sleep(Duration::from_millis(80));
                        Ok(1)
                    })
                    .unwrap()
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        cache.remove(repo);
        let value = leader.join().unwrap();
        assert_eq!(*value, 1);
        // The stale flight result did not re-enter the map.
        assert!(cache.get_if_fresh(repo).is_none());
    }

    #[test]
    fn repositories_are_independent() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache
            .get_or_compute(RepoId::new(1), &Cancel::new(), || Ok(1usize))
            .unwrap();
        cache
            .get_or_compute(RepoId::new(2), &Cancel::new(), || Ok(2usize))
            .unwrap();
        assert_eq!(cache.len(), 2);
        cache.remove(RepoId::new(1));
        assert_eq!(*cache.get_if_fresh(RepoId::new(2)).unwrap(), 2);
    }
}
