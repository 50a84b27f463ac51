//! Process-local single-flight map.
//!
//! Callers within one process awaiting the same key share a single
//! in-flight operation instead of issuing redundant upstream calls. This
//! is a same-process shortcut layered on top of the cross-process lock
//! table, never a replacement for it: other processes coordinate through
//! the lock alone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

type InflightMap<T> = Arc<Mutex<HashMap<String, watch::Receiver<Option<T>>>>>;

/// Keyed single-flight: the first caller per key becomes the leader, the
/// rest become followers awaiting the leader's broadcast.
#[derive(Debug)]
pub struct Singleflight<T> {
    inflight: InflightMap<T>,
}

impl<T> Default for Singleflight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Singleflight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Join the flight for `key`.
    pub fn join(&self, key: &str) -> Flight<T> {
        let mut map = lock_map(&self.inflight);
        if let Some(rx) = map.get(key) {
            return Flight::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        map.insert(key.to_string(), rx);
        Flight::Leader(FlightGuard {
            key: key.to_string(),
            sender: Some(tx),
            inflight: Arc::clone(&self.inflight),
        })
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        lock_map(&self.inflight).len()
    }
}

/// A mutex poisoned by a panicking leader still holds a usable map; the
/// entry cleanup in `Drop` must proceed regardless.
fn lock_map<T>(map: &InflightMap<T>) -> MutexGuard<'_, HashMap<String, watch::Receiver<Option<T>>>> {
    match map.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Role of one caller in a keyed flight.
pub enum Flight<T> {
    /// This caller performs the operation and broadcasts the result.
    Leader(FlightGuard<T>),
    /// This caller awaits the leader's result.
    Follower(watch::Receiver<Option<T>>),
}

/// Leader handle. Dropping it without `complete` closes the channel, which
/// followers observe as "leader gone, act on your own".
pub struct FlightGuard<T> {
    key: String,
    sender: Option<watch::Sender<Option<T>>>,
    inflight: InflightMap<T>,
}

impl<T> FlightGuard<T> {
    /// Broadcast the finished result to all followers and retire the key.
    pub fn complete(mut self, value: T) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Some(value));
        }
        // Entry removal happens in Drop.
    }
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        lock_map(&self.inflight).remove(&self.key);
    }
}

/// Await a follower channel until the leader broadcasts or disappears.
pub async fn await_flight<T: Clone>(mut rx: watch::Receiver<Option<T>>) -> Option<T> {
    loop {
        {
            let current = rx.borrow();
            if let Some(value) = current.as_ref() {
                return Some(value.clone());
            }
        }
        if rx.changed().await.is_err() {
            // Leader dropped without completing.
            let current = rx.borrow();
            return current.as_ref().cloned();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_leader_then_followers() {
        let flights: Singleflight<u32> = Singleflight::new();

        let Flight::Leader(guard) = flights.join("k") else {
            panic!("first caller should lead");
        };
        let Flight::Follower(rx) = flights.join("k") else {
            panic!("second caller should follow");
        };

        let waiter = tokio::spawn(await_flight(rx));
        guard.complete(42);

        assert_eq!(waiter.await.unwrap(), Some(42));
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_followers() {
        let flights: Singleflight<u32> = Singleflight::new();

        let Flight::Leader(guard) = flights.join("k") else {
            panic!("first caller should lead");
        };
        let Flight::Follower(rx) = flights.join("k") else {
            panic!("second caller should follow");
        };

        drop(guard);
        assert_eq!(await_flight(rx).await, None);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_key_is_reusable_after_completion() {
        let flights: Singleflight<u32> = Singleflight::new();

        let Flight::Leader(guard) = flights.join("k") else {
            panic!("expected leader");
        };
        guard.complete(1);

        assert!(matches!(flights.join("k"), Flight::Leader(_)));
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share_flights() {
        let flights: Singleflight<u32> = Singleflight::new();
        let Flight::Leader(a) = flights.join("a") else {
            panic!("expected leader for a");
        };
        assert!(matches!(flights.join("b"), Flight::Leader(_)));
        assert_eq!(flights.in_flight(), 1); // "b" guard already dropped
        drop(a);
    }

    #[tokio::test]
    async fn test_follower_sees_value_sent_before_await() {
        let flights: Singleflight<u32> = Singleflight::new();
        let Flight::Leader(guard) = flights.join("k") else {
            panic!("expected leader");
        };
        let Flight::Follower(rx) = flights.join("k") else {
            panic!("expected follower");
        };

        guard.complete(7);
        // The broadcast happened before anyone awaited; the stored value
        // must still be observable.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(await_flight(rx).await, Some(7));
    }
}
