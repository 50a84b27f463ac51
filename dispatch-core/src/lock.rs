//! Lock record for the storage-backed TTL lock.
//!
//! One row per key. Ownership is live only while `expires_at` is in the
//! future; an expired row can be taken over by any owner, which is how the
//! system recovers from a crashed holder without manual intervention.

use crate::{OwnerId, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A lock row as persisted in the lock table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockData {
    pub key: String,
    pub owner_id: OwnerId,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
    pub last_beat_at: Timestamp,
}

impl LockData {
    /// Create a fresh lock row owned by `owner_id`, expiring after `ttl`.
    pub fn new(key: impl Into<String>, owner_id: OwnerId, now: Timestamp, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            owner_id,
            acquired_at: now,
            expires_at: now + chrono_ttl(ttl),
            last_beat_at: now,
        }
    }

    /// Check if the lock has expired based on current time.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Check if the lock is currently held by `owner_id`.
    ///
    /// An expired row is held by nobody, even if the owner matches.
    pub fn is_held_by(&self, owner_id: OwnerId, now: Timestamp) -> bool {
        self.owner_id == owner_id && !self.is_expired(now)
    }

    /// Calculate remaining duration until expiry.
    pub fn remaining(&self, now: Timestamp) -> Option<Duration> {
        if now >= self.expires_at {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }

    /// Push the expiry out by `ttl` from `now` and record the heartbeat.
    ///
    /// Used both for owner re-entry and for heartbeat extension during a
    /// long-running refresh.
    pub fn beat(&mut self, now: Timestamp, ttl: Duration) {
        self.expires_at = now + chrono_ttl(ttl);
        self.last_beat_at = now;
    }
}

fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl)
        .unwrap_or_else(|_| chrono::Duration::milliseconds(ttl.as_millis() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_owner_id;
    use chrono::Utc;

    fn make_lock(ttl_secs: u64) -> LockData {
        LockData::new(
            "loc:dfw",
            new_owner_id(),
            Utc::now(),
            Duration::from_secs(ttl_secs),
        )
    }

    #[test]
    fn test_fresh_lock_is_not_expired() {
        let lock = make_lock(30);
        assert!(!lock.is_expired(Utc::now()));
        assert!(lock.remaining(Utc::now()).is_some());
    }

    #[test]
    fn test_expired_lock() {
        let mut lock = make_lock(30);
        lock.expires_at = Utc::now() - chrono::Duration::seconds(1);
        assert!(lock.is_expired(Utc::now()));
        assert!(lock.remaining(Utc::now()).is_none());
    }

    #[test]
    fn test_is_held_by_requires_liveness() {
        let mut lock = make_lock(30);
        let owner = lock.owner_id;
        let now = Utc::now();
        assert!(lock.is_held_by(owner, now));
        assert!(!lock.is_held_by(new_owner_id(), now));

        lock.expires_at = now - chrono::Duration::seconds(1);
        // Matching owner on an expired row is not ownership.
        assert!(!lock.is_held_by(owner, now));
    }

    #[test]
    fn test_beat_extends_expiry() {
        let mut lock = make_lock(30);
        let original_expires = lock.expires_at;
        let later = Utc::now() + chrono::Duration::seconds(20);

        lock.beat(later, Duration::from_secs(30));
        assert!(lock.expires_at > original_expires);
        assert_eq!(lock.last_beat_at, later);
    }
}
