//! In-memory backends.
//!
//! Each lock operation runs inside a single `RwLock` critical section,
//! which is what gives `acquire` its one-atomic-step semantics in this
//! backend. Used by tests and by single-process deployments where the
//! process-local single-flight map already serializes generation.

use async_trait::async_trait;
use chrono::Utc;
use dispatch_core::{BriefingRecord, DispatchResult, LockData, OwnerId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::traits::{BriefingStore, LockStore};

/// In-memory lock table.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    locks: RwLock<HashMap<String, LockData>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire(&self, key: &str, owner: OwnerId, ttl: Duration) -> DispatchResult<bool> {
        let now = Utc::now();
        let mut locks = self.locks.write().await;
        match locks.get_mut(key) {
            None => {
                locks.insert(key.to_string(), LockData::new(key, owner, now, ttl));
                Ok(true)
            }
            Some(existing) if existing.is_expired(now) => {
                debug!(key, new_owner = %owner, old_owner = %existing.owner_id, "lock takeover after expiry");
                *existing = LockData::new(key, owner, now, ttl);
                Ok(true)
            }
            Some(existing) if existing.owner_id == owner => {
                // Re-entry by the current owner extends the expiry.
                existing.beat(now, ttl);
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    async fn release(&self, key: &str, owner: OwnerId) -> DispatchResult<bool> {
        let mut locks = self.locks.write().await;
        let owned = matches!(locks.get(key), Some(existing) if existing.owner_id == owner);
        if owned {
            locks.remove(key);
        }
        Ok(owned)
    }

    async fn extend(&self, key: &str, owner: OwnerId, ttl: Duration) -> DispatchResult<bool> {
        let now = Utc::now();
        let mut locks = self.locks.write().await;
        match locks.get_mut(key) {
            Some(existing) if existing.is_held_by(owner, now) => {
                existing.beat(now, ttl);
                Ok(true)
            }
            _ => {
                warn!(key, owner = %owner, "extend refused: caller does not hold the lock");
                Ok(false)
            }
        }
    }

    async fn sweep(&self) -> DispatchResult<u64> {
        let now = Utc::now();
        let mut locks = self.locks.write().await;
        let before = locks.len();
        locks.retain(|_, lock| !lock.is_expired(now));
        Ok((before - locks.len()) as u64)
    }

    async fn get(&self, key: &str) -> DispatchResult<Option<LockData>> {
        Ok(self.locks.read().await.get(key).cloned())
    }
}

/// In-memory briefing record table.
#[derive(Debug, Default)]
pub struct MemoryBriefingStore {
    records: RwLock<HashMap<String, BriefingRecord>>,
}

impl MemoryBriefingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BriefingStore for MemoryBriefingStore {
    async fn get(&self, key: &str) -> DispatchResult<Option<BriefingRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn put(&self, record: &BriefingRecord) -> DispatchResult<()> {
        self.records
            .write()
            .await
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn insert_placeholder(&self, record: &BriefingRecord) -> DispatchResult<bool> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.key) {
            return Ok(false);
        }
        records.insert(record.key.clone(), record.clone());
        Ok(true)
    }
}

// =============================================================================
// TESTS
// =============================================================================
