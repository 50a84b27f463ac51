//! LMDB-backed lock and briefing store.
//!
//! Uses the heed crate (Rust bindings for LMDB). LMDB allows a single
//! write transaction at a time across every process sharing the
//! environment, so the lock's read-check-upsert runs as one atomic step
//! with exactly the conditional-update semantics the lock table requires.
//!
//! Layout: two named databases in one environment, `locks` (key →
//! `LockData` JSON) and `briefings` (key → `BriefingRecord` JSON).

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use dispatch_core::{
    BriefingRecord, DispatchError, DispatchResult, LockData, OwnerId, StorageError,
};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use std::time::Duration;
use tracing::{debug, warn};

use crate::traits::{BriefingStore, LockStore};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for DispatchError {
    fn from(e: LmdbStoreError) -> Self {
        DispatchError::Storage(StorageError::TransactionFailed {
            reason: e.to_string(),
        })
    }
}

/// LMDB-backed implementation of both storage traits.
#[derive(Clone)]
pub struct LmdbStore {
    env: Env,
    locks: Database<Str, Bytes>,
    briefings: Database<Str, Bytes>,
}

impl LmdbStore {
    /// Open (or create) the store at `path`.
    ///
    /// # Arguments
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the environment in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let locks: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some("locks"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let briefings: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some("briefings"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            locks,
            briefings,
        })
    }

    fn read_lock(
        &self,
        rtxn: &heed::RoTxn<'_>,
        key: &str,
    ) -> Result<Option<LockData>, LmdbStoreError> {
        match self
            .locks
            .get(rtxn, key)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
        {
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| LmdbStoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn write_lock(
        &self,
        wtxn: &mut heed::RwTxn<'_>,
        lock: &LockData,
    ) -> Result<(), LmdbStoreError> {
        let bytes =
            serde_json::to_vec(lock).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;
        self.locks
            .put(wtxn, &lock.key, &bytes)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }
}

impl std::fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStore")
            .field("path", &self.env.path())
            .finish()
    }
}

#[async_trait]
impl LockStore for LmdbStore {
    async fn acquire(&self, key: &str, owner: OwnerId, ttl: Duration) -> DispatchResult<bool> {
        let now = Utc::now();
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let current = self.read_lock(&wtxn, key)?;
        let acquired = match current {
            None => {
                self.write_lock(&mut wtxn, &LockData::new(key, owner, now, ttl))?;
                true
            }
            Some(existing) if existing.is_expired(now) => {
                debug!(key, new_owner = %owner, old_owner = %existing.owner_id, "lock takeover after expiry");
                self.write_lock(&mut wtxn, &LockData::new(key, owner, now, ttl))?;
                true
            }
            Some(mut existing) if existing.owner_id == owner => {
                // Re-entry by the current owner extends the expiry.
                existing.beat(now, ttl);
                self.write_lock(&mut wtxn, &existing)?;
                true
            }
            Some(_) => false,
        };

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(acquired)
    }

    async fn release(&self, key: &str, owner: OwnerId) -> DispatchResult<bool> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let released = match self.read_lock(&wtxn, key)? {
            Some(existing) if existing.owner_id == owner => self
                .locks
                .delete(&mut wtxn, key)
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?,
            _ => false,
        };

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(released)
    }

    async fn extend(&self, key: &str, owner: OwnerId, ttl: Duration) -> DispatchResult<bool> {
        let now = Utc::now();
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let extended = match self.read_lock(&wtxn, key)? {
            Some(mut existing) if existing.is_held_by(owner, now) => {
                existing.beat(now, ttl);
                self.write_lock(&mut wtxn, &existing)?;
                true
            }
            _ => {
                warn!(key, owner = %owner, "extend refused: caller does not hold the lock");
                false
            }
        };

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(extended)
    }

    async fn sweep(&self) -> DispatchResult<u64> {
        let now = Utc::now();
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut expired: Vec<String> = Vec::new();
        {
            let iter = self
                .locks
                .iter(&wtxn)
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            for entry in iter {
                let (key, bytes) =
                    entry.map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
                match serde_json::from_slice::<LockData>(bytes) {
                    Ok(lock) if lock.is_expired(now) => expired.push(key.to_string()),
                    Ok(_) => {}
                    // An undecodable row can never be released by an owner;
                    // sweep is the only way it leaves the table.
                    Err(_) => expired.push(key.to_string()),
                }
            }
        }

        for key in &expired {
            self.locks
                .delete(&mut wtxn, key)
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(expired.len() as u64)
    }

    async fn get(&self, key: &str) -> DispatchResult<Option<LockData>> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(self.read_lock(&rtxn, key)?)
    }
}

#[async_trait]
impl BriefingStore for LmdbStore {
    async fn get(&self, key: &str) -> DispatchResult<Option<BriefingRecord>> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        match self
            .briefings
            .get(&rtxn, key)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes).map_err(|e| {
                LmdbStoreError::Serialization(e.to_string())
            })?)),
            None => Ok(None),
        }
    }

    async fn put(&self, record: &BriefingRecord) -> DispatchResult<()> {
        let bytes =
            serde_json::to_vec(record).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        self.briefings
            .put(&mut wtxn, &record.key, &bytes)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(())
    }

    async fn insert_placeholder(&self, record: &BriefingRecord) -> DispatchResult<bool> {
        let bytes =
            serde_json::to_vec(record).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let exists = self
            .briefings
            .get(&wtxn, &record.key)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
            .is_some();
        if exists {
            wtxn.abort();
            return Ok(false);
        }

        self.briefings
            .put(&mut wtxn, &record.key, &bytes)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(true)
    }
}

// =============================================================================
// TESTS
// =============================================================================
