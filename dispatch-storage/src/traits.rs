//! Storage traits for the lock table and the briefing record table.
//!
//! Readers never go through the lock: the briefing table allows concurrent
//! reads at any time, and the lock only serializes writers during a refresh
//! pass.

use async_trait::async_trait;
use dispatch_core::{BriefingRecord, DispatchResult, LockData, OwnerId};
use std::time::Duration;

/// Keyed TTL lock backed by a shared table.
///
/// Contention is not an error: `acquire` returning `Ok(false)` tells the
/// caller to fall back to cached data. Errors are reserved for storage
/// infrastructure failures, which callers must treat as "not acquired":
/// fail toward not generating, never toward false ownership.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Try to acquire `key` for `owner` with the given TTL.
    ///
    /// Must behave as one atomic step. Exactly one of the following holds
    /// after the call:
    /// - `true`: no row existed, the row had expired, or `owner` already
    ///   held the key (re-entry; the expiry is extended);
    /// - `false`: another live owner holds the key.
    async fn acquire(&self, key: &str, owner: OwnerId, ttl: Duration) -> DispatchResult<bool>;

    /// Release `key` if and only if `owner` still owns it.
    ///
    /// A stale release racing an expiry takeover must not delete the new
    /// owner's row; such a call returns `Ok(false)`.
    async fn release(&self, key: &str, owner: OwnerId) -> DispatchResult<bool>;

    /// Extend the expiry of `key` for its current owner (heartbeat).
    ///
    /// Returns `Ok(false)` without touching the row when `owner` no longer
    /// holds the key; extending someone else's lock is a correctness bug,
    /// not a success.
    async fn extend(&self, key: &str, owner: OwnerId, ttl: Duration) -> DispatchResult<bool>;

    /// Remove every expired row, returning the count removed.
    ///
    /// Safe to run periodically; `acquire` is expiry-aware on its own and
    /// never depends on sweeping.
    async fn sweep(&self) -> DispatchResult<u64>;

    /// Inspect the current row for `key`, expired or not.
    async fn get(&self, key: &str) -> DispatchResult<Option<LockData>>;
}

/// Cached briefing record table.
#[async_trait]
pub trait BriefingStore: Send + Sync {
    /// Read the record for `key`, if any.
    async fn get(&self, key: &str) -> DispatchResult<Option<BriefingRecord>>;

    /// Write (upsert) a record.
    async fn put(&self, record: &BriefingRecord) -> DispatchResult<()>;

    /// Insert `record` only if no record exists for its key.
    ///
    /// Returns `true` when the insert claimed the key; `false` when another
    /// writer got there first. Used to publish the in-progress placeholder
    /// exactly once under racing readers.
    async fn insert_placeholder(&self, record: &BriefingRecord) -> DispatchResult<bool>;
}
