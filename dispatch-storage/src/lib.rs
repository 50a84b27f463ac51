//! DISPATCH Storage - lock and briefing persistence
//!
//! Storage traits for the TTL lock table and the cached briefing table,
//! with two backends: an in-memory store for tests and single-process
//! deployments, and an LMDB store whose single-writer transactions make the
//! lock's conditional upsert atomic across processes sharing the
//! environment.

pub mod lmdb;
pub mod memory;
pub mod traits;

pub use lmdb::{LmdbStore, LmdbStoreError};
pub use memory::{MemoryBriefingStore, MemoryLockStore};
pub use traits::{BriefingStore, LockStore};
