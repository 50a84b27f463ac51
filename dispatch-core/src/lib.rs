//! DISPATCH Core - Briefing Entity Types
//!
//! Pure data structures and deterministic logic for the briefing layer.
//! No I/O happens in this crate; storage and upstream calls live in
//! `dispatch-storage` and `dispatch-llm`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod briefing;
pub mod error;
pub mod lock;
pub mod receipt;
pub mod staleness;

pub use briefing::{BriefingField, BriefingRecord, BriefingStatus};
pub use error::{
    ConfigError, DispatchError, DispatchResult, ReceiptError, StorageError, UpstreamError,
};
pub use lock::LockData;
pub use receipt::{
    Receipt, ReceiptOutcome, ReceiptSchema, ReceiptValidator, SchemaField, SchemaKind,
    SchemaViolation,
};
pub use staleness::StalenessClass;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Lock owner identifier using UUIDv7 for timestamp-sortable IDs.
/// One per process instance, never derived from the hostname: two workers
/// on the same machine must not collide.
pub type OwnerId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 OwnerId (timestamp-sortable).
pub fn new_owner_id() -> OwnerId {
    Uuid::now_v7()
}

/// Reason string recorded when a generator validly produced no data.
///
/// Emptiness is cached like any other result so that "no data" does not
/// re-trigger generation on every read; a field carrying this reason with a
/// fresh timestamp is a cache hit, not a failure.
pub const EMPTY_RESPONSE_REASON: &str = "empty_response";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_owner_id_is_unique() {
        let a = new_owner_id();
        let b = new_owner_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_owner_ids_are_sortable_by_creation() {
        let earlier = new_owner_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let later = new_owner_id();
        assert!(earlier < later);
    }
}
