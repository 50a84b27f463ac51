//! DISPATCH Engine - generation coordination
//!
//! The staleness-aware coordinator that sits between cheap reads and
//! expensive generation: it claims keys with placeholders, partitions
//! fields by staleness class, serializes writers through the distributed
//! TTL lock (with a heartbeat keeper), drives each refresh through the
//! retry budget and the receipt validator, and merges only validated
//! results. A process-local single-flight map deduplicates callers within
//! one process on top of the cross-process lock, never instead of it.
//!
//! Also home to the exploration ranker used to order candidate sub-items
//! under uncertainty while emitting exact selection propensities.

pub mod config;
pub mod coordinator;
pub mod explore;
pub mod singleflight;

pub use config::EngineConfig;
pub use coordinator::{BriefingView, Coordinator, FieldSpec, ViewStatus};
pub use explore::{epsilon_choose, Propensity, Ranked, Scored};
pub use singleflight::{Flight, Singleflight};
