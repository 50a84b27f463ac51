//! Staleness-aware generation coordinator.
//!
//! Orchestrates get-or-generate for a composite briefing whose fields have
//! independent staleness classes. Readers are never blocked: cached data is
//! served whenever the lock is busy or storage misbehaves, and a refresh
//! only ever overwrites a field with a validated result.

use chrono::Utc;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dispatch_core::{
    new_owner_id, BriefingRecord, BriefingStatus, DispatchResult, OwnerId, ReceiptError,
    ReceiptOutcome, ReceiptSchema, ReceiptValidator, StalenessClass, Timestamp,
    EMPTY_RESPONSE_REASON,
};
use dispatch_llm::{call_with_budget, Generator, RetryBudget, RetryOutcome};
use dispatch_storage::{BriefingStore, LockStore};

use crate::config::EngineConfig;
use crate::singleflight::{await_flight, Flight, Singleflight};

/// Declaration of one independently-generated briefing field.
#[derive(Clone)]
pub struct FieldSpec {
    pub name: String,
    pub class: StalenessClass,
    pub prompt: String,
    validator: ReceiptValidator,
    generator: Arc<dyn Generator>,
    budget: Option<RetryBudget>,
}

impl FieldSpec {
    /// Declare a field.
    ///
    /// # Errors
    /// Returns an error if `schema` declares duplicate or empty field names.
    pub fn new(
        name: impl Into<String>,
        class: StalenessClass,
        schema: ReceiptSchema,
        prompt: impl Into<String>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self, ReceiptError> {
        Ok(Self {
            name: name.into(),
            class,
            prompt: prompt.into(),
            validator: ReceiptValidator::new(schema)?,
            generator,
            budget: None,
        })
    }

    /// Override the engine's default retry budget for this field.
    pub fn with_budget(mut self, budget: RetryBudget) -> Self {
        self.budget = Some(budget);
        self
    }
}

impl std::fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("generator", &self.generator.provider_name())
            .finish()
    }
}

/// Read status of a briefing as seen by one caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewStatus {
    /// Every requested field is fresh.
    Ready,
    /// Generation is in progress (or nothing usable exists yet); poll again.
    Pending,
    /// Some fields are usable, others are stale or still failing.
    Partial,
}

/// A briefing snapshot plus its read status.
#[derive(Debug, Clone, PartialEq)]
pub struct BriefingView {
    pub status: ViewStatus,
    pub record: BriefingRecord,
}

/// Get-or-generate coordinator over a lock store and a briefing store.
///
/// One instance per process: the owner id identifies this process in the
/// cross-process lock table, and the single-flight map deduplicates
/// callers within the process.
pub struct Coordinator<L, B> {
    locks: Arc<L>,
    briefings: Arc<B>,
    config: EngineConfig,
    owner_id: OwnerId,
    flights: Singleflight<DispatchResult<BriefingView>>,
}

impl<L, B> Coordinator<L, B>
where
    L: LockStore + 'static,
    B: BriefingStore + 'static,
{
    pub fn new(locks: Arc<L>, briefings: Arc<B>, config: EngineConfig) -> Self {
        Self {
            locks,
            briefings,
            config,
            owner_id: new_owner_id(),
            flights: Singleflight::new(),
        }
    }

    /// This process's identity in the lock table.
    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    /// Serve the briefing for `key`, regenerating whatever is stale.
    ///
    /// Callers within this process racing on the same key share one pass;
    /// across processes the lock table elects a single writer and everyone
    /// else serves cached data.
    pub async fn get_or_generate(
        &self,
        key: &str,
        specs: &[FieldSpec],
    ) -> DispatchResult<BriefingView> {
        match self.flights.join(key) {
            Flight::Leader(guard) => {
                let result = self.run_pass(key, specs).await;
                guard.complete(result.clone());
                result
            }
            Flight::Follower(rx) => {
                debug!(key, "awaiting in-flight generation in this process");
                match await_flight(rx).await {
                    Some(result) => result,
                    // Leader died before broadcasting; serve what's stored.
                    None => self.read_view(key, specs).await,
                }
            }
        }
    }

    /// Remove expired lock rows. Safe to run periodically from any process.
    pub async fn sweep_expired_locks(&self) -> DispatchResult<u64> {
        let swept = self.locks.sweep().await?;
        if swept > 0 {
            info!(count = swept, "swept expired locks");
        }
        Ok(swept)
    }

    async fn run_pass(&self, key: &str, specs: &[FieldSpec]) -> DispatchResult<BriefingView> {
        let now = Utc::now();

        let (mut record, claimed) = match self.briefings.get(key).await? {
            Some(record) => (record, false),
            None => {
                let placeholder = BriefingRecord::placeholder(
                    key,
                    specs.iter().map(|spec| spec.name.clone()),
                    now,
                );
                if self.briefings.insert_placeholder(&placeholder).await? {
                    debug!(key, "placeholder inserted, key claimed");
                    (placeholder, true)
                } else {
                    // A racing writer claimed the key between read and insert.
                    match self.briefings.get(key).await? {
                        Some(record) => (record, false),
                        None => (placeholder, true),
                    }
                }
            }
        };

        // A placeholder claimed elsewhere means another writer is on it:
        // "poll again" inside the grace window, abandoned after it.
        if !claimed && record.status == BriefingStatus::Placeholder {
            if record.age(now) < self.config.grace_window {
                debug!(key, "generation already in progress, not ready yet");
                return Ok(BriefingView {
                    status: ViewStatus::Pending,
                    record,
                });
            }
            info!(key, "placeholder past grace window, treating as abandoned");
        }

        let stale: Vec<FieldSpec> = specs
            .iter()
            .filter(|spec| field_is_stale(&record, spec, now))
            .cloned()
            .collect();
        if stale.is_empty() {
            return Ok(BriefingView {
                status: ViewStatus::Ready,
                record,
            });
        }

        let acquired = match self
            .locks
            .acquire(key, self.owner_id, self.config.lock_ttl)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                // Fail toward not generating, never toward false ownership.
                warn!(key, error = %e, "lock storage failure, serving cached data");
                false
            }
        };
        if !acquired {
            debug!(key, "lock busy, serving best available cached data");
            return Ok(view_of(record, specs));
        }

        let keeper = HeartbeatKeeper::spawn(
            Arc::clone(&self.locks),
            key.to_string(),
            self.owner_id,
            self.config.lock_ttl,
            self.config.heartbeat_interval,
        );
        let refreshed = self.refresh_fields(&mut record, stale).await;
        drop(keeper);

        if let Err(e) = self.locks.release(key, self.owner_id).await {
            warn!(key, error = %e, "lock release failed; expiry will reclaim it");
        }
        let failed = refreshed?;

        let all_generated = specs.iter().all(|spec| {
            record
                .field(&spec.name)
                .map(|f| f.is_generated())
                .unwrap_or(false)
        });
        let status = if failed == 0 && all_generated {
            ViewStatus::Ready
        } else if record.fields.values().any(|f| f.is_generated()) {
            ViewStatus::Partial
        } else {
            ViewStatus::Pending
        };
        Ok(BriefingView { status, record })
    }

    /// Drive every stale field through its retry budget and receipt
    /// validation, merging results in completion order. Returns how many
    /// fields failed to refresh.
    async fn refresh_fields(
        &self,
        record: &mut BriefingRecord,
        stale: Vec<FieldSpec>,
    ) -> DispatchResult<usize> {
        let mut inflight: FuturesUnordered<_> = stale
            .into_iter()
            .map(|spec| {
                let budget = spec
                    .budget
                    .clone()
                    .unwrap_or_else(|| self.config.retry.clone());
                async move {
                    let outcome = call_with_budget(
                        || {
                            let generator = Arc::clone(&spec.generator);
                            let prompt = spec.prompt.clone();
                            async move { generator.generate(&prompt).await }
                        },
                        &budget,
                    )
                    .await;
                    (spec, outcome)
                }
            })
            .collect();

        let mut failed = 0;
        while let Some((spec, outcome)) = inflight.next().await {
            if !merge_outcome(record, &spec.name, &spec.validator, outcome) {
                failed += 1;
            }
            // Persist after every merge so readers see progress and a
            // crashed pass loses at most the in-flight fields.
            self.briefings.put(record).await?;
        }
        Ok(failed)
    }

    async fn read_view(&self, key: &str, specs: &[FieldSpec]) -> DispatchResult<BriefingView> {
        match self.briefings.get(key).await? {
            Some(record) => Ok(view_of(record, specs)),
            None => Ok(BriefingView {
                status: ViewStatus::Pending,
                record: BriefingRecord::placeholder(
                    key,
                    specs.iter().map(|spec| spec.name.clone()),
                    Utc::now(),
                ),
            }),
        }
    }
}

fn field_is_stale(record: &BriefingRecord, spec: &FieldSpec, now: Timestamp) -> bool {
    match record.field(&spec.name).and_then(|f| f.updated_at) {
        Some(updated_at) => spec.class.is_stale(now, updated_at),
        None => true,
    }
}

/// Status of `record` from the point of view of `specs`, based purely on
/// staleness. Used when serving cached data without refreshing.
fn view_of(record: BriefingRecord, specs: &[FieldSpec]) -> BriefingView {
    let now = Utc::now();
    let any_stale = specs.iter().any(|spec| field_is_stale(&record, spec, now));
    let status = if !any_stale {
        ViewStatus::Ready
    } else if record.fields.values().any(|f| f.is_generated()) {
        ViewStatus::Partial
    } else {
        ViewStatus::Pending
    };
    BriefingView { status, record }
}

/// Merge one retry outcome into the record. Returns whether the field ended
/// the pass with a validated result (value or cached emptiness).
fn merge_outcome(
    record: &mut BriefingRecord,
    name: &str,
    validator: &ReceiptValidator,
    outcome: RetryOutcome,
) -> bool {
    let now = Utc::now();
    if outcome.ok {
        let Some(text) = outcome.value else {
            record.apply_failure(name, "missing_payload");
            return false;
        };
        let receipt = validator.validate(&text.content);
        match receipt.outcome {
            ReceiptOutcome::Ok { value } => {
                info!(
                    key = %record.key,
                    field = name,
                    attempts = outcome.attempts,
                    bytes = receipt.bytes,
                    "field refreshed"
                );
                record.apply_success(name, value, now);
                true
            }
            ReceiptOutcome::Invalid { violations } => {
                warn!(
                    key = %record.key,
                    field = name,
                    violations = violations.len(),
                    "receipt rejected, keeping previous value"
                );
                record.apply_failure(
                    name,
                    &format!("receipt_invalid: {} violations", violations.len()),
                );
                false
            }
            other => {
                warn!(
                    key = %record.key,
                    field = name,
                    classification = other.label(),
                    "receipt rejected, keeping previous value"
                );
                record.apply_failure(name, other.label());
                false
            }
        }
    } else if outcome.is_empty_response() {
        // A true "no data" result is cached with its reason so it does not
        // re-trigger generation at every grace check.
        info!(key = %record.key, field = name, "empty result cached");
        record.apply_empty(name, EMPTY_RESPONSE_REASON, now);
        true
    } else {
        let reason = outcome
            .reason
            .unwrap_or_else(|| "unknown_failure".to_string());
        warn!(
            key = %record.key,
            field = name,
            attempts = outcome.attempts,
            code = outcome.code,
            reason = %reason,
            "field refresh failed, keeping previous value"
        );
        record.apply_failure(name, &reason);
        false
    }
}

/// Background task extending the lock while a refresh pass runs.
///
/// Aborted on drop; losing ownership mid-pass stops the heartbeat rather
/// than resurrecting an expired lock.
struct HeartbeatKeeper {
    handle: JoinHandle<()>,
}

impl HeartbeatKeeper {
    fn spawn<L: LockStore + 'static>(
        locks: Arc<L>,
        key: String,
        owner: OwnerId,
        ttl: Duration,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; the lock was just acquired.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match locks.extend(&key, owner, ttl).await {
                    Ok(true) => debug!(key = %key, "lock heartbeat extended"),
                    Ok(false) => {
                        warn!(key = %key, "lock ownership lost mid-refresh, stopping heartbeat");
                        break;
                    }
                    Err(e) => warn!(key = %key, error = %e, "lock heartbeat failed"),
                }
            }
        });
        Self { handle }
    }
}

impl Drop for HeartbeatKeeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
