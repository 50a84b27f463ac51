//! Test utilities and fixtures for DISPATCH
//!
//! Scripted generators for driving the retry controller and coordinator
//! through canned success/failure sequences, record fixtures, and proptest
//! strategies shared across crates.

use async_trait::async_trait;
use chrono::Utc;
use dispatch_core::{
    BriefingRecord, ReceiptSchema, SchemaField, SchemaKind, UpstreamError,
};
use dispatch_llm::{GeneratedText, Generator};
use proptest::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One canned generator step.
pub type ScriptStep = Result<GeneratedText, UpstreamError>;

/// Generator that replays a scripted sequence of outcomes.
///
/// Steps are consumed front to back; once the script is exhausted the
/// generator keeps returning `fallback` (a fatal error by default, so a
/// test that over-calls fails loudly instead of looping).
pub struct ScriptedGenerator {
    name: String,
    steps: Mutex<VecDeque<ScriptStep>>,
    fallback: ScriptStep,
    calls: AtomicU32,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Mutex::new(VecDeque::new()),
            fallback: Err(UpstreamError::Fatal {
                status: 599,
                reason: "script exhausted".to_string(),
            }),
            calls: AtomicU32::new(0),
            delay: None,
        }
    }

    /// A generator that returns the same outcome forever.
    pub fn always(name: impl Into<String>, step: ScriptStep) -> Self {
        let mut generator = Self::new(name);
        generator.fallback = step;
        generator
    }

    /// A generator that always succeeds with `content`.
    pub fn always_ok(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::always(name, Ok(GeneratedText::from_content(content)))
    }

    /// Queue a successful step.
    pub fn then_ok(self, content: impl Into<String>) -> Self {
        self.then(Ok(GeneratedText::from_content(content)))
    }

    /// Queue a failing step.
    pub fn then_err(self, err: UpstreamError) -> Self {
        self.then(Err(err))
    }

    /// Queue an arbitrary step.
    pub fn then(self, step: ScriptStep) -> Self {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push_back(step);
        }
        self
    }

    /// Sleep this long inside every call, to widen race windows in tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> ScriptStep {
        match self.steps.lock() {
            Ok(mut steps) => steps.pop_front().unwrap_or_else(|| self.fallback.clone()),
            Err(_) => self.fallback.clone(),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<GeneratedText, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_step()
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Schema used by the briefing fixtures: a staging area plus venues.
pub fn venue_schema() -> ReceiptSchema {
    ReceiptSchema::new()
        .field(SchemaField::required("staging_area", SchemaKind::Object))
        .field(SchemaField::required(
            "venues",
            SchemaKind::Array(Box::new(SchemaKind::Object)),
        ))
}

/// A payload that validates against `venue_schema`.
pub fn venue_payload() -> serde_json::Value {
    serde_json::json!({
        "staging_area": {"name": "Founders Plaza", "reasoning": "central to all venues"},
        "venues": [
            {"name": "Terminal C", "category": "airport"},
            {"name": "Legacy Hall", "category": "food hall"}
        ]
    })
}

/// A record with one generated field, stamped now.
pub fn completed_record(key: &str, field: &str) -> BriefingRecord {
    let mut record = BriefingRecord::placeholder(key, [field], Utc::now());
    record.apply_success(field, venue_payload(), Utc::now());
    record
}

// ============================================================================
// PROPTEST STRATEGIES
// ============================================================================

/// Strategy producing arbitrary JSON values (bounded depth).
pub fn arb_json() -> impl Strategy<Value = serde_json::Value> {
    let scalar = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::from),
        any::<i64>().prop_map(serde_json::Value::from),
        "[a-zA-Z0-9 ]{0,10}".prop_map(serde_json::Value::from),
    ];
    scalar.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::from),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
        ]
    })
}
