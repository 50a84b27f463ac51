//! Composite briefing record and field-level merge rules.
//!
//! A briefing is assembled field by field from independent upstream
//! generators, so every field carries its own value, failure reason, and
//! last-updated timestamp. Three field states must stay distinguishable:
//!
//! - never generated: `value = None, reason = None, updated_at = None`
//! - validated emptiness: `value = None, reason = Some(..), updated_at` fresh
//! - failed refresh: previous `value` retained, `reason` set, `updated_at`
//!   untouched
//!
//! A failure never overwrites good data, and cached emptiness counts as a
//! hit so "no data found" does not re-trigger generation on every read.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Lifecycle status of a briefing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BriefingStatus {
    /// Inserted before any upstream call completed; signals "generation in
    /// progress" to racing readers.
    Placeholder,
    /// At least one field has been generated.
    Partial,
    /// Every field has been generated at least once.
    Complete,
}

/// One independently-refreshed field of a briefing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BriefingField {
    pub value: Option<Value>,
    pub reason: Option<String>,
    pub updated_at: Option<Timestamp>,
}

impl BriefingField {
    /// Whether this field has ever completed a validated generation,
    /// including a validated empty result.
    pub fn is_generated(&self) -> bool {
        self.updated_at.is_some()
    }

    /// Whether this field is a cached "no data" result.
    pub fn is_empty_with_reason(&self) -> bool {
        self.value.is_none() && self.reason.is_some() && self.updated_at.is_some()
    }
}

/// A composite briefing record as persisted in the record table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefingRecord {
    pub key: String,
    pub fields: BTreeMap<String, BriefingField>,
    pub status: BriefingStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl BriefingRecord {
    /// Create a placeholder record claiming `key` for an in-flight
    /// generation pass. All fields are present but unset.
    pub fn placeholder<I, S>(key: impl Into<String>, field_names: I, now: Timestamp) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = field_names
            .into_iter()
            .map(|name| (name.into(), BriefingField::default()))
            .collect();
        Self {
            key: key.into(),
            fields,
            status: BriefingStatus::Placeholder,
            created_at: now,
            updated_at: now,
        }
    }

    /// Age of the record since its last mutation.
    pub fn age(&self, now: Timestamp) -> Duration {
        (now - self.updated_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&BriefingField> {
        self.fields.get(name)
    }

    /// Whether any field carries a usable value.
    pub fn has_any_value(&self) -> bool {
        self.fields.values().any(|f| f.value.is_some())
    }

    /// Merge a validated generation result into `name`.
    pub fn apply_success(&mut self, name: &str, value: Value, now: Timestamp) {
        let field = self.fields.entry(name.to_string()).or_default();
        field.value = Some(value);
        field.reason = None;
        field.updated_at = Some(now);
        self.touch(now);
    }

    /// Record a validated empty result for `name`.
    ///
    /// The field becomes non-stale: emptiness is data, not failure.
    pub fn apply_empty(&mut self, name: &str, reason: &str, now: Timestamp) {
        let field = self.fields.entry(name.to_string()).or_default();
        field.value = None;
        field.reason = Some(reason.to_string());
        field.updated_at = Some(now);
        self.touch(now);
    }

    /// Record a failed refresh for `name`, keeping any previous value and
    /// its timestamp so good data is never replaced by a failure.
    pub fn apply_failure(&mut self, name: &str, reason: &str) {
        let field = self.fields.entry(name.to_string()).or_default();
        field.reason = Some(reason.to_string());
        // value and updated_at deliberately untouched
        self.status = self.computed_status();
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
        self.status = self.computed_status();
    }

    fn computed_status(&self) -> BriefingStatus {
        let generated = self.fields.values().filter(|f| f.is_generated()).count();
        if generated == 0 {
            BriefingStatus::Placeholder
        } else if generated == self.fields.len() {
            BriefingStatus::Complete
        } else {
            BriefingStatus::Partial
        }
    }
}
