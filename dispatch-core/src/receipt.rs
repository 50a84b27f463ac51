//! Receipt validation for untrusted generator output.
//!
//! Every generator response is treated as an untrusted byte stream and is
//! either turned into a validated JSON value or classified precisely,
//! never repaired into a best guess. Exactly two narrow transformations are
//! permitted before parsing:
//!
//! 1. stripping a single leading/trailing code fence, only when both the
//!    opening and closing fence are present;
//! 2. extracting the first complete balanced top-level object via an
//!    explicit brace-depth scan that treats characters inside quoted
//!    strings (including escaped quotes) as inert.
//!
//! Truncated output (`Incomplete`) is kept distinct from garbage
//! (`NonJson`): the former signals "retry with more output budget", the
//! latter does not.

use crate::error::ReceiptError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// SCHEMA
// ============================================================================

/// A single schema violation, with a JSONPath-style location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Expected shape of a schema field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array(Box<SchemaKind>),
    Any,
}

impl SchemaKind {
    fn describe(&self) -> String {
        match self {
            SchemaKind::String => "string".to_string(),
            SchemaKind::Number => "number".to_string(),
            SchemaKind::Integer => "integer".to_string(),
            SchemaKind::Boolean => "boolean".to_string(),
            SchemaKind::Object => "object".to_string(),
            SchemaKind::Array(elem) => format!("array of {}", elem.describe()),
            SchemaKind::Any => "any".to_string(),
        }
    }

    fn check(&self, value: &Value, path: &str, violations: &mut Vec<SchemaViolation>) {
        let ok = match self {
            SchemaKind::String => value.is_string(),
            SchemaKind::Number => value.is_number(),
            SchemaKind::Integer => value.is_i64() || value.is_u64(),
            SchemaKind::Boolean => value.is_boolean(),
            SchemaKind::Object => value.is_object(),
            SchemaKind::Array(elem) => {
                if let Some(items) = value.as_array() {
                    for (i, item) in items.iter().enumerate() {
                        elem.check(item, &format!("{}[{}]", path, i), violations);
                    }
                    return;
                }
                false
            }
            SchemaKind::Any => true,
        };
        if !ok {
            violations.push(SchemaViolation::new(
                path,
                format!("expected {}", self.describe()),
            ));
        }
    }
}

/// A named field in a receipt schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub kind: SchemaKind,
    pub required: bool,
    pub min_items: Option<usize>,
}

impl SchemaField {
    /// A field that must be present and non-null.
    pub fn required(name: impl Into<String>, kind: SchemaKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            min_items: None,
        }
    }

    /// A field that may be absent or null.
    pub fn optional(name: impl Into<String>, kind: SchemaKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            min_items: None,
        }
    }

    /// Require at least `n` elements when the value is an array.
    pub fn with_min_items(mut self, n: usize) -> Self {
        self.min_items = Some(n);
        self
    }
}

/// Declarative schema for the top-level object of a receipt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptSchema {
    fields: Vec<SchemaField>,
    deny_unknown: bool,
}

impl ReceiptSchema {
    /// An empty, permissive schema: any JSON object validates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field to the schema.
    pub fn field(mut self, field: SchemaField) -> Self {
        self.fields.push(field);
        self
    }

    /// Reject object keys that the schema does not declare.
    pub fn deny_unknown(mut self) -> Self {
        self.deny_unknown = true;
        self
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    /// Check `value` against the schema, collecting every violation.
    pub fn check(&self, value: &Value) -> Vec<SchemaViolation> {
        let mut violations = Vec::new();
        let Some(map) = value.as_object() else {
            violations.push(SchemaViolation::new("$", "expected a JSON object"));
            return violations;
        };

        for field in &self.fields {
            let path = format!("$.{}", field.name);
            match map.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        violations.push(SchemaViolation::new(path, "required field is missing"));
                    }
                }
                Some(value) => {
                    field.kind.check(value, &path, &mut violations);
                    if let (Some(min), Some(items)) = (field.min_items, value.as_array()) {
                        if items.len() < min {
                            violations.push(SchemaViolation::new(
                                path,
                                format!("expected at least {} items, got {}", min, items.len()),
                            ));
                        }
                    }
                }
            }
        }

        if self.deny_unknown {
            for key in map.keys() {
                if !self.fields.iter().any(|f| &f.name == key) {
                    violations.push(SchemaViolation::new(
                        format!("$.{}", key),
                        "unknown field",
                    ));
                }
            }
        }

        violations
    }
}

// ============================================================================
// RECEIPT OUTCOME
// ============================================================================

/// Classification of a generator response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReceiptOutcome {
    /// Empty or whitespace-only input; nothing was parsed.
    Empty,
    /// No balanced object was found, or the candidate failed to parse.
    NonJson { reason: String },
    /// An object was opened but the input ended before it closed.
    /// Distinct from `NonJson`: the generator likely ran out of output
    /// budget rather than producing garbage.
    Incomplete,
    /// Parsed but failed schema validation; every violation is listed.
    Invalid { violations: Vec<SchemaViolation> },
    /// Parsed and validated.
    Ok { value: Value },
}

impl ReceiptOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ReceiptOutcome::Ok { .. })
    }

    /// Short classification label for logs and field failure reasons.
    pub fn label(&self) -> &'static str {
        match self {
            ReceiptOutcome::Empty => "receipt_empty",
            ReceiptOutcome::NonJson { .. } => "receipt_nonjson",
            ReceiptOutcome::Incomplete => "receipt_incomplete",
            ReceiptOutcome::Invalid { .. } => "receipt_invalid",
            ReceiptOutcome::Ok { .. } => "receipt_ok",
        }
    }
}

/// Result of validating one raw generator response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub outcome: ReceiptOutcome,
    /// Size of the raw input in bytes, for logging and budget tuning.
    pub bytes: usize,
}

// ============================================================================
// VALIDATOR
// ============================================================================

/// Validator turning raw generator text into a `Receipt`.
///
/// Deterministic and side-effect-free: identical input always yields an
/// identical receipt.
#[derive(Debug, Clone)]
pub struct ReceiptValidator {
    schema: ReceiptSchema,
}

impl ReceiptValidator {
    /// Build a validator for `schema`.
    ///
    /// # Errors
    /// Returns an error if the schema declares duplicate or empty field
    /// names.
    pub fn new(schema: ReceiptSchema) -> Result<Self, ReceiptError> {
        let mut seen = std::collections::BTreeSet::new();
        for field in schema.fields() {
            if field.name.is_empty() {
                return Err(ReceiptError::EmptyFieldName);
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ReceiptError::DuplicateField {
                    field: field.name.clone(),
                });
            }
        }
        Ok(Self { schema })
    }

    pub fn schema(&self) -> &ReceiptSchema {
        &self.schema
    }

    /// Validate one raw response.
    pub fn validate(&self, raw: &str) -> Receipt {
        let bytes = raw.len();
        let outcome = self.classify(raw);
        Receipt { outcome, bytes }
    }

    fn classify(&self, raw: &str) -> ReceiptOutcome {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return ReceiptOutcome::Empty;
        }

        let unfenced = strip_fence(trimmed);
        let candidate = match extract_object(unfenced) {
            Extract::Object(candidate) => candidate,
            Extract::Incomplete => return ReceiptOutcome::Incomplete,
            Extract::NoObject => {
                return ReceiptOutcome::NonJson {
                    reason: "no top-level object found".to_string(),
                }
            }
        };

        let value: Value = match serde_json::from_str(candidate) {
            Ok(value) => value,
            Err(e) => {
                return ReceiptOutcome::NonJson {
                    reason: e.to_string(),
                }
            }
        };

        let violations = self.schema.check(&value);
        if violations.is_empty() {
            ReceiptOutcome::Ok { value }
        } else {
            ReceiptOutcome::Invalid { violations }
        }
    }
}

// ============================================================================
// FENCE STRIPPING AND OBJECT EXTRACTION
// ============================================================================

/// Strip a single surrounding code fence, if and only if both the opening
/// and closing fence are present. Unterminated fences leave the input
/// untouched: detection, never repair.
fn strip_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // The opening fence line may carry a language tag ("```json").
    let Some(newline) = rest.find('\n') else {
        return s;
    };
    let body = &rest[newline + 1..];
    let Some(close) = body.rfind("```") else {
        return s;
    };
    if !body[close + 3..].trim().is_empty() {
        return s;
    }
    body[..close].trim()
}

enum Extract<'a> {
    Object(&'a str),
    Incomplete,
    NoObject,
}

/// Find the first complete balanced top-level object.
///
/// Explicit state machine over characters: depth changes on braces only
/// while outside a string; a string opens at an unescaped `"` and closes at
/// the next unescaped `"`. Ending the input with an object still open is
/// `Incomplete`, never `NoObject`.
fn extract_object(s: &str) -> Extract<'_> {
    let mut start: Option<usize> = None;
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' if start.is_some() => in_string = true,
            '{' => {
                if start.is_none() {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(begin) = start {
                            return Extract::Object(&s[begin..=i]);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    if start.is_some() {
        Extract::Incomplete
    } else {
        Extract::NoObject
    }
}

// =============================================================================
// TESTS
// =============================================================================
