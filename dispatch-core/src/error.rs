//! Error types for DISPATCH operations

use thiserror::Error;

/// Storage layer errors.
///
/// Lock contention is NOT represented here: a busy lock is an `Ok(false)`
/// from the store, a signal to fall back to cached data. Only genuine
/// infrastructure failures surface as errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Record not found for key {key}")]
    NotFound { key: String },

    #[error("Write failed for key {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage backend unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Upstream generator errors.
///
/// The transient/fatal split drives the retry controller: transient
/// failures are retried within budget, fatal ones surface immediately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Transient upstream failure (status {status}): {reason}")]
    Transient { status: u16, reason: String },

    #[error("Fatal upstream failure (status {status}): {reason}")]
    Fatal { status: u16, reason: String },

    #[error("Upstream call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Network error reaching upstream: {reason}")]
    Network { reason: String },

    #[error("No generator configured for provider {provider}")]
    ProviderNotConfigured { provider: String },
}

impl UpstreamError {
    /// Whether the retry controller may re-attempt after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::Transient { .. }
                | UpstreamError::Timeout { .. }
                | UpstreamError::Network { .. }
        )
    }

    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Transient { status, .. } | UpstreamError::Fatal { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

/// Receipt schema construction errors.
///
/// Validation outcomes (empty / non-JSON / incomplete / invalid) are data,
/// not errors; see `ReceiptOutcome`. This enum only covers misuse when
/// building a schema.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReceiptError {
    #[error("Duplicate schema field: {field}")]
    DuplicateField { field: String },

    #[error("Schema field name must not be empty")]
    EmptyFieldName,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Provider not supported: {provider}")]
    ProviderNotSupported { provider: String },
}

/// Master error type for all DISPATCH errors.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Receipt error: {0}")]
    Receipt(#[from] ReceiptError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for DISPATCH operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

// =============================================================================
// TESTS
// =============================================================================
