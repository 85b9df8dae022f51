//! Error types for the wager settlement engine
//!
//! Every fallible engine operation returns [`WagerResult`]. The variants follow
//! the HTTP taxonomy used by `api::errors`: validation, not-found, conflict,
//! throttled, unavailable, and internal failures. A solvency-forced loss is an
//! outcome and never shows up here.

use std::time::Duration;

/// Root error type for all engine operations
#[derive(Debug, thiserror::Error)]
pub enum WagerError {
    /// Malformed input (wallet, amount, missing field). No state was changed.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// Invoice not pending, duplicate active entry, pool already exists, ...
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded, retry after {}s", .retry_after.as_secs())]
    Throttled { retry_after: Duration },

    #[error("Pool for {currency} is paused")]
    PoolPaused { currency: String },

    #[error("Pool for {currency} is unavailable: {reason}")]
    PoolUnavailable { currency: String, reason: String },

    /// A row lock could not be acquired in time. Safe to retry.
    #[error("Storage contention, retry the request: {0}")]
    Contention(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Storage system errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    OpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),
}

/// Configuration and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl WagerError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        WagerError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the caller may simply retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, WagerError::Contention(_) | WagerError::Throttled { .. })
    }
}

// External error conversions
impl From<rocksdb::Error> for WagerError {
    fn from(e: rocksdb::Error) -> Self {
        match e.kind() {
            rocksdb::ErrorKind::Busy
            | rocksdb::ErrorKind::TimedOut
            | rocksdb::ErrorKind::TryAgain => WagerError::Contention(e.to_string()),
            _ => WagerError::Storage(StorageError::WriteFailed(e.to_string())),
        }
    }
}

impl From<serde_json::Error> for WagerError {
    fn from(e: serde_json::Error) -> Self {
        WagerError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

impl From<tokio::task::JoinError> for WagerError {
    fn from(e: tokio::task::JoinError) -> Self {
        WagerError::Internal(format!("blocking task failed: {}", e))
    }
}

// Convenience type alias for Results
pub type WagerResult<T> = Result<T, WagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WagerError::not_found("entry", "abc");
        assert_eq!(err.to_string(), "entry abc not found");

        let err = WagerError::Throttled {
            retry_after: Duration::from_secs(42),
        };
        assert!(err.to_string().contains("42s"));
    }

    #[test]
    fn test_config_error_details() {
        let err = ConfigError::InvalidValue {
            field: "server.port".to_string(),
            value: "0".to_string(),
            reason: "Port cannot be zero".to_string(),
        };
        let wrapped: WagerError = err.into();
        assert!(wrapped.to_string().contains("server.port"));
        assert!(wrapped.to_string().contains("Port cannot be zero"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(WagerError::Contention("lock".into()).is_retryable());
        assert!(!WagerError::Validation("bad".into()).is_retryable());
        assert!(!WagerError::Conflict("dup".into()).is_retryable());
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<u64>("not json").unwrap_err();
        match WagerError::from(json_err) {
            WagerError::Storage(StorageError::CorruptedData(_)) => {}
            other => panic!("Expected corrupted data, got {:?}", other),
        }
    }
}
