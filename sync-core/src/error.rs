//! Unified error type for the sync core
//!
//! Every fallible operation in the crate returns [`SyncError`]. The variants
//! follow the failure taxonomy the outer layers act on:
//! - `ConstraintViolation` aborts the surrounding transaction
//! - `NotFound` is reported but callers treat removes of missing rows as success
//! - `DecryptionFailure` is normally swallowed per field and only logged
//! - `TransportFailure` means "pending retry", never "dropped"
//! - `MalformedPushPayload` is logged and ignored by the push handler

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad classification of a [`SyncError`], for callers that only need to
/// decide how to react (retry, ignore, surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ConstraintViolation,
    NotFound,
    DecryptionFailure,
    TransportFailure,
    MalformedPushPayload,
    StoreClosed,
    TransactionMisuse,
    Database,
    Config,
    Io,
    Parse,
    InvalidInput,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum SyncError {
    #[error("Constraint violation on {entity}: {detail}")]
    ConstraintViolation {
        entity: String,
        id: Option<i64>,
        detail: String,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: i64 },

    #[error("Decryption failed: {0}")]
    DecryptionFailure(String),

    #[error("Transport error: {0}")]
    TransportFailure(String),

    #[error("Malformed push payload: {0}")]
    MalformedPushPayload(String),

    #[error("Store is closed")]
    StoreClosed,

    #[error("Transaction misuse: {0}")]
    TransactionMisuse(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    pub fn constraint(entity: &str, detail: impl Into<String>) -> Self {
        SyncError::ConstraintViolation {
            entity: entity.to_string(),
            id: None,
            detail: detail.into(),
        }
    }

    /// Attach the offending row to a constraint failure
    pub fn with_entity_id(self, id: i64) -> Self {
        match self {
            SyncError::ConstraintViolation { entity, detail, .. } => SyncError::ConstraintViolation {
                entity,
                id: Some(id),
                detail,
            },
            other => other,
        }
    }

    pub fn not_found(entity: &str, id: i64) -> Self {
        SyncError::NotFound {
            entity: entity.to_string(),
            id,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            SyncError::NotFound { .. } => ErrorKind::NotFound,
            SyncError::DecryptionFailure(_) => ErrorKind::DecryptionFailure,
            SyncError::TransportFailure(_) => ErrorKind::TransportFailure,
            SyncError::MalformedPushPayload(_) => ErrorKind::MalformedPushPayload,
            SyncError::StoreClosed => ErrorKind::StoreClosed,
            SyncError::TransactionMisuse(_) => ErrorKind::TransactionMisuse,
            SyncError::Database(_) => ErrorKind::Database,
            SyncError::Config(_) => ErrorKind::Config,
            SyncError::Io(_) => ErrorKind::Io,
            SyncError::Parse(_) => ErrorKind::Parse,
            SyncError::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    /// The id of the offending entity, when the error is tied to one.
    pub fn entity_id(&self) -> Option<i64> {
        match self {
            SyncError::NotFound { id, .. } => Some(*id),
            SyncError::ConstraintViolation { id, .. } => *id,
            _ => None,
        }
    }

    /// Whether the failed operation may succeed if attempted again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransportFailure(_))
    }
}

// Implement From for common error types

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, ref message) = err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                return SyncError::ConstraintViolation {
                    entity: "row".to_string(),
                    id: None,
                    detail: message.clone().unwrap_or_else(|| code.to_string()),
                };
            }
        }
        SyncError::Database(err.to_string())
    }
}

impl From<r2d2::Error> for SyncError {
    fn from(err: r2d2::Error) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::TransportFailure(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::Config(format!("Invalid URL: {}", err))
    }
}

/// Result type alias using SyncError
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_entity_id() {
        let err = SyncError::not_found("conversation", 5);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.entity_id(), Some(5));
        assert_eq!(err.to_string(), "conversation 5 not found");

        let err = SyncError::constraint("conversation", "id_matcher");
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
        assert_eq!(err.entity_id(), None);
        assert_eq!(err.with_entity_id(7).entity_id(), Some(7));
        assert_eq!(SyncError::StoreClosed.with_entity_id(7).entity_id(), None);
    }

    #[test]
    fn test_sqlite_unique_maps_to_constraint_violation() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: SyncError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    }

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(SyncError::TransportFailure("offline".into()).is_retryable());
        assert!(!SyncError::StoreClosed.is_retryable());
        assert!(!SyncError::MalformedPushPayload("x".into()).is_retryable());
    }
}
