//! Error types for the split engine.

use crate::model::PaymentId;
use rusqlite::{ffi, ErrorCode};
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while splitting payments or maintaining balances.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Project share configuration is invalid, or allocator input is malformed.
    /// Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Non-positive or malformed payment amount. Never retried.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Concurrent split attempt or lock contention. Safe to retry; a retry
    /// lands on the idempotent path.
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    /// Transient or unexpected storage failure. Nothing was applied.
    #[error("Storage error: {0}")]
    Storage(rusqlite::Error),

    /// The payment referenced by the caller does not exist.
    #[error("Payment {0} not found")]
    PaymentNotFound(PaymentId),

    /// An environment setting could not be parsed.
    #[error("Invalid setting {key}={value}: {message}")]
    InvalidSetting {
        key: &'static str,
        value: String,
        message: String,
    },

    /// Failed to open or read an input file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing error
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    /// An input row carried a malformed field other than an amount.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// A call panicked while holding the database connection. Not retried;
    /// the engine has to be reopened.
    #[error("Database connection unusable after a panic")]
    ConnectionPoisoned,

    /// Missing input file arguments
    #[error("Missing input file argument. Usage: split-ledger <members.csv> <payments.csv>")]
    MissingArgument,
}

impl EngineError {
    /// Returns `true` if the caller may retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StorageConflict(_) | EngineError::Storage(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        // Only key violations mean another writer got there first; CHECK,
        // NOT NULL and foreign key failures are not contention.
        let conflict = match &err {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => true,
                ErrorCode::ConstraintViolation => {
                    failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                        || failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                }
                _ => false,
            },
            _ => false,
        };
        if conflict {
            EngineError::StorageConflict(err.to_string())
        } else {
            EngineError::Storage(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_maps_to_conflict() {
        let mapped = EngineError::from(failure(ffi::SQLITE_BUSY));
        assert!(matches!(mapped, EngineError::StorageConflict(_)));
        assert!(mapped.is_retryable());
    }

    fn failure(extended_code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(extended_code), None)
    }

    #[test]
    fn test_key_violations_map_to_conflict() {
        for code in [ffi::SQLITE_CONSTRAINT_PRIMARYKEY, ffi::SQLITE_CONSTRAINT_UNIQUE] {
            let mapped = EngineError::from(failure(code));
            assert!(matches!(mapped, EngineError::StorageConflict(_)));
        }
    }

    #[test]
    fn test_other_constraint_violations_are_storage() {
        for code in [
            ffi::SQLITE_CONSTRAINT_CHECK,
            ffi::SQLITE_CONSTRAINT_NOTNULL,
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY,
        ] {
            let mapped = EngineError::from(failure(code));
            assert!(matches!(mapped, EngineError::Storage(_)));
        }
    }

    #[test]
    fn test_constraint_classification_from_real_statements() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, n INTEGER CHECK (n >= 0));
             INSERT INTO t (id, n) VALUES (1, 1);",
        )
        .unwrap();

        let duplicate = conn
            .execute("INSERT INTO t (id, n) VALUES (1, 2)", [])
            .unwrap_err();
        assert!(matches!(
            EngineError::from(duplicate),
            EngineError::StorageConflict(_)
        ));

        let negative = conn
            .execute("INSERT INTO t (id, n) VALUES (2, -1)", [])
            .unwrap_err();
        assert!(matches!(EngineError::from(negative), EngineError::Storage(_)));
    }

    #[test]
    fn test_other_sqlite_errors_are_storage() {
        let mapped = EngineError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(mapped, EngineError::Storage(_)));
    }

    #[test]
    fn test_configuration_not_retryable() {
        assert!(!EngineError::Configuration("over".into()).is_retryable());
        assert!(!EngineError::InvalidAmount("0".into()).is_retryable());
        assert!(!EngineError::InvalidRecord("paid_at".into()).is_retryable());
        assert!(!EngineError::ConnectionPoisoned.is_retryable());
    }
}
