//! Error types for k2gravity.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for gravity database operations.
///
/// None of these are fatal to the host process. Lookups that hit one of
/// them degrade to "not on list"; open and prepare failures additionally
/// close the handle so the next call starts from scratch.
#[derive(Error, Debug)]
pub enum Error {
    /// The gravity database file does not exist
    #[error("gravity database {} does not exist", .0.display())]
    NotFound(PathBuf),

    /// Connecting to or configuring the database failed
    #[error("failed to open gravity database: {0}")]
    OpenFailed(#[source] rusqlite::Error),

    /// A statement could not be compiled
    #[error("failed to prepare \"{sql}\": {source}")]
    PrepareFailed {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A parameter could not be bound to a statement
    #[error("failed to bind parameter: {0}")]
    BindFailed(#[source] rusqlite::Error),

    /// Executing a statement failed
    #[error("failed to perform step: {0}")]
    StepFailed(#[source] rusqlite::Error),

    /// The database is locked by a writer
    #[error("gravity database is busy")]
    Busy,

    /// The database is not available (not opened or could not be reopened)
    #[error("gravity database not available")]
    Unavailable,

    /// The list has no per-client plans
    #[error("list {0} has no per-client plans")]
    UnsupportedCategory(crate::ListCategory),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Classify an error returned while executing a statement.
    pub(crate) fn from_step(err: rusqlite::Error) -> Self {
        if is_busy(&err) {
            Error::Busy
        } else {
            Error::StepFailed(err)
        }
    }

    /// Classify an error returned while binding statement parameters.
    pub(crate) fn from_bind(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::InvalidParameterCount(..)
            | rusqlite::Error::InvalidParameterName(_)
            | rusqlite::Error::ToSqlConversionFailure(_) => Error::BindFailed(err),
            other => Error::from_step(other),
        }
    }

    /// Returns `true` when the failure is lock contention rather than a real error.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy)
    }
}

/// Returns `true` if SQLite reported `SQLITE_BUSY` or `SQLITE_LOCKED`.
pub(crate) fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

/// Result type alias for k2gravity operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: std::os::raw::c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn test_busy_classification() {
        assert!(Error::from_step(sqlite_failure(rusqlite::ffi::SQLITE_BUSY)).is_busy());
        assert!(Error::from_step(sqlite_failure(rusqlite::ffi::SQLITE_LOCKED)).is_busy());
        assert!(!Error::from_step(sqlite_failure(rusqlite::ffi::SQLITE_CORRUPT)).is_busy());
    }

    #[test]
    fn test_bind_classification() {
        let err = Error::from_bind(rusqlite::Error::InvalidParameterCount(2, 1));
        assert!(matches!(err, Error::BindFailed(_)));

        let err = Error::from_bind(sqlite_failure(rusqlite::ffi::SQLITE_BUSY));
        assert!(err.is_busy());
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::NotFound(PathBuf::from("/tmp/missing.db"));
        assert_eq!(
            err.to_string(),
            "gravity database /tmp/missing.db does not exist"
        );
    }
}
