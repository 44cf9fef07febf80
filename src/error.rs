//! Error types for the schema registry

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::compatibility::MessageViolation;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Schema registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to parse {file}: {message}")]
    Parse { file: String, message: String },

    #[error("Duplicate file name: {0}")]
    DuplicateFileName(String),

    #[error("Package name mismatch in {file}: declared '{declared}' but publishing '{requested}'")]
    PackageNameMismatch {
        file: String,
        declared: String,
        requested: String,
    },

    #[error("Breaking change in package {package}: {violation}")]
    Incompatible {
        package: String,
        #[source]
        violation: MessageViolation,
    },

    #[error("Version conflict: {0}")]
    Conflict(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Stored schema for message {message} version {version} is unreadable: {source}")]
    CorruptSchema {
        message: String,
        version: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Publish cancelled")]
    Cancelled,

    #[error("Schema discovery failed: {0}")]
    Discovery(String),

    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl RegistryError {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        RegistryError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Whether the whole request can be retried unchanged.
    ///
    /// Only version-allocation races qualify; compatibility failures need a
    /// schema fix instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistryError::Conflict(_))
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &err {
            match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return RegistryError::Conflict(format!(
                        "concurrent write to the registry: {}",
                        err
                    ));
                }
                ErrorCode::ConstraintViolation
                    if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
                {
                    return RegistryError::Conflict(format!("version already claimed: {}", err));
                }
                _ => {}
            }
        }
        RegistryError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: std::os::raw::c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn test_busy_is_conflict() {
        let err: RegistryError = sqlite_failure(rusqlite::ffi::SQLITE_BUSY).into();
        assert!(err.is_retryable());

        let err: RegistryError = sqlite_failure(rusqlite::ffi::SQLITE_BUSY_SNAPSHOT).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unique_violation_is_conflict() {
        let err: RegistryError = sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE).into();
        assert!(matches!(err, RegistryError::Conflict(_)));
    }

    #[test]
    fn test_other_failures_are_database_errors() {
        let err: RegistryError = sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY).into();
        assert!(matches!(err, RegistryError::Database(_)));
        assert!(!err.is_retryable());

        let err: RegistryError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, RegistryError::Database(_)));
    }
}
