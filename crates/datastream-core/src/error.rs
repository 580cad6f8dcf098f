//! Core error types.

use thiserror::Error;

/// Errors surfaced by the capability contract.
///
/// Variants carry the collaborator's message rather than its error value so
/// that one failure can be handed to both the error conduit and the
/// subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Backend could not be constructed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A requested key does not exist in the backend.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The key cannot address anything in this backend.
    #[error("invalid key '{key}': {reason}")]
    InvalidKey {
        /// Offending key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Version-control operation failed.
    #[error("version control error: {0}")]
    VersionControl(String),

    /// Object-store request failed.
    #[error("object store error: {0}")]
    ObjectStore(String),

    /// SQL execution failed.
    #[error("database error: {0}")]
    Database(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(String),

    /// A background or blocking task failed to complete.
    #[error("task error: {0}")]
    Task(String),
}

impl Error {
    /// Create an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Task(err.to_string())
    }
}

/// Result alias for contract operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_backend_message() {
        let err = Error::Database("no such table: data".to_string());
        assert_eq!(err.to_string(), "database error: no such table: data");

        let err = Error::invalid_key("../etc/passwd", "escapes the working tree");
        assert_eq!(
            err.to_string(),
            "invalid key '../etc/passwd': escapes the working tree"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(ref msg) if msg == "denied"));
    }
}
