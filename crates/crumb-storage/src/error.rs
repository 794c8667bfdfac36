//! Error types for crumb-storage
//!
//! This module defines the error types used throughout the storage crate.

use crumb_core::{CodecError, MalformedToken};
use thiserror::Error;

/// Errors that can occur in compaction store operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Reference is not in the cache or the durable table
    #[error("Not found: {0}")]
    NotFound(String),

    /// Token looked like a reference but failed validation
    #[error("Bad reference: {0}")]
    BadReference(String),

    /// A different payload is already stored under the reference
    #[error("Conflicting payload stored under reference {0}")]
    Conflict(String),

    /// Every probe slot held different content
    #[error("No free reference slot after {0} probes")]
    ProbesExhausted(usize),

    /// Error during serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl StorageError {
    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new Deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Create a new Database error
    pub fn database(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

/// Convert from postcard Error to StorageError
impl From<postcard::Error> for StorageError {
    fn from(err: postcard::Error) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}

impl From<StorageError> for CodecError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(reference) => CodecError::UnresolvableReference(reference),
            StorageError::BadReference(token) => MalformedToken::BadReference(token).into(),
            other => CodecError::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = StorageError::not_found("abc");
        assert!(matches!(err, StorageError::NotFound(_)));
        assert_eq!(err.to_string(), "Not found: abc");
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StorageError = io_err.into();
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[test]
    fn test_codec_conversion() {
        let err: CodecError = StorageError::not_found("abc").into();
        assert_eq!(err, CodecError::UnresolvableReference("abc".into()));
        assert!(!err.is_routine());

        let err: CodecError = StorageError::BadReference("<<x>>".into()).into();
        assert!(err.is_routine());

        let err: CodecError = StorageError::ProbesExhausted(16).into();
        assert!(matches!(err, CodecError::Store(_)));
    }
}
