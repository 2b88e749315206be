//! Storage layer error types
//!
//! The taxonomy separates expected conditions from structural failures:
//! `StorageDoesNotExist` and `ObjectDoesNotExist` are normal outcomes (a day or
//! object that was never written) and are recovered locally into empty data;
//! only corruption, unsupported types and I/O failures surface to callers.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed (mmap, truncate, file read/write)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk bytes do not decode (bad record length, bad index checksum)
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// No storage directory exists for this day/counter. Expected for days
    /// that were never written; treated as empty data, not a failure.
    #[error("storage does not exist: {0:?}")]
    StorageDoesNotExist(PathBuf),

    /// Object was never written in this partition. Expected; treated as
    /// empty data for that object.
    #[error("object does not exist: {0}")]
    ObjectDoesNotExist(u32),

    /// A counter has no configured logical type, or a value does not match
    /// the configured type. Configuration error.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// Index file serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Expected "no data here" conditions that callers turn into empty
    /// results rather than propagating.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::StorageDoesNotExist(_) | StorageError::ObjectDoesNotExist(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::ObjectDoesNotExist(7);
        assert_eq!(err.to_string(), "object does not exist: 7");

        let err = StorageError::CorruptData("invalid record length".to_string());
        assert_eq!(err.to_string(), "corrupt data: invalid record length");
    }

    #[test]
    fn test_not_found_classification() {
        assert!(StorageError::ObjectDoesNotExist(1).is_not_found());
        assert!(StorageError::StorageDoesNotExist(PathBuf::from("/tmp/x")).is_not_found());
        assert!(!StorageError::CorruptData("x".into()).is_not_found());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
    }
}
