//! Storage engine error types
//!
//! Defines all errors that can occur in the logging engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the logging engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed (open, write, delete)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Archive metadata could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Zip archive could not be written or read
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Seal, compress or prune step of a rotation failed
    #[error("Rotation of {path:?} failed: {source}")]
    Rotation {
        path: PathBuf,
        #[source]
        source: Box<StorageError>,
    },

    /// A row carried a timestamp that is not ISO-8601
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Invalid time range (start > end)
    #[error("Invalid time range: start must not be after end")]
    InvalidTimeRange,

    /// The engine was stopped; no further readings are accepted
    #[error("Log engine is not running")]
    NotRunning,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Wrap an error raised while rotating `path`.
    pub fn rotation(path: impl Into<PathBuf>, source: StorageError) -> Self {
        StorageError::Rotation {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// True for a missing file, however deeply wrapped.
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            StorageError::Archive(zip::result::ZipError::Io(e)) => {
                e.kind() == std::io::ErrorKind::NotFound
            }
            StorageError::Csv(e) => match e.kind() {
                csv::ErrorKind::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
                _ => false,
            },
            StorageError::Rotation { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::InvalidTimeRange;
        assert_eq!(
            err.to_string(),
            "Invalid time range: start must not be after end"
        );

        let err = StorageError::rotation(
            "logs/a.csv",
            StorageError::InvalidTimestamp("yesterday".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "Rotation of \"logs/a.csv\" failed: Invalid timestamp: yesterday"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
        assert!(storage_err.is_not_found());

        let wrapped = StorageError::rotation("x.csv", storage_err);
        assert!(wrapped.is_not_found());
    }
}
