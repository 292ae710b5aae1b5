//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store directory is locked by another process.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// A table document on disk could not be decoded.
    #[error("table '{table}' corrupted: {message}")]
    Corrupted {
        /// Name of the table.
        table: String,
        /// Description of the decode failure.
        message: String,
    },

    /// A table document could not be encoded for persistence.
    #[error("table '{table}' could not be encoded: {message}")]
    Encode {
        /// Name of the table.
        table: String,
        /// Description of the encode failure.
        message: String,
    },

    /// The store path is not usable.
    #[error("invalid store path: {path}")]
    InvalidPath {
        /// The offending path.
        path: String,
    },
}

impl StorageError {
    /// Creates a corrupted-table error.
    pub fn corrupted(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupted {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates an encode error.
    pub fn encode(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encode {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid-path error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into() }
    }
}
