//! Error types for archive operations.
//!
//! Every variant except [`BdfsError::Io`] describes a condition after which
//! the on-disk ledger or changelog can no longer be trusted, so callers are
//! expected to stop the run rather than retry.

use std::path::{Path, PathBuf};

use bdfs_codec::CodecError;
use thiserror::Error;

/// Errors that can occur while extracting or updating releases.
#[derive(Debug, Error)]
pub enum BdfsError {
    /// Filesystem operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path the operation was applied to
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Malformed index, ledger, changelog or patch log.
    #[error("Invalid format: {0}")]
    Format(String),

    /// Identity, path or version invariant violated.
    #[error("Consistency violation: {0}")]
    Consistency(String),

    /// Decoded or materialized data does not match its declared size.
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// Exclusive create hit an existing file.
    #[error("Refusing to overwrite existing file {}", path.display())]
    Collision {
        /// Path that already exists
        path: PathBuf,
    },

    /// The payload codec failed.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A spawned pipeline task panicked or was cancelled.
    #[error("Pipeline task failed: {0}")]
    Task(String),
}

impl BdfsError {
    /// Attach a path to an I/O error.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<binrw::Error> for BdfsError {
    fn from(err: binrw::Error) -> Self {
        Self::Format(err.to_string())
    }
}

impl From<tokio::task::JoinError> for BdfsError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, BdfsError>;
