//! Error types for codec operations

use thiserror::Error;

/// Errors that can occur while decoding a payload or running the worker pool
#[derive(Debug, Error)]
pub enum CodecError {
    /// Encrypted data must be a whole number of cipher blocks
    #[error("Expected buffer length divisible by {block}, actual: {actual}")]
    Misaligned {
        /// Cipher block size in bytes
        block: usize,
        /// Length of the rejected buffer
        actual: usize,
    },

    /// The codec does not implement the requested transform
    #[error("Unsupported codec operation: {0}")]
    Unsupported(&'static str),

    /// The decompressor rejected its input
    #[error("Unpack failed: {0}")]
    Unpack(String),

    /// A task with the same key is already waiting for a result
    #[error("Decode task {0:016x} is already pending")]
    DuplicateTask(u64),

    /// A worker panicked while decoding
    #[error("Codec worker panicked while decoding task {0:016x}")]
    WorkerPanicked(u64),

    /// The pool shut down before the task completed
    #[error("Codec pool is closed")]
    PoolClosed,

    /// A worker thread could not be started
    #[error("Failed to spawn codec worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;
