//! Configuration for extraction and update runs

use bdfs_codec::DEFAULT_WORKERS;
use serde::{Deserialize, Serialize};

/// Default ceiling on decoded bytes held by in-flight extraction work.
pub const DEFAULT_MEMORY_CEILING: u64 = 1_000_000_000;

/// Default number of concurrent link/unlink/stat/read operations.
pub const DEFAULT_IO_BATCH: usize = 100;

/// Configuration shared by all operations of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BdfsConfig {
    /// Flush the extractor once claimed decoded bytes exceed this
    pub memory_ceiling: u64,

    /// Number of codec worker threads
    pub workers: usize,

    /// Maximum concurrent filesystem operations in batched phases
    pub io_batch: usize,

    /// File extensions (without dot) stored verbatim in archives
    pub raw_extensions: Vec<String>,
}

impl Default for BdfsConfig {
    fn default() -> Self {
        Self {
            memory_ceiling: DEFAULT_MEMORY_CEILING,
            workers: DEFAULT_WORKERS,
            io_batch: DEFAULT_IO_BATCH,
            raw_extensions: vec!["dbss".to_string()],
        }
    }
}

impl BdfsConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the extractor memory ceiling
    #[must_use]
    pub const fn with_memory_ceiling(mut self, bytes: u64) -> Self {
        self.memory_ceiling = bytes;
        self
    }

    /// Set the number of codec workers
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the filesystem batch size
    #[must_use]
    pub const fn with_io_batch(mut self, batch: usize) -> Self {
        self.io_batch = batch;
        self
    }

    /// Replace the list of verbatim extensions
    #[must_use]
    pub fn with_raw_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `file_name` is stored verbatim, judged by its extension
    pub fn is_raw(&self, file_name: &str) -> bool {
        std::path::Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.raw_extensions.iter().any(|raw| raw == ext))
    }

    /// Filesystem batch size, never zero
    pub fn io_batch(&self) -> usize {
        self.io_batch.max(1)
    }
}
