//! Shared state of one run.

use std::path::Path;
use std::sync::Arc;

use bdfs_codec::{Codec, CodecPool, TextDecoder};
use tracing::info;

use crate::config::BdfsConfig;
use crate::guard::FsGuard;
use crate::index::Index;
use crate::Result;

/// Configuration, filesystem guard and codec workers of a run.
///
/// Cheap to clone; clones share the guard's backoff delay and the worker
/// pool.
#[derive(Clone)]
pub struct Session {
    config: Arc<BdfsConfig>,
    guard: Arc<FsGuard>,
    codec: Arc<dyn Codec>,
    text: Arc<dyn TextDecoder>,
    pool: Arc<CodecPool>,
}

impl Session {
    /// Start a session. Must be called inside a Tokio runtime.
    pub fn new(
        config: BdfsConfig,
        codec: Arc<dyn Codec>,
        text: Arc<dyn TextDecoder>,
    ) -> Result<Self> {
        let pool = CodecPool::new(Arc::clone(&codec), config.workers)?;
        Ok(Self {
            config: Arc::new(config),
            guard: Arc::new(FsGuard::new()),
            codec,
            text,
            pool: Arc::new(pool),
        })
    }

    /// Run configuration.
    pub fn config(&self) -> &BdfsConfig {
        &self.config
    }

    /// Filesystem guard.
    pub fn guard(&self) -> &FsGuard {
        &self.guard
    }

    /// Payload codec.
    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// Decode worker pool.
    pub fn pool(&self) -> &CodecPool {
        &self.pool
    }

    /// Read and parse an index, resolving archives against `archive_dir`.
    pub async fn load_index(&self, index_path: &Path, archive_dir: &Path) -> Result<Index> {
        info!("Loading index {}", index_path.display());
        let data = self.guard.read(index_path).await?;
        Index::parse(&data, archive_dir, self.codec.as_ref(), self.text.as_ref())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("workers", &self.pool.workers())
            .finish_non_exhaustive()
    }
}
