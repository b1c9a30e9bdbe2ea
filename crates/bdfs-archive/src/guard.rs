//! Resource-exhaustion guard for filesystem primitives.
//!
//! Extraction and linking issue thousands of concurrent filesystem calls.
//! When the process runs out of file handles the call is retried after a
//! shared, adaptive delay instead of failing:
//!
//! - exhaustion grows the delay to `min((delay + 10) * 1.1, 5000)` ms
//! - any other completion halves it
//!
//! "Already exists" on idempotent primitives resolves as success so that a
//! partially completed run can be repeated.

use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{trace, warn};

use crate::{BdfsError, Result};

/// Upper bound of the retry delay in milliseconds.
pub const MAX_DELAY_MS: f64 = 5000.0;

/// Whether an error means the process ran out of file handles.
pub fn is_exhausted(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(err.raw_os_error(), Some(libc::EMFILE | libc::ENFILE))
    }
    #[cfg(windows)]
    {
        // ERROR_TOO_MANY_OPEN_FILES
        err.raw_os_error() == Some(4)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = err;
        false
    }
}

/// Retry wrapper shared by every filesystem operation of a run.
#[derive(Debug, Default)]
pub struct FsGuard {
    delay_ms: Mutex<f64>,
}

impl FsGuard {
    /// Create a guard with no delay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current retry delay in milliseconds.
    pub fn delay_ms(&self) -> f64 {
        *self.delay_ms.lock()
    }

    fn grow(&self) -> Duration {
        let mut delay = self.delay_ms.lock();
        *delay = ((*delay + 10.0) * 1.1).min(MAX_DELAY_MS);
        Duration::from_secs_f64(*delay / 1000.0)
    }

    fn shrink(&self) {
        *self.delay_ms.lock() *= 0.5;
    }

    /// Run `op` until it completes with something other than handle
    /// exhaustion.
    ///
    /// The delay halves on success and on "already exists". Other errors
    /// leave it untouched.
    pub async fn retry<T, F, Fut>(&self, mut op: F) -> io::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        loop {
            match op().await {
                Err(err) if is_exhausted(&err) => {
                    let wait = self.grow();
                    warn!("File handles exhausted, retrying in {wait:?}");
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    if err.kind() == io::ErrorKind::AlreadyExists {
                        self.shrink();
                    }
                    return Err(err);
                }
                Ok(value) => {
                    self.shrink();
                    return Ok(value);
                }
            }
        }
    }

    /// Like [`retry`](Self::retry), but "already exists" resolves to
    /// `Ok(None)`.
    pub async fn attempt<T, F, Fut>(&self, op: F) -> io::Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        match self.retry(op).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Read a whole file.
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.retry(|| fs::read(path))
            .await
            .map_err(|e| BdfsError::io(path, e))
    }

    /// Write a file, replacing any previous content.
    pub async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.retry(|| fs::write(path, data))
            .await
            .map_err(|e| BdfsError::io(path, e))
    }

    /// Write a file that must not exist yet.
    pub async fn write_new(&self, path: &Path, data: &[u8]) -> Result<()> {
        let result = self
            .retry(|| async {
                let mut file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(path)
                    .await?;
                file.write_all(data).await?;
                file.flush().await
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(BdfsError::Collision {
                path: path.to_path_buf(),
            }),
            Err(err) => Err(BdfsError::io(path, err)),
        }
    }

    /// Create a directory and its parents.
    pub async fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.attempt(|| fs::create_dir_all(path))
            .await
            .map(|_| ())
            .map_err(|e| BdfsError::io(path, e))
    }

    /// Copy `src` to `dst` unless `dst` already exists.
    ///
    /// Returns `false` when `dst` was already present.
    pub async fn copy_new(&self, src: &Path, dst: &Path) -> Result<bool> {
        let copied = self
            .attempt(|| async {
                let mut source = fs::File::open(src).await?;
                let mut target = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(dst)
                    .await?;
                tokio::io::copy(&mut source, &mut target).await?;
                target.flush().await
            })
            .await
            .map_err(|e| BdfsError::io(dst, e))?;

        if copied.is_none() {
            trace!("{} already archived", dst.display());
        }
        Ok(copied.is_some())
    }

    /// Hard-link `dst` to `src` unless `dst` already exists.
    pub async fn hard_link(&self, src: &Path, dst: &Path) -> Result<bool> {
        self.attempt(|| fs::hard_link(src, dst))
            .await
            .map(|linked| linked.is_some())
            .map_err(|e| BdfsError::io(dst, e))
    }

    /// Remove a file.
    pub async fn remove_file(&self, path: &Path) -> Result<()> {
        self.retry(|| fs::remove_file(path))
            .await
            .map_err(|e| BdfsError::io(path, e))
    }

    /// Remove a directory if it is empty.
    ///
    /// Returns `false` when the directory still has entries or is gone.
    pub async fn remove_empty_dir(&self, path: &Path) -> Result<bool> {
        match self.retry(|| fs::remove_dir(path)).await {
            Ok(()) => Ok(true),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::DirectoryNotEmpty | io::ErrorKind::NotFound
                ) =>
            {
                Ok(false)
            }
            Err(err) => Err(BdfsError::io(path, err)),
        }
    }

    /// Size of a file in bytes.
    pub async fn file_size(&self, path: &Path) -> Result<u64> {
        self.retry(|| fs::metadata(path))
            .await
            .map(|meta| meta.len())
            .map_err(|e| BdfsError::io(path, e))
    }
}
