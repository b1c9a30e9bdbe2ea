//! Bounded-memory extraction pipeline.
//!
//! Archives are read once each, in ascending order. A completed read spawns
//! one decode+write task per selected file. The extractor tracks the decoded
//! size of everything submitted since the last flush and, once that exceeds
//! the memory ceiling, flushes in two phases: all outstanding reads first,
//! then every decode+write task those reads spawned.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::{StreamExt, TryStreamExt, stream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::index::{Archive, FileEntry, Index};
use crate::session::Session;
use crate::{BdfsError, Result};

/// How a stored window becomes decoded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeRoute {
    /// Zero-sized file, nothing to decode
    Empty,
    /// Stored verbatim, keep the first `size` bytes
    Verbatim,
    /// Hand to the codec workers
    Codec,
}

impl DecodeRoute {
    /// Pick the route for a file.
    pub fn for_entry(entry: &FileEntry, session: &Session) -> Self {
        if entry.size == 0 || entry.stored_size == 0 {
            Self::Empty
        } else if entry.stored_size as usize % bdfs_codec::BLOCK_SIZE != 0
            || session.config().is_raw(&entry.file)
        {
            Self::Verbatim
        } else {
            Self::Codec
        }
    }
}

/// Decode one stored window.
///
/// Output shorter than the declared size is corruption.
pub async fn decode_entry(session: &Session, entry: &FileEntry, window: Vec<u8>) -> Result<Vec<u8>> {
    let size = entry.size as usize;
    let decoded = match DecodeRoute::for_entry(entry, session) {
        DecodeRoute::Empty => return Ok(Vec::new()),
        DecodeRoute::Verbatim => {
            let mut data = window;
            data.truncate(size);
            data
        }
        DecodeRoute::Codec => {
            session
                .pool()
                .decode(entry.file_id().key(), window, size)
                .await?
        }
    };

    if decoded.len() < size {
        return Err(BdfsError::Corruption(format!(
            "{} decoded to {} bytes, expected {size}",
            entry.relative_path().display(),
            decoded.len()
        )));
    }
    Ok(decoded)
}

/// Decode `entry` from its archive's bytes and write it under `root`.
async fn decode_write(
    session: Session,
    archive: Arc<Vec<u8>>,
    entry: Arc<FileEntry>,
    root: Arc<PathBuf>,
) -> Result<()> {
    let window = entry.window(&archive)?.to_vec();
    drop(archive);

    let data = decode_entry(&session, &entry, window).await?;
    let path = root.join(entry.relative_path());
    session.guard().write_new(&path, &data).await?;
    debug!("Wrote {} ({} bytes)", path.display(), data.len());
    Ok(())
}

fn spawn_decode_write(
    session: Session,
    archive: Arc<Vec<u8>>,
    entry: Arc<FileEntry>,
    root: Arc<PathBuf>,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let id = entry.file_id();
        let result = decode_write(session, archive, Arc::clone(&entry), root).await;
        if let Err(e) = &result {
            error!(
                "Extraction of {} ({id}) failed: {e}",
                entry.relative_path().display()
            );
        }
        result
    })
}

/// Create every distinct folder the entries need under `root`.
pub async fn make_folders<'a>(
    session: &Session,
    root: &Path,
    entries: impl IntoIterator<Item = &'a FileEntry>,
) -> Result<usize> {
    let folders = entries
        .into_iter()
        .filter_map(|entry| entry.relative_path().parent().map(Path::to_path_buf));
    create_folders(session, root, folders).await
}

/// Create `root` and each distinct relative folder below it.
pub async fn create_folders(
    session: &Session,
    root: &Path,
    folders: impl IntoIterator<Item = PathBuf>,
) -> Result<usize> {
    let folders: BTreeSet<PathBuf> = folders
        .into_iter()
        .filter(|folder| !folder.as_os_str().is_empty())
        .map(|folder| root.join(folder))
        .collect();
    let count = folders.len();

    session.guard().create_dir_all(root).await?;
    stream::iter(folders)
        .map(|folder| async move { session.guard().create_dir_all(&folder).await })
        .buffer_unordered(session.config().io_batch())
        .try_collect::<Vec<_>>()
        .await?;

    debug!("Created {count} folders under {}", root.display());
    Ok(count)
}

type ReadTask = JoinHandle<Result<Vec<JoinHandle<Result<()>>>>>;

/// Counters reported when an extractor finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Archives read
    pub archives: usize,
    /// Files written
    pub files: usize,
    /// Flushes performed, including the final one
    pub flushes: usize,
}

/// Read/decode/write pipeline with a memory ceiling.
pub struct Extractor {
    session: Session,
    root: Arc<PathBuf>,
    reads: Vec<ReadTask>,
    claimed: u64,
    batch_started: Instant,
    summary: ExtractSummary,
}

impl Extractor {
    /// Pipeline writing into `root`. Folders must already exist.
    pub fn new(session: Session, root: impl Into<PathBuf>) -> Self {
        Self {
            session,
            root: Arc::new(root.into()),
            reads: Vec::new(),
            claimed: 0,
            batch_started: Instant::now(),
            summary: ExtractSummary::default(),
        }
    }

    /// Decoded bytes submitted since the last flush.
    pub const fn claimed(&self) -> u64 {
        self.claimed
    }

    /// Queue the read of `archive` and the decode of its selected files.
    pub fn submit<F>(&mut self, archive: &Archive, filter: F)
    where
        F: Fn(&FileEntry) -> bool,
    {
        let selected: Vec<Arc<FileEntry>> = archive
            .files
            .iter()
            .filter(|entry| filter(entry.as_ref()))
            .cloned()
            .collect();
        if selected.is_empty() {
            return;
        }

        self.claimed += selected.iter().map(|f| u64::from(f.size)).sum::<u64>();
        self.summary.archives += 1;
        self.summary.files += selected.len();
        info!(
            "Archive {}: {} files queued",
            archive.number,
            selected.len()
        );

        let session = self.session.clone();
        let root = Arc::clone(&self.root);
        let path = archive.path.clone();
        self.reads.push(tokio::spawn(async move {
            let data = match session.guard().read(&path).await {
                Ok(data) => Arc::new(data),
                Err(e) => {
                    error!("Reading archive failed: {e}");
                    return Err(e);
                }
            };
            Ok(selected
                .into_iter()
                .map(|entry| {
                    spawn_decode_write(
                        session.clone(),
                        Arc::clone(&data),
                        entry,
                        Arc::clone(&root),
                    )
                })
                .collect())
        }));
    }

    /// Flush if the claimed size went over the ceiling.
    pub async fn check(&mut self) -> Result<()> {
        if self.claimed > self.session.config().memory_ceiling {
            self.flush().await?;
        }
        Ok(())
    }

    /// Wait for every read, then for every decode+write task.
    pub async fn flush(&mut self) -> Result<()> {
        debug!("Waiting for {} archive reads", self.reads.len());
        let mut writes = Vec::new();
        for read in std::mem::take(&mut self.reads) {
            writes.extend(read.await??);
        }

        debug!("Waiting for {} decode tasks", writes.len());
        for write in writes {
            write.await??;
        }

        info!(
            "Flushed {} bytes in {:?}",
            self.claimed,
            self.batch_started.elapsed()
        );
        self.claimed = 0;
        self.summary.flushes += 1;
        self.batch_started = Instant::now();
        Ok(())
    }

    /// Flush what is left and report.
    pub async fn finish(mut self) -> Result<ExtractSummary> {
        if !self.reads.is_empty() {
            self.flush().await?;
        }
        Ok(self.summary)
    }
}

/// Extract the selected archives and files of `index` into `root`.
pub async fn extract_index<A, F>(
    session: &Session,
    index: &Index,
    root: &Path,
    archive_filter: A,
    file_filter: F,
) -> Result<ExtractSummary>
where
    A: Fn(&Archive) -> bool,
    F: Fn(&FileEntry) -> bool,
{
    let selected = index
        .archives()
        .filter(|archive| archive_filter(*archive))
        .flat_map(|archive| archive.files.iter())
        .map(Arc::as_ref)
        .filter(|entry| file_filter(*entry));
    make_folders(session, root, selected).await?;

    let mut extractor = Extractor::new(session.clone(), root);
    for archive in index.archives().filter(|archive| archive_filter(*archive)) {
        extractor.submit(archive, &file_filter);
        extractor.check().await?;
    }
    let summary = extractor.finish().await?;

    info!(
        "Extracted {} files from {} archives",
        summary.files, summary.archives
    );
    Ok(summary)
}

/// Extract an entire index into `root`.
pub async fn extract_all(session: &Session, index: &Index, root: &Path) -> Result<ExtractSummary> {
    extract_index(session, index, root, |_| true, |_| true).await
}

/// Decode and write `entries` from one archive's already-read bytes.
///
/// Returns once every file is on disk.
pub async fn write_entries(
    session: &Session,
    root: &Path,
    archive: Arc<Vec<u8>>,
    entries: Vec<Arc<FileEntry>>,
) -> Result<usize> {
    make_folders(session, root, entries.iter().map(Arc::as_ref)).await?;

    let root = Arc::new(root.to_path_buf());
    let handles: Vec<_> = entries
        .into_iter()
        .map(|entry| {
            spawn_decode_write(
                session.clone(),
                Arc::clone(&archive),
                entry,
                Arc::clone(&root),
            )
        })
        .collect();
    drop(archive);

    let count = handles.len();
    for handle in handles {
        handle.await??;
    }
    Ok(count)
}
