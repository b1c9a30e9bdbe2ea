//! Hard-linked view of the latest release.
//!
//! `<versions>/current/files` mirrors one release's full file tree without
//! copying: every file is a hard link into the release directory that last
//! added or changed it. `<versions>/current/version` records which release
//! the tree represents. Changelogs move the tree forward one release at a
//! time.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, info};

use crate::changelog::Changelog;
use crate::extract::{create_folders, make_folders};
use crate::layout::{Release, current_dir, current_files, current_marker};
use crate::ledger::Ledger;
use crate::session::Session;
use crate::{BdfsError, Result};

/// Counts reported by [`CurrentTree::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Links removed
    pub removed: usize,
    /// Links added
    pub added: usize,
    /// Links replaced
    pub changed: usize,
    /// Empty folders pruned
    pub pruned: usize,
}

/// The current tree below a versions directory.
#[derive(Debug, Clone)]
pub struct CurrentTree {
    versions: PathBuf,
}

impl CurrentTree {
    /// Current tree of `versions`.
    pub fn new(versions: impl Into<PathBuf>) -> Self {
        Self {
            versions: versions.into(),
        }
    }

    /// Root of the linked files.
    pub fn files_dir(&self) -> PathBuf {
        current_files(&self.versions)
    }

    /// Release the tree currently represents.
    pub async fn version(&self, session: &Session) -> Result<u32> {
        let path = current_marker(&self.versions);
        let data = session.guard().read(&path).await?;
        String::from_utf8_lossy(&data).trim().parse().map_err(|e| {
            BdfsError::Format(format!("bad version marker {}: {e}", path.display()))
        })
    }

    /// Link path for a release file.
    fn source(&self, version: u32, relative: &Path) -> PathBuf {
        Release::in_versions(&self.versions, version)
            .files_dir()
            .join(relative)
    }

    /// Run `op` over `items` with at most `io_batch` in flight.
    async fn batched<T, F, Fut>(session: &Session, items: Vec<T>, op: F) -> Result<usize>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let count = items.len();
        stream::iter(items)
            .map(op)
            .buffer_unordered(session.config().io_batch())
            .try_collect::<Vec<_>>()
            .await?;
        Ok(count)
    }

    /// Create the tree for `version` from its ledger.
    ///
    /// Fails with a collision if a tree already exists.
    pub async fn bootstrap(&self, session: &Session, version: u32) -> Result<usize> {
        let started = Instant::now();
        let release = Release::in_versions(&self.versions, version);

        session
            .guard()
            .create_dir_all(&current_dir(&self.versions))
            .await?;
        session
            .guard()
            .write_new(&current_marker(&self.versions), version.to_string().as_bytes())
            .await?;

        let index = session
            .load_index(&release.index_path(), &release.archive_dir())
            .await?;
        let ledger = Ledger::load(session, &release.ledger_path(), &index.identity_map()).await?;

        let mut links = Vec::with_capacity(ledger.len());
        for (id, entry) in &ledger {
            let file = entry.file.as_ref().ok_or_else(|| {
                BdfsError::Consistency(format!(
                    "ledger of release {version} lists {id} which its index does not"
                ))
            })?;
            links.push((entry.version, file.relative_path()));
        }

        let files_dir = self.files_dir();
        info!("Creating folders");
        make_folders(
            session,
            &files_dir,
            ledger.iter().filter_map(|(_, entry)| entry.file.as_deref()),
        )
        .await?;

        info!("Creating {} hard links", links.len());
        let count = Self::batched(session, links, |(source_version, relative)| {
            let source = self.source(source_version, &relative);
            let target = files_dir.join(&relative);
            async move { session.guard().hard_link(&source, &target).await.map(|_| ()) }
        })
        .await?;

        info!("Current tree at {version}: {count} links in {:?}", started.elapsed());
        Ok(count)
    }

    /// Move the tree forward to `target` using that release's changelog.
    pub async fn apply(&self, session: &Session, target: u32) -> Result<ApplySummary> {
        let started = Instant::now();
        let marker = self.version(session).await?;
        if marker >= target {
            return Err(BdfsError::Consistency(format!(
                "cannot update current tree from {marker} to {target}"
            )));
        }
        info!("Updating current tree from {marker} to {target}");

        let release = Release::in_versions(&self.versions, target);
        let text = session.guard().read(&release.changelog_path()).await?;
        let changelog = Changelog::parse(&String::from_utf8_lossy(&text))?;
        if changelog.previous != marker {
            return Err(BdfsError::Consistency(format!(
                "cannot apply changelog of {target} to current tree at {marker}, it expects {}",
                changelog.previous
            )));
        }
        if changelog.current != target {
            return Err(BdfsError::Consistency(format!(
                "changelog of release {target} declares version {}",
                changelog.current
            )));
        }

        let files_dir = self.files_dir();
        let mut summary = ApplySummary::default();

        info!("Removing {} links", changelog.removed.len());
        let removed: Vec<PathBuf> = changelog
            .removed
            .iter()
            .map(|record| files_dir.join(record.relative_path()))
            .collect();
        summary.removed = Self::batched(session, removed, |path| async move {
            session.guard().remove_file(&path).await
        })
        .await?;

        let emptied: BTreeSet<PathBuf> = changelog
            .removed
            .iter()
            .filter_map(|record| record.relative_path().parent().map(Path::to_path_buf))
            .collect();
        for folder in emptied {
            summary.pruned += self.prune(session, &folder).await?;
        }

        let folders = changelog
            .added
            .iter()
            .filter_map(|record| record.relative_path().parent().map(Path::to_path_buf));
        create_folders(session, &files_dir, folders).await?;

        info!("Adding {} links", changelog.added.len());
        let added: Vec<(PathBuf, PathBuf)> = changelog
            .added
            .iter()
            .map(|record| {
                let relative = record.relative_path();
                (self.source(record.version, &relative), files_dir.join(relative))
            })
            .collect();
        summary.added = Self::batched(session, added, |(source, target)| async move {
            session.guard().hard_link(&source, &target).await.map(|_| ())
        })
        .await?;

        info!("Replacing {} links", changelog.changed.len());
        let changed: Vec<(PathBuf, PathBuf)> = changelog
            .changed
            .iter()
            .map(|record| {
                let relative = record.relative_path();
                (self.source(record.version, &relative), files_dir.join(relative))
            })
            .collect();
        summary.changed = Self::batched(session, changed, |(source, target)| async move {
            session.guard().remove_file(&target).await?;
            if session.guard().hard_link(&source, &target).await? {
                Ok(())
            } else {
                Err(BdfsError::Collision { path: target })
            }
        })
        .await?;

        session
            .guard()
            .write(&current_marker(&self.versions), target.to_string().as_bytes())
            .await?;

        info!(
            "Current tree at {target} in {:?}: {} removed, {} added, {} changed, {} folders pruned",
            started.elapsed(),
            summary.removed,
            summary.added,
            summary.changed,
            summary.pruned
        );
        Ok(summary)
    }

    /// Remove `folder` and its ancestors while they are empty.
    async fn prune(&self, session: &Session, folder: &Path) -> Result<usize> {
        let files_dir = self.files_dir();
        let mut pruned = 0;
        let mut current = Some(folder);

        while let Some(folder) = current.filter(|f| !f.as_os_str().is_empty()) {
            if !session.guard().remove_empty_dir(&files_dir.join(folder)).await? {
                break;
            }
            debug!("Removed {}", files_dir.join(folder).display());
            pruned += 1;
            current = folder.parent();
        }
        Ok(pruned)
    }

    /// Check every file of the marked release has its declared size.
    pub async fn verify(&self, session: &Session) -> Result<usize> {
        let version = self.version(session).await?;
        let release = Release::in_versions(&self.versions, version);
        let index = session
            .load_index(&release.index_path(), &release.archive_dir())
            .await?;
        let files_dir = self.files_dir();

        let mut checked = 0;
        for archive in index.archives() {
            let files = archive.files.clone();
            checked += Self::batched(session, files, |file| {
                let path = files_dir.join(file.relative_path());
                async move {
                    let actual = session.guard().file_size(&path).await?;
                    if actual == u64::from(file.size) {
                        Ok(())
                    } else {
                        Err(BdfsError::Corruption(format!(
                            "file size mismatch for {}: actual {actual}, expected {}, paz {}",
                            file.relative_path().display(),
                            file.size,
                            file.archive
                        )))
                    }
                }
            })
            .await?;
            debug!("Checked archive {}", archive.number);
        }

        info!("Verified {checked} files of release {version}");
        Ok(checked)
    }
}
