//! Incremental update engine.
//!
//! Diffs the live game installation against the previous extracted release
//! using the previous ledger, extracts only added and changed files into the
//! new release directory, archives the containers that changed, and persists
//! the changelog and the updated ledger.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::changelog::Changelog;
use crate::extract::write_entries;
use crate::index::{Archive, FileEntry, Index};
use crate::layout::{GameDir, LIVE_INDEX, Release};
use crate::ledger::{Digest, Ledger, LedgerEntry, digest};
use crate::patch_log::PatchLog;
use crate::session::Session;
use crate::{BdfsError, Result};

/// Digest every file of an archive's bytes off the async runtime.
async fn digest_archive(
    data: Arc<Vec<u8>>,
    files: Vec<Arc<FileEntry>>,
) -> Result<Vec<(Arc<FileEntry>, Digest)>> {
    tokio::task::spawn_blocking(move || {
        files
            .into_iter()
            .map(|file| {
                let hash = digest(file.window(&data)?);
                Ok((file, hash))
            })
            .collect::<Result<Vec<_>>>()
    })
    .await?
}

/// Reject identities whose case-insensitive path moved between releases.
pub fn check_path_stability(previous: &Index, current: &Index) -> Result<()> {
    let previous = previous.identity_map();
    for file in current.files() {
        if let Some(old) = previous.get(&file.file_id())
            && old.normalized_path() != file.normalized_path()
        {
            return Err(BdfsError::Consistency(format!(
                "identity {} moved from {} to {}",
                file.file_id(),
                old.relative_path().display(),
                file.relative_path().display()
            )));
        }
    }
    Ok(())
}

/// Update `next` from the live `game` installation, diffing against
/// `previous`.
///
/// Versions are taken from the release directories. Nothing is written
/// before the version ordering and the patch log have been checked, and the
/// changelog and ledger are only persisted once the ledger covers the new
/// release exactly.
pub async fn update(
    session: &Session,
    game: &GameDir,
    previous: &Release,
    next: &Release,
) -> Result<Changelog> {
    let started = Instant::now();
    let (previous_version, current_version) = (previous.version(), next.version());
    if previous_version >= current_version {
        return Err(BdfsError::Consistency(format!(
            "cannot update {previous_version} to {current_version}"
        )));
    }
    info!("Updating {previous_version} -> {current_version}");

    let patch_log = session.guard().read(&next.patch_log_path()).await?;
    PatchLog::parse(&String::from_utf8_lossy(&patch_log))?
        .validate(previous_version, current_version)?;

    session
        .guard()
        .copy_new(&game.index_path(), &next.index_path())
        .await?;

    let (previous_meta, previous_archives) = (previous.index_path(), previous.archive_dir());
    let (current_meta, current_archives) = (next.index_path(), next.archive_dir());
    let (previous_index, current_index) = tokio::try_join!(
        session.load_index(&previous_meta, &previous_archives),
        session.load_index(&current_meta, &current_archives),
    )?;
    if previous_index.version() != previous_version || current_index.version() != current_version
    {
        return Err(BdfsError::Consistency(format!(
            "index versions {} -> {} do not match release directories {previous_version} -> {current_version}",
            previous_index.version(),
            current_index.version()
        )));
    }

    let current_files = current_index.identity_map();
    let mut ledger = Ledger::load(session, &previous.ledger_path(), &current_files).await?;
    let mut changelog = Changelog::new(previous_version, current_version);

    for file in previous_index.files() {
        let id = file.file_id();
        if let Some(entry) = ledger.get(&id)
            && entry.file.is_none()
        {
            changelog.push_removed(file, entry.version, entry.digest);
            ledger.remove(&id);
        }
    }
    debug!("{} files removed", changelog.removed.len());

    info!("Comparing paths");
    check_path_stability(&previous_index, &current_index)?;

    info!("Processing archives");
    let files_dir = next.files_dir();
    for archive in current_index.archives() {
        let data = Arc::new(
            session
                .guard()
                .read(&game.archive_path(archive.number))
                .await?,
        );
        let digested = digest_archive(Arc::clone(&data), archive.files.clone()).await?;

        let mut queued = Vec::new();
        for (file, hash) in digested {
            let id = file.file_id();
            match ledger.get(&id) {
                None => changelog.push_added(&file, hash),
                Some(entry) if entry.digest != hash => {
                    changelog.push_changed(&file, entry.version, hash, entry.digest);
                }
                Some(_) => continue,
            }
            ledger.insert(
                id,
                LedgerEntry {
                    version: current_version,
                    digest: hash,
                    file: Some(Arc::clone(&file)),
                },
            );
            queued.push(file);
        }

        info!(
            "Archive {}: extracting {} files",
            archive.number,
            queued.len()
        );
        if !queued.is_empty() {
            write_entries(session, &files_dir, data, queued).await?;
        }
    }

    archive_containers(session, game, next, &current_index, &changelog).await?;

    if current_files.len() != ledger.len() {
        return Err(BdfsError::Consistency(format!(
            "ledger holds {} identities but release {current_version} has {}",
            ledger.len(),
            current_files.len()
        )));
    }

    session
        .guard()
        .write(&next.changelog_path(), changelog.render()?.as_bytes())
        .await?;
    ledger.save(session, &next.ledger_path()).await?;

    let numbers = changelog.numbers();
    info!(
        "Update {previous_version} -> {current_version} done in {:?}: {} added, {} removed, {} changed",
        started.elapsed(),
        numbers.added,
        numbers.removed,
        numbers.changed
    );
    Ok(changelog)
}

/// Copy every updated archive still present in the live release, plus the
/// live index, into the release's archive directory.
async fn archive_containers(
    session: &Session,
    game: &GameDir,
    next: &Release,
    current: &Index,
    changelog: &Changelog,
) -> Result<()> {
    let target = next.archive_dir();
    session.guard().create_dir_all(&target).await?;
    info!(
        "Copying {} archives to {}",
        changelog.updated_archives.len(),
        target.display()
    );

    for &number in &changelog.updated_archives {
        if current.archive(number).is_none() {
            debug!("Archive {number} no longer exists, not archived");
            continue;
        }
        session
            .guard()
            .copy_new(
                &game.archive_path(number),
                &target.join(Archive::file_name(number)),
            )
            .await?;
    }
    session
        .guard()
        .copy_new(&game.index_path(), &target.join(LIVE_INDEX))
        .await?;
    Ok(())
}
