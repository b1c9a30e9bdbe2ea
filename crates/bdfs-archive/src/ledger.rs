//! Content-addressed ledger.
//!
//! Maps every file identity of a release to the SHA-1 of its *encoded* bytes
//! and the release version that last changed it. Persisted as flat 32-byte
//! records:
//!
//! ```text
//! archive(4) file(4) version(4) digest(20)
//! ```

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::btree_map;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use binrw::{BinRead, BinWrite};
use futures::{StreamExt, TryStreamExt, stream};
use sha1::{Digest as _, Sha1};
use tracing::{debug, info};

use crate::index::{FileEntry, FileId, Index};
use crate::session::Session;
use crate::{BdfsError, Result};

/// SHA-1 digest of a file's encoded bytes.
pub type Digest = [u8; 20];

/// Digest a stored window.
pub fn digest(data: &[u8]) -> Digest {
    Sha1::digest(data).into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
struct LedgerRecord {
    archive: u32,
    file: u32,
    version: u32,
    digest: Digest,
}

impl LedgerRecord {
    const SIZE: usize = 32;
}

/// Ledger state of one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Release that last added or changed the file
    pub version: u32,
    /// Digest of the encoded bytes in that release
    pub digest: Digest,
    /// The file in the release the ledger was loaded against, if it still
    /// exists there
    pub file: Option<Arc<FileEntry>>,
}

/// Identity to digest mapping, ordered by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    entries: BTreeMap<FileId, LedgerEntry>,
}

impl Ledger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse ledger bytes, resolving each identity against `files`.
    pub fn parse(data: &[u8], files: &HashMap<FileId, Arc<FileEntry>>) -> Result<Self> {
        if data.len() % LedgerRecord::SIZE != 0 {
            return Err(BdfsError::Format(format!(
                "ledger size {} is not a multiple of {}",
                data.len(),
                LedgerRecord::SIZE
            )));
        }

        let mut cursor = Cursor::new(data);
        let mut entries = BTreeMap::new();
        for _ in 0..data.len() / LedgerRecord::SIZE {
            let record = LedgerRecord::read(&mut cursor)?;
            let id = FileId::new(record.archive, record.file);
            let entry = LedgerEntry {
                version: record.version,
                digest: record.digest,
                file: files.get(&id).cloned(),
            };
            if entries.insert(id, entry).is_some() {
                return Err(BdfsError::Format(format!("ledger lists {id} twice")));
            }
        }

        Ok(Self { entries })
    }

    /// Serialize in identity order.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(self.entries.len() * LedgerRecord::SIZE));
        for (id, entry) in &self.entries {
            LedgerRecord {
                archive: id.archive,
                file: id.file,
                version: entry.version,
                digest: entry.digest,
            }
            .write(&mut cursor)?;
        }
        Ok(cursor.into_inner())
    }

    /// Read and parse a ledger file.
    pub async fn load(
        session: &Session,
        path: &Path,
        files: &HashMap<FileId, Arc<FileEntry>>,
    ) -> Result<Self> {
        let data = session.guard().read(path).await?;
        let ledger = Self::parse(&data, files)?;
        info!("Loaded {} ledger entries from {}", ledger.len(), path.display());
        Ok(ledger)
    }

    /// Write the ledger, replacing any previous file.
    pub async fn save(&self, session: &Session, path: &Path) -> Result<()> {
        session.guard().write(path, &self.to_bytes()?).await?;
        info!("Saved {} ledger entries to {}", self.len(), path.display());
        Ok(())
    }

    /// Digest every file of `index` from its archives.
    ///
    /// Each archive is read once; up to `io_batch` archives are in flight.
    pub async fn build(session: &Session, index: &Index) -> Result<Self> {
        let version = index.version();
        let digested: Vec<Vec<(FileId, LedgerEntry)>> = stream::iter(index.archives())
            .map(|archive| async move {
                let data = session.guard().read(&archive.path).await?;
                let files = archive.files.clone();
                let number = archive.number;
                let entries = tokio::task::spawn_blocking(move || {
                    files
                        .into_iter()
                        .map(|file| {
                            let hash = digest(file.window(&data)?);
                            let entry = LedgerEntry {
                                version,
                                digest: hash,
                                file: Some(Arc::clone(&file)),
                            };
                            Ok((file.file_id(), entry))
                        })
                        .collect::<Result<Vec<_>>>()
                })
                .await??;
                debug!("Digested archive {number}: {} files", entries.len());
                Ok::<_, BdfsError>(entries)
            })
            .buffer_unordered(session.config().io_batch())
            .try_collect()
            .await?;

        let mut ledger = Self::new();
        for (id, entry) in digested.into_iter().flatten() {
            ledger.insert(id, entry);
        }
        info!("Digested {} files of release {version}", ledger.len());
        Ok(ledger)
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an identity.
    pub fn get(&self, id: &FileId) -> Option<&LedgerEntry> {
        self.entries.get(id)
    }

    /// Insert or replace an identity.
    pub fn insert(&mut self, id: FileId, entry: LedgerEntry) -> Option<LedgerEntry> {
        self.entries.insert(id, entry)
    }

    /// Remove an identity.
    pub fn remove(&mut self, id: &FileId) -> Option<LedgerEntry> {
        self.entries.remove(id)
    }

    /// Entries in identity order.
    pub fn iter(&self) -> btree_map::Iter<'_, FileId, LedgerEntry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a Ledger {
    type Item = (&'a FileId, &'a LedgerEntry);
    type IntoIter = btree_map::Iter<'a, FileId, LedgerEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
