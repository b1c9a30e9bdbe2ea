//! Release index model.
//!
//! An index (`.meta` file) describes one release: which archive segments
//! exist and where every logical file's encoded bytes live inside them.
//! Parsed indexes are immutable views of a release.

mod builder;
mod parser;
mod strings;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::{BdfsError, Result};

pub use builder::IndexBuilder;

/// Stable identity of a logical file: owning archive number plus the file's
/// own identifier.
///
/// Serialized as an 8-byte little-endian composite (archive first) and
/// rendered as 16 hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId {
    /// Owning archive number
    pub archive: u32,
    /// Per-file identifier
    pub file: u32,
}

impl FileId {
    /// Create an identity from its parts.
    pub const fn new(archive: u32, file: u32) -> Self {
        Self { archive, file }
    }

    /// 8-byte composite key.
    pub fn to_bytes(self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&self.archive.to_le_bytes());
        bytes[4..].copy_from_slice(&self.file.to_le_bytes());
        bytes
    }

    /// Rebuild an identity from its composite key.
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self {
            archive: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            file: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    /// Composite key as an integer, used to key decode tasks.
    pub fn key(self) -> u64 {
        u64::from_le_bytes(self.to_bytes())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}

/// Join an index folder and file name into a relative path.
pub fn relative_path(folder: &str, file: &str) -> PathBuf {
    Path::new(folder.trim_start_matches(['/', '\\'])).join(file)
}

/// One logical file's location and sizes inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Owning archive number
    pub archive: u32,
    /// Per-file identifier
    pub id: u32,
    /// Folder name, may be empty
    pub folder: String,
    /// File name
    pub file: String,
    /// Byte offset of the stored window inside the archive
    pub offset: u32,
    /// Stored (encoded) size
    pub stored_size: u32,
    /// Decoded size
    pub size: u32,
}

impl FileEntry {
    /// Identity of this file.
    pub const fn file_id(&self) -> FileId {
        FileId::new(self.archive, self.id)
    }

    /// `<folder>/<file>`, relative to any output root.
    pub fn relative_path(&self) -> PathBuf {
        relative_path(&self.folder, &self.file)
    }

    /// Case-insensitive normalized path used to compare identities across
    /// releases.
    pub fn normalized_path(&self) -> String {
        self.relative_path()
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().to_lowercase()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// The stored window of this file inside its archive's raw bytes.
    pub fn window<'a>(&self, archive: &'a [u8]) -> Result<&'a [u8]> {
        let start = self.offset as usize;
        let end = start + self.stored_size as usize;
        archive.get(start..end).ok_or_else(|| {
            BdfsError::Format(format!(
                "{} window {start}..{end} exceeds archive {} of {} bytes",
                self.relative_path().display(),
                self.archive,
                archive.len()
            ))
        })
    }
}

/// One physical archive segment and the files it owns.
#[derive(Debug, Clone)]
pub struct Archive {
    /// 1-based archive number
    pub number: u32,
    /// Identifier embedded in the index
    pub identifier: u32,
    /// Location of the raw container
    pub path: PathBuf,
    /// Files stored in this archive, in index order
    pub files: Vec<Arc<FileEntry>>,
}

impl Archive {
    /// Container file name for an archive number.
    pub fn file_name(number: u32) -> String {
        format!("PAD{number:05}.paz")
    }

    /// Sum of decoded sizes of all files.
    pub fn decoded_size(&self) -> u64 {
        self.files.iter().map(|f| u64::from(f.size)).sum()
    }
}

/// Parsed index of one release.
#[derive(Debug, Clone)]
pub struct Index {
    version: u32,
    declared_files: u32,
    archives: BTreeMap<u32, Archive>,
}

impl Index {
    /// Release version.
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Number of archives.
    pub fn archive_count(&self) -> usize {
        self.archives.len()
    }

    /// File count declared by the index header.
    pub const fn declared_files(&self) -> u32 {
        self.declared_files
    }

    /// Number of files across all archives.
    pub fn file_count(&self) -> usize {
        self.archives.values().map(|a| a.files.len()).sum()
    }

    /// Look up an archive by number.
    pub fn archive(&self, number: u32) -> Option<&Archive> {
        self.archives.get(&number)
    }

    /// Archives in ascending number order.
    pub fn archives(&self) -> impl Iterator<Item = &Archive> {
        self.archives.values()
    }

    /// Every file, archive by archive.
    pub fn files(&self) -> impl Iterator<Item = &Arc<FileEntry>> {
        self.archives.values().flat_map(|a| a.files.iter())
    }

    /// Map from identity to file entry.
    pub fn identity_map(&self) -> HashMap<FileId, Arc<FileEntry>> {
        self.files().map(|f| (f.file_id(), Arc::clone(f))).collect()
    }
}
