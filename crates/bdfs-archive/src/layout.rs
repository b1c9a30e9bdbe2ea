//! On-disk layout of releases, the live game directory and the current tree.

use std::path::{Path, PathBuf};

use crate::index::Archive;
use crate::{BdfsError, Result};

/// Name of the live index container inside the game's archive directory.
pub const LIVE_INDEX: &str = "pad00000.meta";

/// One extracted release: `<versions>/<version>/`.
///
/// ```text
/// <v>.meta          index
/// <v>.sha1          ledger
/// <v>.log           changelog
/// <v>.update.log    external patch log
/// bdo/paz/          archived containers
/// files/            decoded files
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    root: PathBuf,
    version: u32,
}

impl Release {
    /// Release rooted at `root` with an explicit version.
    pub fn new(root: impl Into<PathBuf>, version: u32) -> Self {
        Self {
            root: root.into(),
            version,
        }
    }

    /// Release whose version is the decimal basename of `root`.
    pub fn from_dir(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let version = root
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.parse::<u32>().ok())
            .ok_or_else(|| {
                BdfsError::Format(format!(
                    "release directory {} is not named after a version",
                    root.display()
                ))
            })?;
        Ok(Self { root, version })
    }

    /// Release `version` inside a versions directory.
    pub fn in_versions(versions: &Path, version: u32) -> Self {
        Self::new(versions.join(version.to_string()), version)
    }

    /// Release root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Release version.
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Index file.
    pub fn index_path(&self) -> PathBuf {
        self.root.join(format!("{}.meta", self.version))
    }

    /// Ledger file.
    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(format!("{}.sha1", self.version))
    }

    /// Changelog file.
    pub fn changelog_path(&self) -> PathBuf {
        self.root.join(format!("{}.log", self.version))
    }

    /// External patch log.
    pub fn patch_log_path(&self) -> PathBuf {
        self.root.join(format!("{}.update.log", self.version))
    }

    /// Directory of archived containers.
    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("bdo").join("paz")
    }

    /// Root of the decoded file tree.
    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }
}

/// Live game installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameDir {
    root: PathBuf,
}

impl GameDir {
    /// Game installation rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Archive directory of the installation.
    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("paz")
    }

    /// Live index container.
    pub fn index_path(&self) -> PathBuf {
        self.archive_dir().join(LIVE_INDEX)
    }

    /// Container of archive `number`.
    pub fn archive_path(&self, number: u32) -> PathBuf {
        self.archive_dir().join(Archive::file_name(number))
    }
}

/// `<versions>/current/`.
pub fn current_dir(versions: &Path) -> PathBuf {
    versions.join("current")
}

/// Version marker of the current tree.
pub fn current_marker(versions: &Path) -> PathBuf {
    current_dir(versions).join("version")
}

/// Root of the current tree's linked files.
pub fn current_files(versions: &Path) -> PathBuf {
    current_dir(versions).join("files")
}
