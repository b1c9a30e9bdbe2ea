//! Extraction and incremental update of PAD/PAZ multi-archive releases.
//!
//! A release consists of a binary index (`.meta`) describing thousands of
//! files spread over numbered archive containers (`PAD#####.paz`). This crate
//! parses the index, decodes every file into a plain directory tree with
//! bounded memory, and keeps successive releases cheap to store:
//!
//! - a content-addressed [`Ledger`] records the SHA-1 of every file's encoded
//!   bytes, so a new release is diffed without decoding anything
//! - [`update`] extracts only added and changed files and writes a
//!   [`Changelog`]
//! - [`CurrentTree`] keeps a hard-linked view of the latest release
//!
//! All filesystem access goes through an [`FsGuard`] that rides out file
//! handle exhaustion.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use bdfs_archive::{BdfsConfig, Session, extract_all};
//! use bdfs_codec::{PassthroughCodec, Utf8Text};
//!
//! #[tokio::main]
//! async fn main() -> bdfs_archive::Result<()> {
//!     let session = Session::new(
//!         BdfsConfig::default(),
//!         Arc::new(PassthroughCodec),
//!         Arc::new(Utf8Text),
//!     )?;
//!     let index = session
//!         .load_index(Path::new("paz/pad00000.meta"), Path::new("paz"))
//!         .await?;
//!     extract_all(&session, &index, Path::new("out")).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod changelog;
pub mod config;
pub mod current;
pub mod error;
pub mod extract;
pub mod guard;
pub mod index;
pub mod layout;
pub mod ledger;
pub mod patch_log;
pub mod session;
pub mod update;

pub use changelog::{ChangedRecord, Changelog, FileRecord, UpdateNumbers};
pub use config::BdfsConfig;
pub use current::{ApplySummary, CurrentTree};
pub use error::{BdfsError, Result};
pub use extract::{ExtractSummary, Extractor, extract_all, extract_index};
pub use guard::FsGuard;
pub use index::{Archive, FileEntry, FileId, Index, IndexBuilder};
pub use layout::{GameDir, Release};
pub use ledger::{Digest, Ledger, LedgerEntry};
pub use patch_log::PatchLog;
pub use session::Session;
pub use update::update;
