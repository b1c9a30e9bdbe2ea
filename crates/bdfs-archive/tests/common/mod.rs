//! Fixture releases for integration tests

#![allow(clippy::unwrap_used, dead_code)]

use std::path::Path;
use std::sync::Arc;

use bdfs_archive::{BdfsConfig, FileEntry, GameDir, IndexBuilder, Ledger, Release, Session};
use bdfs_codec::{BLOCK_SIZE, Codec, CodecError, PayloadHeader, Utf8Text, check_aligned};

const KEY: u8 = 0x3C;

/// XOR cipher whose unpacker repeats the packed body up to the output size.
pub struct XorCodec;

impl Codec for XorCodec {
    fn decrypt(&self, data: &mut [u8]) -> bdfs_codec::Result<()> {
        check_aligned(data)?;
        data.iter_mut().for_each(|b| *b ^= KEY);
        Ok(())
    }

    fn encrypt(&self, data: &mut [u8]) -> bdfs_codec::Result<()> {
        self.decrypt(data)
    }

    fn unpack(&self, packed: &[u8], size: usize) -> bdfs_codec::Result<Vec<u8>> {
        let header = PayloadHeader::probe(packed)
            .ok_or_else(|| CodecError::Unpack("missing header".to_string()))?;
        let body = packed
            .get(9..9 + header.packed_size as usize)
            .ok_or_else(|| CodecError::Unpack("truncated body".to_string()))?;
        Ok(body.iter().copied().cycle().take(size).collect())
    }
}

/// How a fixture file is stored inside its archive.
#[derive(Debug, Clone)]
pub enum Stored {
    /// Encrypted, padded to whole blocks
    Sealed(Vec<u8>),
    /// Packed body expanded to `size` on decode
    Packed { body: Vec<u8>, size: u32 },
    /// Stored verbatim with `trailer` extra bytes after the content
    Verbatim { content: Vec<u8>, trailer: usize },
    /// Zero stored and decoded size
    Empty,
}

/// A fixture file.
#[derive(Debug, Clone)]
pub struct Spec {
    pub id: u32,
    pub folder: &'static str,
    pub file: &'static str,
    pub stored: Stored,
}

impl Spec {
    pub fn sealed(id: u32, folder: &'static str, file: &'static str, content: &[u8]) -> Self {
        Self {
            id,
            folder,
            file,
            stored: Stored::Sealed(content.to_vec()),
        }
    }

    /// Content a correct extraction produces.
    pub fn decoded(&self) -> Vec<u8> {
        match &self.stored {
            Stored::Sealed(content) => content.clone(),
            Stored::Packed { body, size } => body.iter().copied().cycle().take(*size as usize).collect(),
            Stored::Verbatim { content, .. } => content.clone(),
            Stored::Empty => Vec::new(),
        }
    }

    fn encode(&self) -> (Vec<u8>, u32) {
        let seal = |mut data: Vec<u8>| {
            data.resize(data.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, 0);
            XorCodec.encrypt(&mut data).unwrap();
            data
        };
        match &self.stored {
            Stored::Sealed(content) => (seal(content.clone()), content.len() as u32),
            Stored::Packed { body, size } => {
                let mut data = vec![0x6F];
                data.extend_from_slice(&(body.len() as u32).to_le_bytes());
                data.extend_from_slice(&size.to_le_bytes());
                data.extend_from_slice(body);
                (seal(data), *size)
            }
            Stored::Verbatim { content, trailer } => {
                let mut data = content.clone();
                data.resize(content.len() + trailer, 0xEE);
                (data, content.len() as u32)
            }
            Stored::Empty => (Vec::new(), 0),
        }
    }
}

/// Session with the XOR codec and a small worker pool.
pub fn session(config: BdfsConfig) -> Session {
    Session::new(config.with_workers(2), Arc::new(XorCodec), Arc::new(Utf8Text)).unwrap()
}

/// Archive bytes and index entries for `files` stored in archive `number`.
pub fn build_archive(number: u32, files: &[Spec]) -> (Vec<u8>, Vec<FileEntry>) {
    let mut data = Vec::new();
    let mut entries = Vec::with_capacity(files.len());
    for spec in files {
        let (stored, size) = spec.encode();
        entries.push(FileEntry {
            archive: number,
            id: spec.id,
            folder: spec.folder.to_string(),
            file: spec.file.to_string(),
            offset: data.len() as u32,
            stored_size: stored.len() as u32,
            size,
        });
        data.extend_from_slice(&stored);
    }
    (data, entries)
}

/// Write a live installation of `version` with the given archives.
///
/// Replaces whatever the game folder held before.
pub fn write_game(game: &GameDir, version: u32, archives: &[(u32, Vec<Spec>)]) {
    let dir = game.archive_dir();
    if dir.exists() {
        std::fs::remove_dir_all(&dir).unwrap();
    }
    std::fs::create_dir_all(&dir).unwrap();

    let mut builder = IndexBuilder::new(version);
    for (number, files) in archives {
        let (data, entries) = build_archive(*number, files);
        std::fs::write(game.archive_path(*number), data).unwrap();
        builder = builder.archive(*number, number * 100).files(entries);
    }
    std::fs::write(game.index_path(), builder.build(&XorCodec).unwrap()).unwrap();
}

/// Turn the live installation into a fully extracted release below
/// `versions`, as the first release of a history is produced.
pub async fn seed_release(session: &Session, game: &GameDir, versions: &Path, version: u32) -> Release {
    let release = Release::in_versions(versions, version);
    std::fs::create_dir_all(release.root()).unwrap();
    std::fs::copy(game.index_path(), release.index_path()).unwrap();

    let index = session
        .load_index(&game.index_path(), &game.archive_dir())
        .await
        .unwrap();
    bdfs_archive::extract_all(session, &index, &release.files_dir())
        .await
        .unwrap();
    Ledger::build(session, &index)
        .await
        .unwrap()
        .save(session, &release.ledger_path())
        .await
        .unwrap();
    release
}

/// Launcher log describing a patch from `client` to `latest`.
pub fn patch_log(client: u32, latest: u32) -> String {
    let mut log = format!(
        "[INFO\t] launcher start\n[INFO\t] latest version: {latest}\n[INFO\t] client version: C:\\Games\\{client}\n"
    );
    for version in client + 1..=latest {
        log.push_str(&format!("[INFO\t] csvi updated: patch {version}\n"));
    }
    log
}

/// Prepare an empty next release folder holding only its patch log.
pub fn next_release(versions: &Path, previous: u32, version: u32) -> Release {
    let release = Release::in_versions(versions, version);
    std::fs::create_dir_all(release.root()).unwrap();
    std::fs::write(release.patch_log_path(), patch_log(previous, version)).unwrap();
    release
}
