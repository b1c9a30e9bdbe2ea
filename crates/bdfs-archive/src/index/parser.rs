//! Binary index parsing.
//!
//! Layout, little-endian throughout:
//!
//! ```text
//! version(4) archive_count(4)
//! archive_count x { number(4) identifier(4) reserved(4) }
//! file_count(4)
//! file_count x { identifier(4) folder_ref(4) file_ref(4) archive(4) offset(4) stored_size(4) size(4) }
//! folder_table_len(4) folder_table
//! file_table_len(4) file_table
//! ```

use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use binrw::{BinRead, BinReaderExt, BinWrite};
use bdfs_codec::{Codec, TextDecoder, decrypt_table};
use tracing::debug;

use super::strings::{FILE_RECORD_PAD, FOLDER_RECORD_PAD, read_pad_strings};
use super::{Archive, FileEntry, FileId, Index};
use crate::{BdfsError, Result};

/// Archive table record (12 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub(super) struct ArchiveRecord {
    pub number: u32,
    pub identifier: u32,
    pub reserved: u32,
}

impl ArchiveRecord {
    pub const SIZE: usize = 12;
}

/// File table record (28 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub(super) struct FileRecord {
    pub identifier: u32,
    pub folder_ref: u32,
    pub file_ref: u32,
    pub archive: u32,
    pub offset: u32,
    pub stored_size: u32,
    pub size: u32,
}

impl FileRecord {
    pub const SIZE: usize = 28;
}

/// Ensure `count` records of `size` bytes fit in what is left of the buffer.
fn ensure_remaining(cursor: &Cursor<&[u8]>, count: usize, size: usize, what: &str) -> Result<()> {
    let remaining = (cursor.get_ref().len() as u64).saturating_sub(cursor.position());
    let needed = (count as u64).saturating_mul(size as u64);
    if needed > remaining {
        return Err(BdfsError::Format(format!(
            "{what} needs {needed} bytes at offset {} but only {remaining} remain",
            cursor.position()
        )));
    }
    Ok(())
}

/// Read a length-prefixed table and advance past it.
fn read_table(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<Vec<u8>> {
    let len: u32 = cursor.read_le()?;
    let len = len as usize;
    ensure_remaining(cursor, len, 1, what)?;

    let start = cursor.position() as usize;
    let table = cursor.get_ref()[start..start + len].to_vec();
    cursor.set_position((start + len) as u64);
    Ok(table)
}

impl Index {
    /// Parse an index buffer.
    ///
    /// Archive container paths are resolved against `archive_dir`. String
    /// tables are decrypted with `codec` and transcoded with `text`.
    pub fn parse(
        data: &[u8],
        archive_dir: &Path,
        codec: &dyn Codec,
        text: &dyn TextDecoder,
    ) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let version: u32 = cursor.read_le()?;
        let archive_count: u32 = cursor.read_le()?;
        ensure_remaining(&cursor, archive_count as usize, ArchiveRecord::SIZE, "archive table")?;

        let mut archives = BTreeMap::new();
        for _ in 0..archive_count {
            let record = ArchiveRecord::read(&mut cursor)?;
            let archive = Archive {
                number: record.number,
                identifier: record.identifier,
                path: archive_dir.join(Archive::file_name(record.number)),
                files: Vec::new(),
            };
            if archives.insert(record.number, archive).is_some() {
                return Err(BdfsError::Format(format!(
                    "archive {} listed twice",
                    record.number
                )));
            }
        }

        let file_count: u32 = cursor.read_le()?;
        ensure_remaining(&cursor, file_count as usize, FileRecord::SIZE, "file table")?;
        let records = (0..file_count)
            .map(|_| FileRecord::read(&mut cursor))
            .collect::<binrw::BinResult<Vec<_>>>()?;

        let folder_table = read_table(&mut cursor, "folder name table")?;
        let file_table = read_table(&mut cursor, "file name table")?;

        let folders = read_pad_strings(
            &decrypt_table(codec, folder_table)?,
            FOLDER_RECORD_PAD,
            text,
        );
        let names = read_pad_strings(&decrypt_table(codec, file_table)?, FILE_RECORD_PAD, text);

        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            let id = FileId::new(record.archive, record.identifier);
            if !seen.insert(id) {
                return Err(BdfsError::Consistency(format!("identity {id} listed twice")));
            }

            let folder = folders.get(record.folder_ref as usize).ok_or_else(|| {
                BdfsError::Format(format!(
                    "file {} references missing folder {}",
                    record.identifier, record.folder_ref
                ))
            })?;
            let name = names.get(record.file_ref as usize).ok_or_else(|| {
                BdfsError::Format(format!(
                    "file {} references missing name {}",
                    record.identifier, record.file_ref
                ))
            })?;
            let archive = archives.get_mut(&record.archive).ok_or_else(|| {
                BdfsError::Format(format!(
                    "file {} references missing archive {}",
                    record.identifier, record.archive
                ))
            })?;

            archive.files.push(Arc::new(FileEntry {
                archive: record.archive,
                id: record.identifier,
                folder: folder.clone(),
                file: name.clone(),
                offset: record.offset,
                stored_size: record.stored_size,
                size: record.size,
            }));
        }

        debug!(
            "Parsed index version {version}: {} archives, {file_count} files, {} folders",
            archives.len(),
            folders.len()
        );

        Ok(Self {
            version,
            declared_files: file_count,
            archives,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::index::IndexBuilder;
    use bdfs_codec::{PassthroughCodec, Utf8Text};
    use pretty_assertions::assert_eq;

    fn entry(archive: u32, id: u32, folder: &str, file: &str, size: u32) -> FileEntry {
        FileEntry {
            archive,
            id,
            folder: folder.to_string(),
            file: file.to_string(),
            offset: 0,
            stored_size: size,
            size,
        }
    }

    fn sample() -> Vec<u8> {
        IndexBuilder::new(7)
            .archive(1, 0xAAAA)
            .archive(2, 0xBBBB)
            .file(entry(1, 10, "ui/", "a.xml", 3))
            .file(entry(1, 11, "ui/", "b.xml", 5))
            .file(entry(2, 12, "character/", "hero.dds", 8))
            .build(&PassthroughCodec)
            .unwrap()
    }

    #[test]
    fn test_parse_built_index() {
        let index = Index::parse(&sample(), Path::new("paz"), &PassthroughCodec, &Utf8Text).unwrap();

        assert_eq!(index.version(), 7);
        assert_eq!(index.archive_count(), 2);
        assert_eq!(index.declared_files(), 3);

        let first = index.archive(1).unwrap();
        assert_eq!(first.identifier, 0xAAAA);
        assert_eq!(first.path, Path::new("paz").join("PAD00001.paz"));
        assert_eq!(first.files.len(), 2);
        assert_eq!(first.files[1].file, "b.xml");
        assert_eq!(first.files[1].folder, "ui/");
        assert_eq!(first.decoded_size(), 8);

        let second = index.archive(2).unwrap();
        assert_eq!(second.files[0].relative_path(), Path::new("character/hero.dds"));
    }

    #[test]
    fn test_file_counts_sum_to_declared() {
        let index = Index::parse(&sample(), Path::new("paz"), &PassthroughCodec, &Utf8Text).unwrap();
        let sum: usize = index.archives().map(|a| a.files.len()).sum();
        assert_eq!(sum, index.declared_files() as usize);
        assert_eq!(index.file_count(), sum);
    }

    #[test]
    fn test_truncated_buffer_rejected() {
        let data = sample();
        for cut in [2, 10, 30, data.len() - 1] {
            let result = Index::parse(&data[..cut], Path::new("paz"), &PassthroughCodec, &Utf8Text);
            assert!(matches!(result, Err(BdfsError::Format(_))), "cut at {cut}");
        }
    }

    #[test]
    fn test_oversized_count_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        let result = Index::parse(&data, Path::new("paz"), &PassthroughCodec, &Utf8Text);
        assert!(matches!(result, Err(BdfsError::Format(_))));
    }

    #[test]
    fn test_missing_archive_rejected() {
        let data = IndexBuilder::new(1)
            .archive(1, 0)
            .file(entry(3, 1, "ui/", "a.xml", 1))
            .build(&PassthroughCodec)
            .unwrap();
        let err = Index::parse(&data, Path::new("paz"), &PassthroughCodec, &Utf8Text).unwrap_err();
        assert!(err.to_string().contains("missing archive 3"));
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let data = IndexBuilder::new(1)
            .archive(1, 0)
            .file(entry(1, 5, "ui/", "a.xml", 1))
            .file(entry(1, 5, "sound/", "b.wav", 2))
            .build(&PassthroughCodec)
            .unwrap();
        let err = Index::parse(&data, Path::new("paz"), &PassthroughCodec, &Utf8Text).unwrap_err();
        assert!(matches!(err, BdfsError::Consistency(_)), "{err}");
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn test_same_identifier_in_other_archive_accepted() {
        let data = IndexBuilder::new(1)
            .archive(1, 0)
            .archive(2, 0)
            .file(entry(1, 5, "ui/", "a.xml", 1))
            .file(entry(2, 5, "sound/", "b.wav", 2))
            .build(&PassthroughCodec)
            .unwrap();
        let index = Index::parse(&data, Path::new("paz"), &PassthroughCodec, &Utf8Text).unwrap();
        assert_eq!(index.identity_map().len(), index.file_count());
    }

    #[test]
    fn test_missing_folder_ref_rejected() {
        let mut data = sample();
        // folder_ref of the first file record
        let offset = 8 + 2 * ArchiveRecord::SIZE + 4 + 4;
        data[offset..offset + 4].copy_from_slice(&99u32.to_le_bytes());
        let err = Index::parse(&data, Path::new("paz"), &PassthroughCodec, &Utf8Text).unwrap_err();
        assert!(err.to_string().contains("missing folder 99"));
    }
}
