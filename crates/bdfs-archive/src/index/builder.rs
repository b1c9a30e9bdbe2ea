//! Index construction.
//!
//! Produces index buffers that [`Index::parse`](super::Index::parse) accepts.
//! Used to author fixture releases and to repackage trimmed releases.

use std::collections::HashMap;
use std::io::Cursor;

use binrw::BinWrite;
use bdfs_codec::{BLOCK_SIZE, Codec};

use super::FileEntry;
use super::parser::{ArchiveRecord, FileRecord};
use super::strings::{FILE_RECORD_PAD, FOLDER_RECORD_PAD, write_pad_strings};
use crate::Result;

/// Interned string table preserving first-seen order.
#[derive(Debug, Default)]
struct StringTable {
    strings: Vec<String>,
    lookup: HashMap<String, u32>,
}

impl StringTable {
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.lookup.get(s) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.lookup.insert(s.to_string(), idx);
        idx
    }

    /// Encode and encrypt the table, padded to whole cipher blocks.
    fn seal(&self, pad: usize, codec: &dyn Codec) -> Result<Vec<u8>> {
        let mut data = write_pad_strings(self.strings.iter().map(String::as_str), pad);
        data.resize(data.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, 0);
        codec.encrypt(&mut data)?;
        Ok(data)
    }
}

/// Builder for binary index buffers
#[derive(Debug, Default)]
pub struct IndexBuilder {
    version: u32,
    archives: Vec<ArchiveRecord>,
    files: Vec<FileEntry>,
}

impl IndexBuilder {
    /// Start an index for a release version
    pub fn new(version: u32) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// Add an archive segment
    #[must_use]
    pub fn archive(mut self, number: u32, identifier: u32) -> Self {
        self.archives.push(ArchiveRecord {
            number,
            identifier,
            reserved: 0,
        });
        self
    }

    /// Add a file entry
    #[must_use]
    pub fn file(mut self, entry: FileEntry) -> Self {
        self.files.push(entry);
        self
    }

    /// Add several file entries
    #[must_use]
    pub fn files(mut self, entries: impl IntoIterator<Item = FileEntry>) -> Self {
        self.files.extend(entries);
        self
    }

    /// Serialize the index, encrypting its string tables with `codec`
    pub fn build(&self, codec: &dyn Codec) -> Result<Vec<u8>> {
        let mut folders = StringTable::default();
        let mut names = StringTable::default();

        let records: Vec<FileRecord> = self
            .files
            .iter()
            .map(|f| FileRecord {
                identifier: f.id,
                folder_ref: folders.intern(&f.folder),
                file_ref: names.intern(&f.file),
                archive: f.archive,
                offset: f.offset,
                stored_size: f.stored_size,
                size: f.size,
            })
            .collect();

        let folder_table = folders.seal(FOLDER_RECORD_PAD, codec)?;
        let file_table = names.seal(FILE_RECORD_PAD, codec)?;

        let mut cursor = Cursor::new(Vec::new());
        self.version.write_le(&mut cursor)?;
        (self.archives.len() as u32).write_le(&mut cursor)?;
        for record in &self.archives {
            record.write(&mut cursor)?;
        }
        (records.len() as u32).write_le(&mut cursor)?;
        for record in &records {
            record.write(&mut cursor)?;
        }
        (folder_table.len() as u32).write_le(&mut cursor)?;
        folder_table.write_le(&mut cursor)?;
        (file_table.len() as u32).write_le(&mut cursor)?;
        file_table.write_le(&mut cursor)?;

        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bdfs_codec::PassthroughCodec;

    #[test]
    fn test_strings_are_interned() {
        let mut table = StringTable::default();
        assert_eq!(table.intern("ui/"), 0);
        assert_eq!(table.intern("char/"), 1);
        assert_eq!(table.intern("ui/"), 0);
        assert_eq!(table.strings.len(), 2);
    }

    #[test]
    fn test_tables_are_block_aligned() {
        let data = IndexBuilder::new(1)
            .archive(1, 0)
            .build(&PassthroughCodec)
            .unwrap();
        // version, archive count, one archive, file count, two empty tables
        assert_eq!(data.len(), 4 + 4 + 12 + 4 + 4 + 4);
    }
}
