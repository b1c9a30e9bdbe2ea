//! Per-release changelog artifact.
//!
//! Text layout, kept compatible with changelogs already on disk:
//!
//! ```text
//! previousversion: <n>
//! currentversion: <n>
//! updatedpaz: <n>,<n>,...
//! removed:
//! [
//! {...},
//! ]
//! added:
//! [
//! {...},
//! ]
//! changed:
//! [
//! {...},
//! ]
//! updateNumbers:
//! {"added":<n>,"removed":<n>,"changed":<n>}
//! ```
//!
//! Every record is a JSON object followed by a comma. Digests use the
//! `{"type":"Buffer","data":[...]}` form.

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::index::{FileEntry, relative_path};
use crate::ledger::Digest;
use crate::{BdfsError, Result};

const REMOVED: &str = "\nremoved: \n";
const ADDED: &str = "\nadded: \n";
const CHANGED: &str = "\nchanged: \n";
const NUMBERS: &str = "\nupdateNumbers: \n";

mod buffer_json {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::ledger::Digest;

    #[derive(Serialize, Deserialize)]
    struct Buffer {
        #[serde(rename = "type")]
        kind: String,
        data: Vec<u8>,
    }

    pub fn serialize<S: Serializer>(digest: &Digest, serializer: S) -> Result<S::Ok, S::Error> {
        Buffer {
            kind: "Buffer".to_string(),
            data: digest.to_vec(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Digest, D::Error> {
        let buffer = Buffer::deserialize(deserializer)?;
        if buffer.kind != "Buffer" {
            return Err(D::Error::custom(format!(
                "expected Buffer, found {}",
                buffer.kind
            )));
        }
        let len = buffer.data.len();
        buffer
            .data
            .try_into()
            .map_err(|_| D::Error::invalid_length(len, &"a 20-byte digest"))
    }
}

/// Added or removed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Owning archive number
    pub paz: u32,
    /// Per-file identifier
    pub uuid: u32,
    /// Version the digest belongs to
    pub version: u32,
    /// Folder name
    pub folder: String,
    /// File name
    pub file: String,
    /// Digest of the encoded bytes
    #[serde(with = "buffer_json")]
    pub sha1: Digest,
}

impl FileRecord {
    /// Path of the file relative to a files tree.
    pub fn relative_path(&self) -> PathBuf {
        relative_path(&self.folder, &self.file)
    }

    /// Record for `entry` at `version`.
    pub fn new(entry: &FileEntry, version: u32, sha1: Digest) -> Self {
        Self {
            paz: entry.archive,
            uuid: entry.id,
            version,
            folder: entry.folder.clone(),
            file: entry.file.clone(),
            sha1,
        }
    }
}

/// File whose encoded bytes differ from the previous release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedRecord {
    /// Owning archive number
    pub paz: u32,
    /// Per-file identifier
    pub uuid: u32,
    /// Version that changed the file
    pub version: u32,
    /// Version of the replaced content
    pub previousversion: u32,
    /// Folder name
    pub folder: String,
    /// File name
    pub file: String,
    /// New digest
    #[serde(with = "buffer_json")]
    pub sha1: Digest,
    /// Replaced digest
    #[serde(with = "buffer_json")]
    pub previoussha1: Digest,
}

impl ChangedRecord {
    /// Path of the file relative to a files tree.
    pub fn relative_path(&self) -> PathBuf {
        relative_path(&self.folder, &self.file)
    }
}

/// Record counts trailer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNumbers {
    /// Added files
    pub added: usize,
    /// Removed files
    pub removed: usize,
    /// Changed files
    pub changed: usize,
}

/// Diff between two consecutive releases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changelog {
    /// Version the changelog applies to
    pub previous: u32,
    /// Version the changelog produces
    pub current: u32,
    /// Archives holding removed, added or changed files, in the order they
    /// were first touched
    pub updated_archives: Vec<u32>,
    /// Files gone from the current release
    pub removed: Vec<FileRecord>,
    /// Files new in the current release
    pub added: Vec<FileRecord>,
    /// Files whose content changed
    pub changed: Vec<ChangedRecord>,
}

impl Changelog {
    /// Empty changelog from `previous` to `current`.
    pub fn new(previous: u32, current: u32) -> Self {
        Self {
            previous,
            current,
            ..Self::default()
        }
    }

    fn touch(&mut self, archive: u32) {
        if !self.updated_archives.contains(&archive) {
            self.updated_archives.push(archive);
        }
    }

    /// Record a removed file.
    pub fn push_removed(&mut self, entry: &Arc<FileEntry>, version: u32, sha1: Digest) {
        self.touch(entry.archive);
        self.removed.push(FileRecord::new(entry, version, sha1));
    }

    /// Record an added file.
    pub fn push_added(&mut self, entry: &Arc<FileEntry>, sha1: Digest) {
        self.touch(entry.archive);
        self.added.push(FileRecord::new(entry, self.current, sha1));
    }

    /// Record a changed file.
    pub fn push_changed(
        &mut self,
        entry: &Arc<FileEntry>,
        previous_version: u32,
        sha1: Digest,
        previous_sha1: Digest,
    ) {
        self.touch(entry.archive);
        self.changed.push(ChangedRecord {
            paz: entry.archive,
            uuid: entry.id,
            version: self.current,
            previousversion: previous_version,
            folder: entry.folder.clone(),
            file: entry.file.clone(),
            sha1,
            previoussha1: previous_sha1,
        });
    }

    /// Record counts.
    pub fn numbers(&self) -> UpdateNumbers {
        UpdateNumbers {
            added: self.added.len(),
            removed: self.removed.len(),
            changed: self.changed.len(),
        }
    }

    /// Render the text artifact.
    pub fn render(&self) -> Result<String> {
        let updated = self
            .updated_archives
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");

        Ok(format!(
            "previousversion: {}\ncurrentversion: {}\nupdatedpaz: {updated}{REMOVED}[\n{}]{ADDED}[\n{}]{CHANGED}[\n{}]{NUMBERS}{}",
            self.previous,
            self.current,
            render_records(&self.removed)?,
            render_records(&self.added)?,
            render_records(&self.changed)?,
            to_json(&self.numbers())?,
        ))
    }

    /// Parse the text artifact and check its record counts.
    pub fn parse(text: &str) -> Result<Self> {
        let (head, rest) = split_section(text, REMOVED)?;
        let (removed, rest) = split_section(rest, ADDED)?;
        let (added, rest) = split_section(rest, CHANGED)?;
        let (changed, numbers) = split_section(rest, NUMBERS)?;

        let mut lines = head.lines();
        let previous = header_value(lines.next(), "previousversion: ")?;
        let current = header_value(lines.next(), "currentversion: ")?;
        let updated = lines
            .next()
            .and_then(|line| line.strip_prefix("updatedpaz: "))
            .ok_or_else(|| BdfsError::Format("changelog lacks updatedpaz line".to_string()))?;
        if lines.next().is_some() {
            return Err(BdfsError::Format(
                "unexpected lines in changelog header".to_string(),
            ));
        }
        let mut updated_archives = Vec::new();
        for n in updated.split(',').filter(|n| !n.is_empty()) {
            let number = n
                .trim()
                .parse::<u32>()
                .map_err(|e| BdfsError::Format(format!("bad updatedpaz entry {n:?}: {e}")))?;
            if updated_archives.contains(&number) {
                return Err(BdfsError::Format(format!(
                    "updatedpaz lists archive {number} twice"
                )));
            }
            updated_archives.push(number);
        }

        let changelog = Self {
            previous,
            current,
            updated_archives,
            removed: parse_records(removed, "removed")?,
            added: parse_records(added, "added")?,
            changed: parse_records(changed, "changed")?,
        };

        let declared: UpdateNumbers = from_json(numbers.trim())?;
        if declared != changelog.numbers() {
            return Err(BdfsError::Format(format!(
                "changelog declares {declared:?} but lists {:?}",
                changelog.numbers()
            )));
        }
        Ok(changelog)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| BdfsError::Format(e.to_string()))
}

fn from_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| BdfsError::Format(format!("{e} in {text:?}")))
}

fn render_records<T: Serialize>(records: &[T]) -> Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&to_json(record)?);
        out.push_str(",\n");
    }
    Ok(out)
}

/// Split at the single occurrence of `marker`.
fn split_section<'a>(text: &'a str, marker: &str) -> Result<(&'a str, &'a str)> {
    match text.matches(marker).count() {
        1 => text
            .split_once(marker)
            .ok_or_else(|| BdfsError::Format(format!("missing {:?} section", marker.trim()))),
        0 => Err(BdfsError::Format(format!(
            "missing {:?} section",
            marker.trim()
        ))),
        n => Err(BdfsError::Format(format!(
            "{:?} section appears {n} times",
            marker.trim()
        ))),
    }
}

fn header_value(line: Option<&str>, prefix: &str) -> Result<u32> {
    line.and_then(|line| line.strip_prefix(prefix))
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| BdfsError::Format(format!("changelog lacks a valid {prefix}line")))
}

fn parse_records<T: DeserializeOwned>(section: &str, name: &str) -> Result<Vec<T>> {
    let body = section
        .strip_prefix("[\n")
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| BdfsError::Format(format!("{name} section is not bracketed")))?;

    body.lines()
        .map(|line| {
            let record = line
                .strip_suffix(',')
                .filter(|record| record.starts_with('{'))
                .ok_or_else(|| BdfsError::Format(format!("bad {name} record line {line:?}")))?;
            from_json(record)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(archive: u32, id: u32, file: &str) -> Arc<FileEntry> {
        Arc::new(FileEntry {
            archive,
            id,
            folder: "ui/".to_string(),
            file: file.to_string(),
            offset: 0,
            stored_size: 1,
            size: 1,
        })
    }

    fn sample() -> Changelog {
        let mut log = Changelog::new(1414, 1415);
        log.push_removed(&entry(2, 7, "old.xml"), 1400, [1; 20]);
        log.push_added(&entry(1, 8, "new.xml"), [2; 20]);
        log.push_changed(&entry(1, 9, "mod.xml"), 1410, [3; 20], [4; 20]);
        log
    }

    #[test]
    fn test_render_layout() {
        let mut log = Changelog::new(1, 2);
        log.push_added(&entry(3, 4, "a.xml"), [0; 20]);

        let zeros = vec!["0"; 20].join(",");
        let expected = format!(
            "previousversion: 1\ncurrentversion: 2\nupdatedpaz: 3\nremoved: \n[\n]\nadded: \n[\n\
             {{\"paz\":3,\"uuid\":4,\"version\":2,\"folder\":\"ui/\",\"file\":\"a.xml\",\
             \"sha1\":{{\"type\":\"Buffer\",\"data\":[{zeros}]}}}},\n]\nchanged: \n[\n]\n\
             updateNumbers: \n{{\"added\":1,\"removed\":0,\"changed\":0}}"
        );
        assert_eq!(log.render().unwrap(), expected);
    }

    #[test]
    fn test_parse_rendered() {
        let log = sample();
        let text = log.render().unwrap();
        assert!(text.contains("\nupdatedpaz: 2,1\n"), "{text}");
        let parsed = Changelog::parse(&text).unwrap();
        assert_eq!(parsed, log);
        assert_eq!(
            parsed.numbers(),
            UpdateNumbers {
                added: 1,
                removed: 1,
                changed: 1
            }
        );
        assert_eq!(parsed.updated_archives, vec![2, 1]);
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let text = sample()
            .render()
            .unwrap()
            .replace("\"added\":1", "\"added\":2");
        let err = Changelog::parse(&text).unwrap_err();
        assert!(matches!(err, BdfsError::Format(_)));
    }

    #[test]
    fn test_missing_section_rejected() {
        let text = sample().render().unwrap().replace(CHANGED, "\n");
        assert!(matches!(Changelog::parse(&text), Err(BdfsError::Format(_))));
    }

    #[test]
    fn test_record_without_trailing_comma_rejected() {
        let text = sample().render().unwrap().replacen("]}},\n", "]}}\n", 1);
        assert!(matches!(Changelog::parse(&text), Err(BdfsError::Format(_))));
    }

    #[test]
    fn test_short_digest_rejected() {
        let text = sample()
            .render()
            .unwrap()
            .replacen("\"data\":[1,", "\"data\":[", 1);
        assert!(matches!(Changelog::parse(&text), Err(BdfsError::Format(_))));
    }
}
