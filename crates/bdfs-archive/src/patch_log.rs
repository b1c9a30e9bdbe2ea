//! External patch log validation.
//!
//! The game launcher writes a log of every patch it applied. Before diffing
//! two releases the update engine checks that the log covers exactly the
//! step being diffed.

use std::collections::BTreeSet;

use tracing::info;

use crate::{BdfsError, Result};

const LATEST_TAG: &str = "[INFO\t] latest version: ";
const CLIENT_TAG: &str = "[INFO\t] client version: ";
const APPLIED_TAG: &str = "[INFO\t] csvi updated: ";

/// Versions declared by a launcher patch log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchLog {
    /// Version the launcher patched to
    pub latest: u32,
    /// Version the client had before patching
    pub client: u32,
    /// Every patch version applied
    pub applied: BTreeSet<u32>,
}

/// Leading decimal digits of `s`.
fn leading_number(s: &str) -> Option<u32> {
    let s = s.trim_start();
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse().ok()
}

/// Number named by the last path component of `value`.
fn path_number(value: &str) -> Option<u32> {
    let value = value.trim().trim_end_matches(['/', '\\']);
    let last = value.rsplit(['/', '\\']).next().unwrap_or(value);
    leading_number(last)
}

fn tagged_version(lines: &[&str], tag: &str) -> Result<u32> {
    let line = lines
        .iter()
        .find(|line| line.contains(tag))
        .ok_or_else(|| BdfsError::Format(format!("patch log lacks {:?}", tag.trim())))?;
    line.rsplit(tag)
        .next()
        .and_then(path_number)
        .ok_or_else(|| BdfsError::Format(format!("patch log line {line:?} has no version")))
}

impl PatchLog {
    /// Parse launcher log text.
    pub fn parse(text: &str) -> Result<Self> {
        let lines: Vec<&str> = text.split(['\r', '\n']).collect();
        let latest = tagged_version(&lines, LATEST_TAG)?;
        let client = tagged_version(&lines, CLIENT_TAG)?;
        let applied = lines
            .iter()
            .filter(|line| line.contains(APPLIED_TAG))
            .filter_map(|line| line.split(' ').next_back().and_then(leading_number))
            .collect();

        Ok(Self {
            latest,
            client,
            applied,
        })
    }

    /// Check the log describes patching `previous` to `current` with every
    /// intermediate version applied.
    pub fn validate(&self, previous: u32, current: u32) -> Result<()> {
        if self.latest != current {
            return Err(BdfsError::Consistency(format!(
                "patch log latest version {} does not match current version {current}",
                self.latest
            )));
        }
        if self.client != previous {
            return Err(BdfsError::Consistency(format!(
                "patch log client version {} does not match previous version {previous}",
                self.client
            )));
        }
        let mut expected = previous.saturating_add(1)..=current;
        if let Some(missing) = expected.find(|v| !self.applied.contains(v)) {
            return Err(BdfsError::Consistency(format!(
                "patch log does not include version {missing}"
            )));
        }

        info!("Patch versions to process: {:?}", self.applied);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const LOG: &str = "[INFO\t] launcher start\r\n\
        [INFO\t] latest version: 1416\r\n\
        [INFO\t] client version: C:\\Games\\BDO\\1414\r\n\
        [INFO\t] csvi updated: patch 1415\r\n\
        [INFO\t] csvi updated: patch 1416\r\n";

    #[test]
    fn test_parse() {
        let log = PatchLog::parse(LOG).unwrap();
        assert_eq!(log.latest, 1416);
        assert_eq!(log.client, 1414);
        assert_eq!(log.applied, BTreeSet::from([1415, 1416]));
    }

    #[test]
    fn test_validate_accepts_full_range() {
        PatchLog::parse(LOG).unwrap().validate(1414, 1416).unwrap();
    }

    #[test]
    fn test_validate_rejects_gap_and_mismatch() {
        let log = PatchLog::parse(&LOG.replace("patch 1415", "patch 1400")).unwrap();
        let err = log.validate(1414, 1416).unwrap_err();
        assert!(err.to_string().contains("1415"));

        let log = PatchLog::parse(LOG).unwrap();
        assert!(matches!(log.validate(1413, 1416), Err(BdfsError::Consistency(_))));
        assert!(matches!(log.validate(1414, 1417), Err(BdfsError::Consistency(_))));
    }

    #[test]
    fn test_missing_tag_is_format_error() {
        let err = PatchLog::parse("[INFO\t] latest version: 3\n").unwrap_err();
        assert!(matches!(err, BdfsError::Format(_)));
    }
}
