//! Padded string tables.
//!
//! After decryption, a string table is a run of NUL-terminated records. Folder
//! records are each preceded by an 8-byte header; file records have none.

use bdfs_codec::TextDecoder;

/// Header bytes before each folder record.
pub const FOLDER_RECORD_PAD: usize = 8;

/// Header bytes before each file-name record.
pub const FILE_RECORD_PAD: usize = 0;

/// Split a decrypted table into its string records.
///
/// A trailing record without a terminating NUL is ignored.
pub fn read_pad_strings(data: &[u8], pad: usize, text: &dyn TextDecoder) -> Vec<String> {
    let mut strings = Vec::new();
    let mut offset = pad;

    while offset < data.len() {
        let Some(len) = data[offset..].iter().position(|&b| b == 0) else {
            break;
        };
        strings.push(text.decode(&data[offset..offset + len]));
        offset += len + 1 + pad;
    }

    strings
}

/// Encode string records with the given header width.
pub fn write_pad_strings<'a>(strings: impl IntoIterator<Item = &'a str>, pad: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for s in strings {
        out.resize(out.len() + pad, 0);
        out.extend_from_slice(s.as_bytes());
        out.push(0);
    }
    out
}
