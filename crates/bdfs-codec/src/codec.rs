//! Codec traits and the payload decode routine.

use crate::error::{CodecError, Result};
use crate::header::PayloadHeader;

/// Cipher block size in bytes. Encrypted windows are whole blocks.
pub const BLOCK_SIZE: usize = 8;

/// Block cipher plus decompressor used for archive payloads.
///
/// The native implementation lives outside this workspace. Implementations
/// must be usable from several worker threads at once.
pub trait Codec: Send + Sync {
    /// Decrypt `data` in place. `data.len()` is a multiple of [`BLOCK_SIZE`].
    fn decrypt(&self, data: &mut [u8]) -> Result<()>;

    /// Encrypt `data` in place. `data.len()` is a multiple of [`BLOCK_SIZE`].
    fn encrypt(&self, data: &mut [u8]) -> Result<()>;

    /// Unpack a decrypted block that starts with a [`PayloadHeader`] into
    /// exactly `size` bytes.
    fn unpack(&self, packed: &[u8], size: usize) -> Result<Vec<u8>>;
}

/// Converts string-table bytes from their source encoding to UTF-8.
pub trait TextDecoder: Send + Sync {
    /// Decode one NUL-free string record.
    fn decode(&self, raw: &[u8]) -> String;
}

/// Identity codec.
///
/// Treats every block as already decrypted and refuses to unpack. Useful for
/// fixtures and for dumps that were decrypted by another tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCodec;

impl Codec for PassthroughCodec {
    fn decrypt(&self, data: &mut [u8]) -> Result<()> {
        check_aligned(data)
    }

    fn encrypt(&self, data: &mut [u8]) -> Result<()> {
        check_aligned(data)
    }

    fn unpack(&self, _packed: &[u8], _size: usize) -> Result<Vec<u8>> {
        Err(CodecError::Unsupported("passthrough codec cannot unpack"))
    }
}

/// Lossy UTF-8 text decoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Text;

impl TextDecoder for Utf8Text {
    fn decode(&self, raw: &[u8]) -> String {
        String::from_utf8_lossy(raw).into_owned()
    }
}

/// Reject buffers that are not whole cipher blocks.
pub fn check_aligned(data: &[u8]) -> Result<()> {
    if data.len() % BLOCK_SIZE == 0 {
        Ok(())
    } else {
        Err(CodecError::Misaligned {
            block: BLOCK_SIZE,
            actual: data.len(),
        })
    }
}

/// Decrypt a stored window and unpack it when it carries a matching header.
///
/// Takes ownership of the stored bytes and decrypts them in place. The result
/// is truncated to `size` when longer; callers check for short output.
pub fn decode_payload(codec: &dyn Codec, mut data: Vec<u8>, size: usize) -> Result<Vec<u8>> {
    check_aligned(&data)?;
    codec.decrypt(&mut data)?;

    let mut output = match PayloadHeader::probe(&data) {
        Some(header) if header.describes(size) => codec.unpack(&data, size)?,
        _ => data,
    };
    output.truncate(size);
    Ok(output)
}

/// Decrypt a table blob without any unpacking.
pub fn decrypt_table(codec: &dyn Codec, mut data: Vec<u8>) -> Result<Vec<u8>> {
    check_aligned(&data)?;
    codec.decrypt(&mut data)?;
    Ok(data)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// XOR cipher with an unpacker that repeats the payload body.
    struct XorRepeat;

    impl Codec for XorRepeat {
        fn decrypt(&self, data: &mut [u8]) -> Result<()> {
            check_aligned(data)?;
            data.iter_mut().for_each(|b| *b ^= 0x5A);
            Ok(())
        }

        fn encrypt(&self, data: &mut [u8]) -> Result<()> {
            self.decrypt(data)
        }

        fn unpack(&self, packed: &[u8], size: usize) -> Result<Vec<u8>> {
            let header = PayloadHeader::probe(packed).unwrap();
            let body = &packed[9..9 + header.packed_size as usize];
            Ok(body.iter().copied().cycle().take(size).collect())
        }
    }

    fn packed(size: u32, body: &[u8]) -> Vec<u8> {
        let mut data = vec![0x6F];
        data.extend_from_slice(&(body.len() as u32).to_le_bytes());
        data.extend_from_slice(&size.to_le_bytes());
        data.extend_from_slice(body);
        data.resize(data.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, 0);
        XorRepeat.encrypt(&mut data).unwrap();
        data
    }

    #[test]
    fn test_decode_unpacks_matching_header() {
        let data = packed(20, b"abc");
        let out = decode_payload(&XorRepeat, data, 20).unwrap();
        assert_eq!(out, b"abcabcabcabcabcabcab");
    }

    #[test]
    fn test_decode_mismatched_header_is_plain() {
        let data = packed(20, b"abc");
        let out = decode_payload(&XorRepeat, data, 10).unwrap();
        assert_eq!(out.len(), 10);
        assert_eq!(out[0], 0x6F);
    }

    #[test]
    fn test_decode_short_plain_output_is_returned_short() {
        let mut data = vec![1u8; 8];
        XorRepeat.encrypt(&mut data).unwrap();
        let out = decode_payload(&XorRepeat, data, 100).unwrap();
        assert_eq!(out, vec![1u8; 8]);
    }

    #[test]
    fn test_misaligned_rejected() {
        let err = decode_payload(&PassthroughCodec, vec![0; 7], 7).unwrap_err();
        assert!(matches!(err, CodecError::Misaligned { actual: 7, .. }));
        assert!(decrypt_table(&PassthroughCodec, vec![0; 9]).is_err());
    }

    #[test]
    fn test_passthrough_cannot_unpack() {
        assert!(matches!(
            PassthroughCodec.unpack(&[], 1),
            Err(CodecError::Unsupported(_))
        ));
    }

    #[test]
    fn test_utf8_text_is_lossy() {
        assert_eq!(Utf8Text.decode(b"character/"), "character/");
        assert_eq!(Utf8Text.decode(&[0x61, 0xFF]), "a\u{FFFD}");
    }
}
