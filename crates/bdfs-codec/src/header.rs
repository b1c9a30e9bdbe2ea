//! Compressed payload header detection.
//!
//! A decrypted block may carry a small header telling the unpacker how large
//! the output is. Layout:
//!
//! | Offset | Size   | Field |
//! |--------|--------|-------|
//! | 0x00   | 1      | Flags (0x6E or 0x6F) |
//! | 0x01   | 1 or 4 | Packed size |
//! | 0x02/5 | 1 or 4 | Unpacked size |
//!
//! Bit 1 of the flags selects 4-byte (set) or 1-byte (clear) size fields.
//! Size fields are little-endian.

/// Flag values that mark a compressed payload.
pub const PAYLOAD_MAGIC: [u8; 2] = [0x6E, 0x6F];

/// Bit selecting 4-byte size fields.
const WIDE_SIZES: u8 = 0x02;

/// Parsed compressed payload header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    /// Raw flag byte
    pub flags: u8,
    /// Size of the packed payload as declared by the header
    pub packed_size: u32,
    /// Size of the unpacked output as declared by the header
    pub unpacked_size: u32,
}

impl PayloadHeader {
    /// Probe the start of a decrypted block for a payload header.
    ///
    /// Returns `None` when the block is too short or the flags are not a
    /// payload magic.
    pub fn probe(data: &[u8]) -> Option<Self> {
        let flags = *data.first()?;
        let wide = flags & WIDE_SIZES != 0;
        let field = if wide { 4 } else { 1 };

        if data.len() < 1 + field * 2 {
            return None;
        }
        if !PAYLOAD_MAGIC.contains(&flags) {
            return None;
        }

        let read = |at: usize| -> u32 {
            if wide {
                u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
            } else {
                u32::from(data[at])
            }
        };

        Some(Self {
            flags,
            packed_size: read(1),
            unpacked_size: read(1 + field),
        })
    }

    /// Whether this header describes an output of exactly `size` bytes.
    ///
    /// A header whose unpacked size disagrees with the caller's expectation
    /// is treated as coincidental plaintext, not as a compressed payload.
    pub fn describes(&self, size: usize) -> bool {
        self.unpacked_size as usize == size
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_wide_header() {
        let mut data = vec![0x6E];
        data.extend_from_slice(&40u32.to_le_bytes());
        data.extend_from_slice(&100u32.to_le_bytes());

        let header = PayloadHeader::probe(&data).unwrap();
        assert_eq!(header.flags, 0x6E);
        assert_eq!(header.packed_size, 40);
        assert_eq!(header.unpacked_size, 100);
        assert!(header.describes(100));
        assert!(!header.describes(99));
    }

    #[test]
    fn test_probe_rejects_other_flags() {
        let data = [0x6C, 1, 2, 3, 4, 5, 6, 7, 8];
        assert!(PayloadHeader::probe(&data).is_none());
    }

    #[test]
    fn test_probe_short_block() {
        assert!(PayloadHeader::probe(&[]).is_none());
        assert!(PayloadHeader::probe(&[0x6F, 1, 2, 3]).is_none());
    }
}
