//! Payload codec boundary for BDFS archive tooling.
//!
//! Archive payloads are stored encrypted with an 8-byte block cipher and
//! optionally compressed with a custom transform. The algorithms themselves are
//! provided by a native module outside this workspace; this crate defines the
//! contract that module fulfils and runs it on a bounded pool of workers.
//!
//! # Components
//!
//! - [`Codec`]: block decrypt/encrypt and unpack, implemented by the native
//!   module
//! - [`PayloadHeader`]: detection of the compressed payload header that
//!   decides whether a decrypted block also needs unpacking
//! - [`decode_payload`]: the per-file decode routine run by workers
//! - [`CodecPool`]: fixed-size worker pool with round-robin dispatch
//! - [`TextDecoder`]: string-table transcoding hook
//!
//! # Example
//!
//! ```
//! use bdfs_codec::{PassthroughCodec, decode_payload};
//!
//! let stored = vec![1u8; 16];
//! let decoded = decode_payload(&PassthroughCodec, stored, 12).unwrap();
//! assert_eq!(decoded.len(), 12);
//! ```

#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod header;
pub mod pool;

pub use codec::{
    BLOCK_SIZE, Codec, PassthroughCodec, TextDecoder, Utf8Text, check_aligned, decode_payload,
    decrypt_table,
};
pub use error::{CodecError, Result};
pub use header::{PAYLOAD_MAGIC, PayloadHeader};
pub use pool::{CodecPool, DEFAULT_WORKERS};
