//! End-to-end decode through the worker pool with a cipher and unpacker

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use bdfs_codec::{
    BLOCK_SIZE, Codec, CodecError, CodecPool, PayloadHeader, Result, check_aligned,
};
use pretty_assertions::assert_eq;

const KEY: u8 = 0xA7;

/// XOR cipher whose unpacker repeats the packed body up to the output size.
struct XorExpand;

impl Codec for XorExpand {
    fn decrypt(&self, data: &mut [u8]) -> Result<()> {
        check_aligned(data)?;
        data.iter_mut().for_each(|b| *b ^= KEY);
        Ok(())
    }

    fn encrypt(&self, data: &mut [u8]) -> Result<()> {
        self.decrypt(data)
    }

    fn unpack(&self, packed: &[u8], size: usize) -> Result<Vec<u8>> {
        let header = PayloadHeader::probe(packed)
            .ok_or_else(|| CodecError::Unpack("missing header".to_string()))?;
        let body = packed
            .get(9..9 + header.packed_size as usize)
            .ok_or_else(|| CodecError::Unpack("truncated body".to_string()))?;
        Ok(body.iter().copied().cycle().take(size).collect())
    }
}

fn seal(mut data: Vec<u8>) -> Vec<u8> {
    data.resize(data.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, 0);
    XorExpand.encrypt(&mut data).unwrap();
    data
}

fn packed(size: u32, body: &[u8]) -> Vec<u8> {
    let mut data = vec![0x6F];
    data.extend_from_slice(&(body.len() as u32).to_le_bytes());
    data.extend_from_slice(&size.to_le_bytes());
    data.extend_from_slice(body);
    seal(data)
}

#[tokio::test]
async fn test_pool_decrypts_plain_payload() {
    let pool = CodecPool::new(Arc::new(XorExpand), 3).unwrap();
    let stored = seal(b"<ui>hello</ui>".to_vec());
    let out = pool.decode(1, stored, 14).await.unwrap();
    assert_eq!(out, b"<ui>hello</ui>");
}

#[tokio::test]
async fn test_pool_unpacks_compressed_payload() {
    let pool = CodecPool::new(Arc::new(XorExpand), 3).unwrap();
    let out = pool.decode(2, packed(40, b"xyz"), 40).await.unwrap();
    assert_eq!(out.len(), 40);
    assert!(out.chunks(3).all(|chunk| b"xyz".starts_with(chunk)));
}

#[tokio::test]
async fn test_pool_mixed_jobs_resolve_to_their_own_waiters() {
    let pool = Arc::new(CodecPool::new(Arc::new(XorExpand), 4).unwrap());
    let handles: Vec<_> = (0..32u64)
        .map(|key| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let body = [key as u8; 5];
                let out = if key % 2 == 0 {
                    pool.decode(key, packed(50, &body), 50).await
                } else {
                    pool.decode(key, seal(body.to_vec()), 5).await
                };
                (key, out.unwrap())
            })
        })
        .collect();

    for handle in handles {
        let (key, out) = handle.await.unwrap();
        let expected = if key % 2 == 0 { 50 } else { 5 };
        assert_eq!(out, vec![key as u8; expected]);
    }
    assert_eq!(pool.pending(), 0);
}

#[tokio::test]
async fn test_pool_reports_misaligned_input() {
    let pool = CodecPool::new(Arc::new(XorExpand), 1).unwrap();
    let err = pool.decode(9, vec![0; 12], 12).await.unwrap_err();
    assert!(matches!(err, CodecError::Misaligned { actual: 12, .. }));
}
