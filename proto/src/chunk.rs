//! Fixed-size chunking and block compression (spec §4.1, C1).
//!
//! Non-goal: variable-size/content-defined chunking. Blocks are always
//! `block_size` bytes except the last one in a file, which may be shorter.

use crate::hash::Hash;
use serde::{Deserialize, Serialize};
use std::io::{self, Read};

/// Default block size in bytes (spec §6 `monitor.block_size`).
pub const DEFAULT_BLOCK_SIZE: usize = 16 * 1024;

/// Compression applied to a block's on-disk payload. The hash in [`Block`]
/// is always over the *uncompressed* bytes (spec §3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum CompressionKind {
    None = 0,
    Zstd = 1,
}

impl CompressionKind {
    /// Unknown/unsupported kinds degrade to `None` rather than erroring
    /// (spec §7 local-recovery policy).
    pub fn from_wire(value: i32) -> Self {
        match value {
            1 => CompressionKind::Zstd,
            _ => CompressionKind::None,
        }
    }

    pub fn to_wire(self) -> i32 {
        self as i32
    }

    pub fn is_compression_allowed(value: i32) -> bool {
        matches!(value, 0 | 1)
    }
}

/// One unit of the dedup engine: a content-addressed, possibly compressed
/// block with its uncompressed length recorded alongside (spec §3).
#[derive(Debug, Clone)]
pub struct Block {
    pub hash: Hash,
    pub payload: Vec<u8>,
    pub uncompressed_length: u64,
    pub compression_kind: CompressionKind,
}

impl Block {
    /// Build a block from raw (uncompressed) bytes, compressing per `kind`.
    pub fn from_raw(raw: &[u8], kind: CompressionKind) -> io::Result<Self> {
        let hash = Hash::of(raw);
        let payload = compress(raw, kind)?;
        Ok(Block {
            hash,
            payload,
            uncompressed_length: raw.len() as u64,
            compression_kind: kind,
        })
    }

    /// Decompress and verify the block's hash matches its declared content
    /// address. A mismatch is the `Corrupt` condition of spec §7.
    pub fn decode_and_verify(&self) -> io::Result<Vec<u8>> {
        let raw = decompress(&self.payload, self.compression_kind)?;
        if raw.len() as u64 != self.uncompressed_length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "decompressed length does not match recorded uncompressed_length",
            ));
        }
        if Hash::of(&raw) != self.hash {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("block content does not match hash {}", self.hash),
            ));
        }
        Ok(raw)
    }
}

/// Compress `data` per `kind`; `None` is the identity.
pub fn compress(data: &[u8], kind: CompressionKind) -> io::Result<Vec<u8>> {
    match kind {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Zstd => zstd::encode_all(data, 3)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
    }
}

/// Inverse of [`compress`].
pub fn decompress(data: &[u8], kind: CompressionKind) -> io::Result<Vec<u8>> {
    match kind {
        CompressionKind::None => Ok(data.to_vec()),
        CompressionKind::Zstd => zstd::decode_all(data),
    }
}

/// Read `reader` in `block_size`-byte frames, hashing each with SHA-256 and
/// yielding `(hash, bytes)` pairs in file order. Finite, not restartable;
/// only the last yielded pair may be shorter than `block_size`.
pub fn chunk<R: Read>(
    mut reader: R,
    block_size: usize,
) -> impl Iterator<Item = io::Result<(Hash, Vec<u8>)>> {
    assert!(block_size > 0, "block_size must be positive");
    let mut done = false;
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        let mut buf = vec![0u8; block_size];
        match read_full(&mut reader, &mut buf) {
            Ok(0) => {
                done = true;
                None
            }
            Ok(n) => {
                buf.truncate(n);
                if n < block_size {
                    done = true;
                }
                let hash = Hash::of(&buf);
                Some(Ok((hash, buf)))
            }
            Err(e) => {
                done = true;
                Some(Err(e))
            }
        }
    })
}

/// Read up to `buf.len()` bytes, looping on short reads, stopping at EOF.
/// Unlike `Read::read`, a single short read does not imply the buffer is
/// fully filled or that the stream is exhausted.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn compress_decompress_round_trip_all_kinds() {
        let data = b"some data that repeats repeats repeats repeats".repeat(10);
        for kind in [CompressionKind::None, CompressionKind::Zstd] {
            let compressed = compress(&data, kind).unwrap();
            let back = decompress(&compressed, kind).unwrap();
            assert_eq!(back, data, "round trip failed for {kind:?}");
        }
    }

    #[test]
    fn unknown_compression_kind_degrades_to_none() {
        assert_eq!(CompressionKind::from_wire(99), CompressionKind::None);
        assert!(!CompressionKind::is_compression_allowed(99));
    }

    #[test]
    fn chunk_reconstructs_file_e1() {
        // spec §8 E1: 40000-byte file, block_size=16384 -> 3 blocks of
        // 16384, 16384, 7232.
        let data: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let blocks: Vec<(Hash, Vec<u8>)> = chunk(Cursor::new(&data), 16384)
            .collect::<io::Result<_>>()
            .unwrap();

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].1.len(), 16384);
        assert_eq!(blocks[1].1.len(), 16384);
        assert_eq!(blocks[2].1.len(), 7232);

        for (hash, bytes) in &blocks {
            assert_eq!(*hash, Hash::of(bytes));
        }

        let reconstructed: Vec<u8> = blocks.iter().flat_map(|(_, b)| b.clone()).collect();
        assert_eq!(reconstructed, data);
    }

    #[test]
    fn chunk_empty_reader_yields_nothing() {
        let blocks: Vec<_> = chunk(Cursor::new(&[] as &[u8]), 1024).collect();
        assert!(blocks.is_empty());
    }

    #[test]
    fn chunk_exact_multiple_of_block_size() {
        let data = vec![7u8; 32];
        let blocks: Vec<(Hash, Vec<u8>)> = chunk(Cursor::new(&data), 16)
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].1.len(), 16);
        assert_eq!(blocks[1].1.len(), 16);
    }

    #[test]
    fn block_decode_and_verify_detects_corruption() {
        let block = Block::from_raw(b"trustworthy bytes", CompressionKind::None).unwrap();
        let mut corrupted = block.clone();
        corrupted.payload[0] ^= 0xFF;
        assert!(corrupted.decode_and_verify().is_err());
        assert!(block.decode_and_verify().is_ok());
    }
}
