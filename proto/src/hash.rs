//! Content hashing and encoding for the dedup engine.
//!
//! A [`Hash`] is the SHA-256 digest of a block's *uncompressed* bytes — the
//! block's content address. Encoders round-trip between the 32-byte value
//! and the two on-wire representations the backends use (hex, base64).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte SHA-256 content address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

#[derive(Debug, thiserror::Error)]
pub enum HashDecodeError {
    #[error("invalid hex hash: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid base64 hash: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("hash must decode to exactly 32 bytes, got {0}")]
    WrongLength(usize),
}

impl Hash {
    /// Compute the SHA-256 hash of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Hash(out)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, HashDecodeError> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }

    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, HashDecodeError> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD.decode(s)?;
        Self::from_slice(&bytes)
    }

    fn from_slice(bytes: &[u8]) -> Result<Self, HashDecodeError> {
        if bytes.len() != 32 {
            return Err(HashDecodeError::WrongLength(bytes.len()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Ok(Hash(out))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Serializes as a lowercase hex string on the wire.
impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Encoding used for hashes on a particular wire (§9: pick one per backend,
/// never mix encodings within a single backend).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashEncoding {
    Hex,
    Base64,
}

impl HashEncoding {
    pub fn encode(&self, hash: &Hash) -> String {
        match self {
            HashEncoding::Hex => hash.to_hex(),
            HashEncoding::Base64 => hash.to_base64(),
        }
    }

    pub fn decode(&self, s: &str) -> Result<Hash, HashDecodeError> {
        match self {
            HashEncoding::Hex => Hash::from_hex(s),
            HashEncoding::Base64 => Hash::from_base64(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_of_known_value() {
        // SHA-256("hello world")
        let h = Hash::of(b"hello world");
        assert_eq!(
            h.to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn hex_round_trip() {
        let h = Hash::of(b"round trip me");
        let hex = h.to_hex();
        let back = Hash::from_hex(&hex).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn base64_round_trip() {
        let h = Hash::of(b"another payload");
        let b64 = h.to_base64();
        let back = Hash::from_base64(&b64).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Hash::from_hex("abcd").is_err());
        assert!(Hash::from_base64("////").is_err());
    }

    #[test]
    fn encoding_round_trips_consistently() {
        let h = Hash::of(b"pick one encoding per backend");
        for enc in [HashEncoding::Hex, HashEncoding::Base64] {
            let s = enc.encode(&h);
            assert_eq!(enc.decode(&s).unwrap(), h);
        }
    }
}
