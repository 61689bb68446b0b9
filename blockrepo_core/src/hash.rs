//! Content identifiers using BLAKE3.

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::fmt;

/// Digest size in bytes (BLAKE3 produces 256-bit hashes).
pub const HASH_SIZE: usize = 32;

/// Encoded cid size in bytes: one codec byte followed by the digest.
pub const CID_SIZE: usize = HASH_SIZE + 1;

/// Supported hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// BLAKE3 with 256-bit output.
    Blake3,
}

impl Algorithm {
    /// Returns the string representation of the algorithm (for config files).
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Blake3 => "blake3-256",
        }
    }

    /// Parse algorithm from string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blake3-256" => Ok(Algorithm::Blake3),
            _ => Err(Error::unsupported_algorithm(s)),
        }
    }

    /// Returns the algorithm ID byte (for block headers).
    pub fn id(&self) -> u8 {
        match self {
            Algorithm::Blake3 => 1,
        }
    }

    /// Parse algorithm from ID byte.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(Algorithm::Blake3),
            _ => Err(Error::unsupported_algorithm(format!("ID {}", id))),
        }
    }
}

/// How a block's payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Codec {
    /// Opaque bytes with no outgoing links.
    Raw = 0x55,
    /// A link node listing child cids (see [`crate::dag`]).
    Links = 0x70,
}

impl Codec {
    /// Convert to byte representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from byte representation.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x55 => Ok(Codec::Raw),
            0x70 => Ok(Codec::Links),
            _ => Err(Error::invalid_cid(format!("Unknown codec: 0x{:02x}", value))),
        }
    }

    /// Get the string name of this codec.
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Raw => "raw",
            Codec::Links => "links",
        }
    }
}

/// A content identifier: a codec tag plus the BLAKE3 digest of the payload.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cid {
    codec: Codec,
    digest: [u8; HASH_SIZE],
}

impl Cid {
    /// Create a Cid from a codec and raw digest bytes.
    pub fn new(codec: Codec, digest: [u8; HASH_SIZE]) -> Self {
        Cid { codec, digest }
    }

    /// Compute the Cid of a payload.
    pub fn compute(codec: Codec, payload: &[u8]) -> Self {
        let hash = blake3::hash(payload);
        Cid::new(codec, *hash.as_bytes())
    }

    /// Create a Cid from its binary encoding (33 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CID_SIZE {
            return Err(Error::invalid_cid(format!(
                "Expected {} bytes, got {}",
                CID_SIZE,
                bytes.len()
            )));
        }
        let codec = Codec::from_u8(bytes[0])?;
        let mut digest = [0u8; HASH_SIZE];
        digest.copy_from_slice(&bytes[1..]);
        Ok(Cid::new(codec, digest))
    }

    /// Binary encoding: codec byte followed by the digest.
    pub fn to_bytes(&self) -> [u8; CID_SIZE] {
        let mut buf = [0u8; CID_SIZE];
        buf[0] = self.codec.to_u8();
        buf[1..].copy_from_slice(&self.digest);
        buf
    }

    /// Create a Cid from a hex string (66 hex characters).
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != CID_SIZE * 2 {
            return Err(Error::invalid_cid(format!(
                "Expected {} hex characters, got {}",
                CID_SIZE * 2,
                hex_str.len()
            )));
        }

        let bytes =
            hex::decode(hex_str).map_err(|e| Error::invalid_cid(format!("Invalid hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Convert to hex string (66 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// First digest byte in hex, used for directory sharding.
    pub fn shard(&self) -> String {
        hex::encode(&self.digest[..1])
    }

    /// The codec tag.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// The raw digest bytes.
    pub fn digest(&self) -> &[u8; HASH_SIZE] {
        &self.digest
    }

    /// Returns true if `payload` hashes to this Cid.
    pub fn matches(&self, payload: &[u8]) -> bool {
        Cid::compute(self.codec, payload) == *self
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self.to_hex())
    }
}

impl std::str::FromStr for Cid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Cid::from_hex(s)
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}
