//! On-disk block file format.
//!
//! Block files are stored with a 16-byte header followed by the payload:
//!
//! ```text
//! 0x00  4   "BLKS" magic
//! 0x04  1   version (u8) = 1
//! 0x05  1   codec: 0x55=raw, 0x70=links
//! 0x06  1   algo: 1=blake3-256
//! 0x07  1   compression: 0=none, 1=zstd
//! 0x08  8   payload_len (u64 LE) - stored (possibly compressed) size
//! 0x10  ... payload
//! ```

use crate::error::{Error, Result};
use crate::hash::{Algorithm, Codec};

/// Magic bytes at the start of every block file.
pub const MAGIC: &[u8; 4] = b"BLKS";

/// Current block file format version.
pub const VERSION: u8 = 1;

/// Size of the block header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Compression threshold: payloads >= 4KB are compressed.
pub const COMPRESSION_THRESHOLD: usize = 4096;

/// Compression types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    /// No compression.
    None = 0,
    /// Zstandard compression.
    Zstd = 1,
}

impl CompressionType {
    /// Convert to byte representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from byte representation.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Zstd),
            _ => Err(Error::invalid_cid(format!(
                "Invalid compression type: {}",
                value
            ))),
        }
    }
}

/// A 16-byte block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block format version.
    pub version: u8,
    /// Codec of the stored cid.
    pub codec: Codec,
    /// Hash algorithm used.
    pub algorithm: Algorithm,
    /// Compression type.
    pub compression: CompressionType,
    /// Length of the stored payload in bytes (compressed size if compressed).
    pub payload_len: u64,
}

impl BlockHeader {
    /// Create a new block header.
    pub fn new(
        codec: Codec,
        algorithm: Algorithm,
        compression: CompressionType,
        payload_len: u64,
    ) -> Self {
        Self {
            version: VERSION,
            codec,
            algorithm,
            compression,
            payload_len,
        }
    }

    /// Encode the header to a 16-byte array.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4] = self.version;
        buf[5] = self.codec.to_u8();
        buf[6] = self.algorithm.id();
        buf[7] = self.compression.to_u8();
        buf[8..16].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    /// Decode a header from the first 16 bytes of `buf`.
    ///
    /// Errors are plain reasons; the caller attaches the file path.
    pub fn decode(buf: &[u8]) -> std::result::Result<Self, String> {
        if buf.len() < HEADER_SIZE {
            return Err(format!(
                "Header too short: {} bytes (expected {})",
                buf.len(),
                HEADER_SIZE
            ));
        }

        if &buf[0..4] != MAGIC {
            return Err(format!(
                "Invalid magic: expected {:?}, got {:?}",
                MAGIC,
                &buf[0..4]
            ));
        }

        let version = buf[4];
        if version != VERSION {
            return Err(format!(
                "Unsupported version: {} (expected {})",
                version, VERSION
            ));
        }

        let codec = Codec::from_u8(buf[5]).map_err(|e| e.to_string())?;
        let algorithm = Algorithm::from_id(buf[6]).map_err(|e| e.to_string())?;
        let compression = CompressionType::from_u8(buf[7]).map_err(|e| e.to_string())?;

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&buf[8..16]);
        let payload_len = u64::from_le_bytes(len_bytes);

        Ok(Self {
            version,
            codec,
            algorithm,
            compression,
            payload_len,
        })
    }
}

/// Compress data using zstd (level 3).
pub(crate) fn compress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    Ok(zstd::encode_all(data, 3)?)
}

/// Decompress zstd data.
pub(crate) fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    Ok(zstd::decode_all(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(version: u8, codec: u8, algo: u8, compression: u8) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4] = version;
        buf[5] = codec;
        buf[6] = algo;
        buf[7] = compression;
        buf
    }

    #[test]
    fn test_header_encode_layout() {
        let header = BlockHeader::new(
            Codec::Links,
            Algorithm::Blake3,
            CompressionType::Zstd,
            0x0102,
        );
        let encoded = header.encode();

        assert_eq!(&encoded[0..4], MAGIC);
        assert_eq!(encoded[4], VERSION);
        assert_eq!(encoded[5], 0x70);
        assert_eq!(encoded[6], 1);
        assert_eq!(encoded[7], 1);
        assert_eq!(&encoded[8..10], &[0x02, 0x01]);
        assert_eq!(BlockHeader::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn test_header_decode_invalid_magic() {
        let mut buf = header_bytes(VERSION, 0x55, 1, 0);
        buf[0..4].copy_from_slice(b"XXXX");
        assert!(BlockHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_header_decode_invalid_version() {
        let buf = header_bytes(99, 0x55, 1, 0);
        assert!(BlockHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_header_decode_invalid_codec() {
        let buf = header_bytes(VERSION, 0x01, 1, 0);
        assert!(BlockHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_header_decode_invalid_compression() {
        let buf = header_bytes(VERSION, 0x55, 1, 99);
        assert!(BlockHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_header_too_short() {
        let buf = [0u8; 10];
        assert!(BlockHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_zstd_restores_input() {
        let data = b"repetitive ".repeat(1000);
        let compressed = compress_zstd(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(decompress_zstd(&compressed).unwrap(), data);
    }

    #[test]
    fn test_decompress_garbage_fails() {
        assert!(decompress_zstd(b"definitely not zstd").is_err());
    }
}
