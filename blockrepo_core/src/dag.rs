//! Link nodes: blocks whose payload names child blocks.
//!
//! A link node is stored under a [`Codec::Links`] cid. Its payload is a
//! sequence of entries sorted by name:
//!
//! ```text
//! 33 bytes  child cid (codec byte + digest)
//!  1 byte   name_len
//!  N bytes  name (UTF-8, no NUL)
//! ```

use crate::error::{Error, Result};
use crate::hash::{CID_SIZE, Cid, Codec};
use std::io::Read;

/// A named link to a child block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    /// Name of the link (UTF-8, 1..=255 bytes).
    pub name: String,
    /// Cid of the child.
    pub cid: Cid,
}

impl LinkEntry {
    /// Create a new link entry.
    pub fn new(name: impl Into<String>, cid: Cid) -> Result<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(Error::invalid_link_entry("Name cannot be empty"));
        }

        if name.len() > 255 {
            return Err(Error::invalid_link_entry(format!(
                "Name too long: {} bytes (max 255)",
                name.len()
            )));
        }

        if name.contains('\0') {
            return Err(Error::invalid_link_entry("Name cannot contain null bytes"));
        }

        Ok(Self { name, cid })
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.cid.to_bytes());
        buf.push(self.name.len() as u8);
        buf.extend_from_slice(self.name.as_bytes());
    }

    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut cid_buf = [0u8; CID_SIZE];
        reader
            .read_exact(&mut cid_buf)
            .map_err(|_| Error::invalid_link_entry("Truncated cid"))?;
        let cid = Cid::from_bytes(&cid_buf)?;

        let mut name_len_buf = [0u8; 1];
        reader
            .read_exact(&mut name_len_buf)
            .map_err(|_| Error::invalid_link_entry("Truncated name length"))?;
        let name_len = name_len_buf[0] as usize;

        if name_len == 0 {
            return Err(Error::invalid_link_entry("Name length is zero"));
        }

        let mut name_buf = vec![0u8; name_len];
        reader
            .read_exact(&mut name_buf)
            .map_err(|_| Error::invalid_link_entry("Truncated name"))?;
        let name = String::from_utf8(name_buf)
            .map_err(|e| Error::invalid_link_entry(format!("Invalid UTF-8 in name: {}", e)))?;

        Self::new(name, cid)
    }
}

/// Encode link entries into a link node payload (sorted by name bytes).
pub fn encode_links(mut entries: Vec<LinkEntry>) -> Vec<u8> {
    entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

    let mut buf = Vec::new();
    for entry in &entries {
        entry.encode_into(&mut buf);
    }
    buf
}

/// Decode a link node payload.
pub fn decode_links(data: &[u8]) -> Result<Vec<LinkEntry>> {
    let mut reader = std::io::Cursor::new(data);
    let mut entries = Vec::new();

    while reader.position() < data.len() as u64 {
        entries.push(LinkEntry::decode(&mut reader)?);
    }

    Ok(entries)
}

/// Child cids of a block, by codec. Raw blocks have none.
pub fn child_links(cid: &Cid, payload: &[u8]) -> Result<Vec<Cid>> {
    match cid.codec() {
        Codec::Raw => Ok(Vec::new()),
        Codec::Links => Ok(decode_links(payload)?
            .into_iter()
            .map(|entry| entry.cid)
            .collect()),
    }
}
