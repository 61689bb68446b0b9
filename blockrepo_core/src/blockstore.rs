//! Block store interface and the in-memory implementation.

use crate::error::{Error, Result};
use crate::hash::{Cid, Codec};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::pin::Pin;
use tokio_stream::Stream;

/// Lazy, single-pass enumeration of every key in a store.
pub type KeyStream = Pin<Box<dyn Stream<Item = Result<Cid>> + Send + 'static>>;

/// Content-addressed storage of immutable blocks.
///
/// Implementations provide per-key atomicity for `get`, `put` and `delete`,
/// and nothing across keys.
#[async_trait]
pub trait Blockstore: Send + Sync {
    /// Enumerate every key currently in the store.
    ///
    /// The stream is finite and cannot be restarted; call again for a new pass.
    async fn all_keys(&self) -> Result<KeyStream>;

    /// Read a block's payload.
    ///
    /// # Errors
    /// Returns `BlockNotFound` if the block is absent.
    async fn get(&self, cid: &Cid) -> Result<Vec<u8>>;

    /// Store a payload under `cid` verbatim. The payload is not re-hashed.
    async fn put(&self, cid: &Cid, payload: &[u8]) -> Result<()>;

    /// Delete a block. Deleting an absent block succeeds.
    async fn delete(&self, cid: &Cid) -> Result<()>;

    /// Check whether a block is present.
    async fn has(&self, cid: &Cid) -> Result<bool>;

    /// Stored size of a block in bytes.
    ///
    /// # Errors
    /// Returns `BlockNotFound` if the block is absent.
    async fn size(&self, cid: &Cid) -> Result<u64>;

    /// Hash a payload, store it, and return its cid.
    async fn put_block(&self, codec: Codec, payload: &[u8]) -> Result<Cid> {
        let cid = Cid::compute(codec, payload);
        self.put(&cid, payload).await?;
        Ok(cid)
    }
}

/// In-memory block store.
///
/// Suitable for tests and ephemeral nodes.
#[derive(Debug, Default)]
pub struct MemoryBlockstore {
    blocks: RwLock<HashMap<Cid, Vec<u8>>>,
}

impl MemoryBlockstore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks held.
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// Returns true if the store holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

#[async_trait]
impl Blockstore for MemoryBlockstore {
    async fn all_keys(&self) -> Result<KeyStream> {
        let keys: Vec<Result<Cid>> = self.blocks.read().keys().copied().map(Ok).collect();
        Ok(Box::pin(tokio_stream::iter(keys)))
    }

    async fn get(&self, cid: &Cid) -> Result<Vec<u8>> {
        self.blocks
            .read()
            .get(cid)
            .cloned()
            .ok_or_else(|| Error::block_not_found(*cid))
    }

    async fn put(&self, cid: &Cid, payload: &[u8]) -> Result<()> {
        self.blocks.write().insert(*cid, payload.to_vec());
        Ok(())
    }

    async fn delete(&self, cid: &Cid) -> Result<()> {
        self.blocks.write().remove(cid);
        Ok(())
    }

    async fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(self.blocks.read().contains_key(cid))
    }

    async fn size(&self, cid: &Cid) -> Result<u64> {
        self.blocks
            .read()
            .get(cid)
            .map(|payload| payload.len() as u64)
            .ok_or_else(|| Error::block_not_found(*cid))
    }
}
