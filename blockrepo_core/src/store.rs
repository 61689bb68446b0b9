//! On-disk block store.

use crate::block::{
    BlockHeader, COMPRESSION_THRESHOLD, CompressionType, HEADER_SIZE, compress_zstd,
    decompress_zstd,
};
use crate::blockstore::{Blockstore, KeyStream};
use crate::error::{Error, Result};
use crate::hash::{Algorithm, Cid};
use crate::pin::PinStore;
use async_trait::async_trait;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Config file format version.
pub const REPO_VERSION: u32 = 1;

/// Buffered keys between the directory walker and its consumer.
const KEY_BUFFER: usize = 256;

/// A content-addressed block store on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsBlockstore {
    root: PathBuf,
    algorithm: Algorithm,
}

impl FsBlockstore {
    /// Initialize a new store at the given path.
    ///
    /// Creates the directory structure:
    /// - `blocks/blake3-256/` for block files
    /// - `pins/` for named pins
    /// - `config` file with version and algorithm
    pub fn init<P: AsRef<Path>>(root: P, algorithm: Algorithm) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("blocks").join(algorithm.as_str()))?;
        fs::create_dir_all(root.join("pins"))?;

        let config_content = format!("version={}\nalgo={}\n", REPO_VERSION, algorithm.as_str());
        fs::write(root.join("config"), config_content)?;

        tracing::info!(root = %root.display(), algo = algorithm.as_str(), "initialized block store");
        Ok(Self { root, algorithm })
    }

    /// Open an existing store at the given path.
    ///
    /// Validates the store structure and reads the configuration.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            return Err(Error::invalid_store(&root, "directory does not exist"));
        }

        let config_path = root.join("config");
        if !config_path.exists() {
            return Err(Error::invalid_store(&root, "config file not found"));
        }

        let config_content = fs::read_to_string(&config_path)?;
        let algorithm = Self::parse_config(&root, &config_content)?;

        if !root.join("blocks").join(algorithm.as_str()).exists() {
            return Err(Error::invalid_store(&root, "blocks directory structure missing"));
        }

        if !root.join("pins").exists() {
            return Err(Error::invalid_store(&root, "pins directory missing"));
        }

        Ok(Self { root, algorithm })
    }

    /// Parse the config file to extract the algorithm.
    fn parse_config(root: &Path, content: &str) -> Result<Algorithm> {
        let mut version = None;
        let mut algo = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    "version" => version = Some(value.trim()),
                    "algo" => algo = Some(value.trim()),
                    _ => {}
                }
            }
        }

        if version != Some(REPO_VERSION.to_string().as_str()) {
            return Err(Error::invalid_store(
                root,
                format!("unsupported config version: {:?}", version),
            ));
        }

        let algo_str = algo.ok_or_else(|| Error::invalid_store(root, "missing algo in config"))?;
        Algorithm::parse(algo_str)
    }

    /// Get the root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the algorithm used by this store.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Get the pin registry for this store.
    pub fn pins(&self) -> PinStore<'_> {
        PinStore::new(self)
    }

    /// Directory holding every shard of block files.
    fn blocks_dir(&self) -> PathBuf {
        self.root.join("blocks").join(self.algorithm.as_str())
    }

    /// Get the path to a block file given its cid.
    ///
    /// Returns: `blocks/{algorithm}/{shard}/{cid}`
    pub fn block_path(&self, cid: &Cid) -> PathBuf {
        self.blocks_dir().join(cid.shard()).join(cid.to_hex())
    }

    /// Run blocking filesystem work off the async executor.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(FsBlockstore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| Error::Io {
                source: io::Error::other(e.to_string()),
            })?
    }

    /// Read and decode one block file.
    fn read_block(&self, cid: &Cid) -> Result<Vec<u8>> {
        let path = self.block_path(cid);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::block_not_found(*cid));
            }
            Err(e) => return Err(e.into()),
        };

        let header =
            BlockHeader::decode(&bytes).map_err(|reason| Error::corrupted_block(&path, reason))?;

        if header.codec != cid.codec() {
            return Err(Error::corrupted_block(
                &path,
                format!(
                    "Codec mismatch: expected {}, header says {}",
                    cid.codec().as_str(),
                    header.codec.as_str()
                ),
            ));
        }

        let stored = &bytes[HEADER_SIZE..];
        if stored.len() as u64 != header.payload_len {
            return Err(Error::corrupted_block(
                &path,
                format!(
                    "Payload length mismatch: expected {}, got {}",
                    header.payload_len,
                    stored.len()
                ),
            ));
        }

        match header.compression {
            CompressionType::None => Ok(stored.to_vec()),
            CompressionType::Zstd => decompress_zstd(stored).map_err(|e| {
                Error::corrupted_block(&path, format!("Decompression failed: {}", e))
            }),
        }
    }

    /// Write a block atomically using tempfile.
    fn write_block_atomic(&self, cid: &Cid, payload: &[u8]) -> Result<()> {
        let path = self.block_path(cid);

        // Deduplication: a present key already holds this content.
        if path.exists() {
            return Ok(());
        }

        let (stored, compression) = if payload.len() >= COMPRESSION_THRESHOLD {
            (compress_zstd(payload)?, CompressionType::Zstd)
        } else {
            (payload.to_vec(), CompressionType::None)
        };

        let header = BlockHeader::new(
            cid.codec(),
            self.algorithm,
            compression,
            stored.len() as u64,
        );

        let shard_dir = self.blocks_dir().join(cid.shard());
        fs::create_dir_all(&shard_dir)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(&shard_dir)?;
        temp_file.write_all(&header.encode())?;
        temp_file.write_all(&stored)?;
        temp_file.flush()?;
        temp_file.persist(&path)?;

        Ok(())
    }

    /// Walk every shard directory and feed parsed keys into `tx`.
    ///
    /// Returns early once the receiver is gone.
    fn walk_keys(&self, tx: mpsc::Sender<Result<Cid>>) {
        let blocks_dir = self.blocks_dir();
        let shards = match fs::read_dir(&blocks_dir) {
            Ok(shards) => shards,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                let _ = tx.blocking_send(Err(e.into()));
                return;
            }
        };

        for shard_entry in shards {
            let shard_path = match shard_entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    if tx.blocking_send(Err(e.into())).is_err() {
                        return;
                    }
                    continue;
                }
            };

            if !shard_path.is_dir() {
                continue;
            }

            let shard_name = shard_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_string();

            let entries = match fs::read_dir(&shard_path) {
                Ok(entries) => entries,
                Err(e) => {
                    if tx.blocking_send(Err(e.into())).is_err() {
                        return;
                    }
                    continue;
                }
            };

            for entry in entries {
                let path = match entry {
                    Ok(entry) => entry.path(),
                    Err(e) => {
                        if tx.blocking_send(Err(e.into())).is_err() {
                            return;
                        }
                        continue;
                    }
                };

                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };

                // Leftover temp files and foreign names are not blocks.
                let Ok(cid) = Cid::from_hex(name) else {
                    tracing::debug!(path = %path.display(), "skipping non-block file");
                    continue;
                };

                if cid.shard() != shard_name {
                    tracing::debug!(path = %path.display(), "skipping block in wrong shard");
                    continue;
                }

                if tx.blocking_send(Ok(cid)).is_err() {
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Blockstore for FsBlockstore {
    async fn all_keys(&self) -> Result<KeyStream> {
        let (tx, rx) = mpsc::channel(KEY_BUFFER);
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.walk_keys(tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn get(&self, cid: &Cid) -> Result<Vec<u8>> {
        let cid = *cid;
        self.blocking(move |store| store.read_block(&cid)).await
    }

    async fn put(&self, cid: &Cid, payload: &[u8]) -> Result<()> {
        let cid = *cid;
        let payload = payload.to_vec();
        self.blocking(move |store| store.write_block_atomic(&cid, &payload))
            .await
    }

    async fn delete(&self, cid: &Cid) -> Result<()> {
        let cid = *cid;
        self.blocking(move |store| match fs::remove_file(store.block_path(&cid)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn has(&self, cid: &Cid) -> Result<bool> {
        let cid = *cid;
        self.blocking(move |store| Ok(store.block_path(&cid).exists()))
            .await
    }

    async fn size(&self, cid: &Cid) -> Result<u64> {
        let cid = *cid;
        self.blocking(move |store| match fs::metadata(store.block_path(&cid)) {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::block_not_found(cid)),
            Err(e) => Err(e.into()),
        })
        .await
    }
}
