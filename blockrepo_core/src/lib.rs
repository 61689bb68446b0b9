//! # Blockrepo Core
//!
//! Maintenance engines for a content-addressed block store: garbage
//! collection and integrity verification.
//!
//! Blocks are immutable and keyed by a [`Cid`] (codec + BLAKE3 digest). Both
//! engines run as background tasks and report through a [`ResultStream`] that
//! the caller drains at its own pace and can cancel with a [`CancelToken`].
//!
//! ## Features
//!
//! - Mark-and-sweep gc guarded by an exclusive [`RepoLock`] token
//! - Best-effort sweeps: failed deletions are reported, never fatal
//! - Full-store re-hash verification with per-block corruption reports
//! - Pluggable reachability ([`DirectReachability`], [`DagReachability`])
//! - On-disk store ([`FsBlockstore`]) and in-memory store ([`MemoryBlockstore`])
//! - Named pins as gc roots
//!
//! ## Example
//!
//! ```no_run
//! use blockrepo_core::{
//!     Algorithm, Blockstore, CancelToken, Codec, DagReachability, FsBlockstore,
//!     GarbageCollector, IntegrityVerifier, RepoLock,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(FsBlockstore::init("./my-repo", Algorithm::Blake3)?);
//!
//! // Store a block and pin it
//! let cid = store.put_block(Codec::Raw, b"hello").await?;
//! store.pins().add("greeting", &cid)?;
//!
//! // Collect everything the pins do not reach
//! let ctx = CancelToken::new();
//! let roots = store.pins().roots()?;
//! let oracle = DagReachability::new(store.clone());
//! let report = GarbageCollector::new(store.clone(), RepoLock::new())
//!     .collect(&ctx, &oracle, &roots)
//!     .await?
//!     .collect_removed(|cid| println!("removed {}", cid))
//!     .await?;
//! println!("freed {} bytes", report.bytes_freed);
//!
//! // Re-hash every block
//! let report = IntegrityVerifier::new(store).verify(&ctx).await?.finish().await?;
//! assert!(report.corrupt.is_empty());
//! # Ok(())
//! # }
//! ```

mod block;
mod blockstore;
mod cancel;
pub mod dag;
mod error;
mod gc;
mod hash;
mod lock;
mod pin;
mod reachability;
mod stat;
mod store;
mod stream;
mod verify;

pub use block::{BlockHeader, CompressionType};
pub use blockstore::{Blockstore, KeyStream, MemoryBlockstore};
pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use gc::{GarbageCollector, GcConfig, GcEvent, GcReport};
pub use hash::{Algorithm, Cid, Codec};
pub use lock::{GcToken, RepoLock, WriteAccess};
pub use pin::{PinRoots, PinStore};
pub use reachability::{DagReachability, DirectReachability, Reachability};
pub use stat::{RepoStat, repo_stat};
pub use store::{FsBlockstore, REPO_VERSION};
pub use stream::{Interrupted, ResultStream, StreamStatus};
pub use verify::{CorruptReason, IntegrityVerifier, VerifyConfig, VerifyEvent, VerifyReport};
