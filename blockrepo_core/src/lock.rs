//! Repo-wide exclusivity between garbage collection and mutation traffic.
//!
//! Writers (block puts, pin updates) hold shared access; a gc sweep holds the
//! single exclusive token. A sweep never waits: if anyone else holds the lock
//! it fails with [`Error::LockBusy`].

use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Coarse lock distinguishing "gc in progress" from normal read/write traffic.
///
/// Cloning yields another handle to the same lock.
#[derive(Debug, Clone, Default)]
pub struct RepoLock {
    inner: Arc<RwLock<()>>,
}

/// Exclusive permit held for the duration of one gc sweep.
///
/// Released by [`release`](Self::release) or when dropped.
#[derive(Debug)]
#[must_use = "the repo lock is released as soon as the token is dropped"]
pub struct GcToken {
    _guard: OwnedRwLockWriteGuard<()>,
    acquired_at: Instant,
}

/// Shared permit held by writers while they mutate the store.
#[derive(Debug)]
pub struct WriteAccess {
    _guard: OwnedRwLockReadGuard<()>,
}

impl RepoLock {
    /// Create a new, unheld lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the exclusive gc token without waiting.
    pub fn try_acquire_exclusive(&self) -> Result<GcToken> {
        let guard = Arc::clone(&self.inner)
            .try_write_owned()
            .map_err(|_| Error::LockBusy)?;
        tracing::debug!("acquired exclusive gc token");
        Ok(GcToken {
            _guard: guard,
            acquired_at: Instant::now(),
        })
    }

    /// Wait for shared write access (blocks while a sweep runs).
    pub async fn write_access(&self) -> WriteAccess {
        WriteAccess {
            _guard: Arc::clone(&self.inner).read_owned().await,
        }
    }

    /// Take shared write access if no sweep is running.
    pub fn try_write_access(&self) -> Option<WriteAccess> {
        Arc::clone(&self.inner)
            .try_read_owned()
            .ok()
            .map(|guard| WriteAccess { _guard: guard })
    }

    /// Returns true while a sweep holds the exclusive token.
    pub fn is_gc_running(&self) -> bool {
        // Sweeps never queue, so a refused read means the token is held.
        self.inner.try_read().is_err()
    }
}

impl GcToken {
    /// Release the exclusive token.
    pub fn release(self) {
        tracing::debug!(
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "released exclusive gc token"
        );
    }
}
