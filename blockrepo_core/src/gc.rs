//! Garbage collection.
//!
//! A run takes the exclusive repo token, computes the retain set from the pin
//! roots (mark), then walks every key in the store and deletes whatever is
//! not retained (sweep). The sweep runs in its own task and reports each
//! decision through a [`ResultStream`].
//!
//! Only lock acquisition, the mark phase and opening the key enumeration can
//! fail a run outright, and they fail before any event is produced. A failed
//! deletion is reported as [`GcEvent::Failed`] and the sweep moves on.

use crate::blockstore::{Blockstore, KeyStream};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::hash::Cid;
use crate::lock::{GcToken, RepoLock};
use crate::pin::PinRoots;
use crate::reachability::Reachability;
use crate::stream::{self, Emitter, ResultStream, StreamStatus};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::StreamExt;

/// Garbage collection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcConfig {
    /// Events buffered between the sweep and a slow consumer.
    pub event_buffer: usize,
    /// Report what would be removed without deleting anything.
    pub dry_run: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            event_buffer: 64,
            dry_run: false,
        }
    }
}

/// One sweep decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GcEvent {
    /// The block was deleted (or would be, in a dry run).
    Removed {
        cid: Cid,
        /// Stored size in bytes, 0 if it could not be read.
        size: u64,
    },
    /// Deleting the block failed; it is still in the store.
    Failed { cid: Cid, error: String },
}

/// Terminal report of a gc run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// How the run ended.
    pub status: StreamStatus,
    /// Number of blocks removed.
    pub removed: usize,
    /// Bytes freed by the removals.
    pub bytes_freed: u64,
    /// Number of enumerated blocks kept because they are reachable.
    pub retained: usize,
    /// Blocks whose deletion failed.
    pub failed: Vec<Cid>,
    /// Key enumeration errors seen during the sweep.
    pub enumeration_errors: usize,
    /// True if nothing was actually deleted.
    pub dry_run: bool,
}

impl GcReport {
    fn new(dry_run: bool) -> Self {
        Self {
            status: StreamStatus::Completed,
            removed: 0,
            bytes_freed: 0,
            retained: 0,
            failed: Vec::new(),
            enumeration_errors: 0,
            dry_run,
        }
    }

    /// Returns true for a complete run without failures.
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Drives mark-and-sweep collection over a block store.
pub struct GarbageCollector {
    store: Arc<dyn Blockstore>,
    lock: RepoLock,
    config: GcConfig,
}

impl GarbageCollector {
    /// Create a collector with default settings.
    pub fn new(store: Arc<dyn Blockstore>, lock: RepoLock) -> Self {
        Self::with_config(store, lock, GcConfig::default())
    }

    /// Create a collector with custom settings.
    pub fn with_config(store: Arc<dyn Blockstore>, lock: RepoLock, config: GcConfig) -> Self {
        Self {
            store,
            lock,
            config,
        }
    }

    /// Start a gc run.
    ///
    /// Returns once the retain set is computed; the sweep continues in the
    /// background and reports through the returned stream. The exclusive
    /// token is released before the stream closes, on every exit path.
    ///
    /// # Errors
    /// - `LockBusy` if another run or a writer holds the repo lock.
    /// - `Reachability` if the retain set cannot be computed.
    /// - any error opening the key enumeration.
    ///
    /// None of these delete anything, and all of them release the lock.
    pub async fn collect(
        &self,
        ctx: &CancelToken,
        oracle: &dyn Reachability,
        roots: &PinRoots,
    ) -> Result<ResultStream<GcEvent, GcReport>> {
        let token = self.lock.try_acquire_exclusive()?;

        let retain = match oracle.reachable(roots).await {
            Ok(retain) => retain,
            Err(e) => {
                token.release();
                tracing::warn!(error = %e, "gc mark phase failed, nothing removed");
                return Err(match e {
                    Error::Reachability { .. } => e,
                    other => Error::reachability(other.to_string()),
                });
            }
        };

        let keys = match self.store.all_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                token.release();
                return Err(e);
            }
        };

        tracing::info!(
            roots = roots.len(),
            retained = retain.len(),
            dry_run = self.config.dry_run,
            "starting gc sweep"
        );

        let (emitter, stream) = stream::channel(ctx.clone(), self.config.event_buffer);
        let sweep = Sweep {
            store: Arc::clone(&self.store),
            retain,
            dry_run: self.config.dry_run,
            token,
        };
        tokio::spawn(sweep.run(keys, emitter));

        Ok(stream)
    }
}

/// State owned by one sweep task.
struct Sweep {
    store: Arc<dyn Blockstore>,
    retain: HashSet<Cid>,
    dry_run: bool,
    token: GcToken,
}

enum Step {
    Key(Result<Cid>),
    Exhausted,
    Cancelled,
}

impl Sweep {
    async fn run(self, mut keys: KeyStream, emitter: Emitter<GcEvent, GcReport>) {
        let Sweep {
            store,
            retain,
            dry_run,
            token,
        } = self;
        let started = Instant::now();
        let ctx = emitter.ctx().clone();
        let mut report = GcReport::new(dry_run);
        let mut cancelled = false;

        loop {
            if ctx.is_cancelled() {
                cancelled = true;
                break;
            }

            let step = tokio::select! {
                biased;
                _ = ctx.cancelled() => Step::Cancelled,
                next = keys.next() => match next {
                    Some(key) => Step::Key(key),
                    None => Step::Exhausted,
                },
            };

            let cid = match step {
                Step::Key(Ok(cid)) => cid,
                Step::Key(Err(e)) => {
                    tracing::warn!(error = %e, "failed to enumerate a key during gc");
                    report.enumeration_errors += 1;
                    continue;
                }
                Step::Exhausted => break,
                Step::Cancelled => {
                    cancelled = true;
                    break;
                }
            };

            if retain.contains(&cid) {
                report.retained += 1;
                continue;
            }

            let event = sweep_one(store.as_ref(), cid, dry_run).await;
            match &event {
                GcEvent::Removed { size, .. } => {
                    report.removed += 1;
                    report.bytes_freed += size;
                }
                GcEvent::Failed { cid, .. } => report.failed.push(*cid),
            }

            if emitter.emit(event).await.is_err() {
                cancelled = true;
                break;
            }
        }

        token.release();

        report.status = if cancelled {
            StreamStatus::Cancelled
        } else {
            StreamStatus::from_failures(report.failed.len() + report.enumeration_errors)
        };

        tracing::info!(
            status = ?report.status,
            removed = report.removed,
            failed = report.failed.len(),
            bytes_freed = report.bytes_freed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "gc sweep finished"
        );
        emitter.close(report);
    }
}

/// Delete one unreachable block and describe the outcome.
async fn sweep_one(store: &dyn Blockstore, cid: Cid, dry_run: bool) -> GcEvent {
    let size = store.size(&cid).await.unwrap_or(0);

    if dry_run {
        tracing::debug!(%cid, size, "would remove block");
        return GcEvent::Removed { cid, size };
    }

    match store.delete(&cid).await {
        Ok(()) => {
            tracing::debug!(%cid, size, "removed block");
            GcEvent::Removed { cid, size }
        }
        Err(e) => {
            tracing::warn!(%cid, error = %e, "failed to remove block");
            GcEvent::Failed {
                cid,
                error: e.to_string(),
            }
        }
    }
}

impl ResultStream<GcEvent, GcReport> {
    /// Collect mode: consume the whole run and fold it into one result.
    ///
    /// `on_removed` is called for every removal. The run is always drained to
    /// the end. A cancelled run returns [`Error::GcCancelled`], whatever else
    /// happened. Otherwise, if any deletion failed the first failure is
    /// returned inside [`Error::GcIncomplete`] together with every failed cid,
    /// and enumeration errors alone surface as [`Error::EnumerationFailed`]
    /// inside it.
    pub async fn collect_removed<F>(mut self, mut on_removed: F) -> Result<GcReport>
    where
        F: FnMut(&Cid),
    {
        let mut first_failure = None;

        while let Some(event) = self.next().await {
            match event {
                GcEvent::Removed { cid, .. } => on_removed(&cid),
                GcEvent::Failed { cid, error } => {
                    if first_failure.is_none() {
                        first_failure = Some(Error::deletion_failed(cid, error));
                    }
                }
            }
        }

        let report = self.finish().await?;

        if report.status == StreamStatus::Cancelled {
            return Err(Error::GcCancelled {
                failed: report.failed,
            });
        }

        // Failures dropped by a cancelled send are still listed in the report.
        let first_failure = first_failure
            .or_else(|| {
                report
                    .failed
                    .first()
                    .map(|cid| Error::deletion_failed(*cid, "deletion failed"))
            })
            .or_else(|| {
                (report.enumeration_errors > 0).then_some(Error::EnumerationFailed {
                    count: report.enumeration_errors,
                })
            });

        match first_failure {
            Some(first) => Err(Error::GcIncomplete {
                first: Box::new(first),
                failed: report.failed,
            }),
            None => Ok(report),
        }
    }
}
