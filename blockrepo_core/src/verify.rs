//! Integrity verification: re-hash every block and report mismatches.

use crate::blockstore::{Blockstore, KeyStream};
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::hash::Cid;
use crate::stream::{self, Emitter, ResultStream, StreamStatus};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::StreamExt;

/// Verification settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyConfig {
    /// Events buffered between the scan and a slow consumer.
    pub event_buffer: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self { event_buffer: 64 }
    }
}

/// Why a block failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CorruptReason {
    /// The payload hashes to a different cid.
    Mismatch { actual: Cid },
    /// The block could not be read.
    ReadFailed(String),
}

impl std::fmt::Display for CorruptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorruptReason::Mismatch { actual } => write!(f, "payload hashes to {}", actual),
            CorruptReason::ReadFailed(e) => write!(f, "read failed: {}", e),
        }
    }
}

/// One verification step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VerifyEvent {
    /// Number of blocks examined so far (1-based).
    Progress { count: u64 },
    /// A block does not match its key. Precedes that block's `Progress`.
    Corrupt { cid: Cid, reason: CorruptReason },
    /// The scan reached the end of the store.
    Complete { ok: bool },
}

/// Terminal report of a verification scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub status: StreamStatus,
    /// Blocks examined.
    pub examined: u64,
    /// Blocks that failed verification, in scan order.
    pub corrupt: Vec<Cid>,
    /// Blocks deleted by someone else between enumeration and read.
    pub vanished: u64,
    pub enumeration_errors: usize,
}

impl VerifyReport {
    /// Returns true if the whole store was scanned and every block matched.
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Scans a store and recomputes every block's cid.
///
/// Never mutates the store and takes no lock, so it may overlap a gc sweep.
pub struct IntegrityVerifier {
    store: Arc<dyn Blockstore>,
    config: VerifyConfig,
}

impl IntegrityVerifier {
    pub fn new(store: Arc<dyn Blockstore>) -> Self {
        Self::with_config(store, VerifyConfig::default())
    }

    pub fn with_config(store: Arc<dyn Blockstore>, config: VerifyConfig) -> Self {
        Self { store, config }
    }

    /// Start a scan and return its result stream.
    ///
    /// # Errors
    /// Fails only if the key enumeration cannot be opened. Per-block problems
    /// are reported as [`VerifyEvent::Corrupt`].
    pub async fn verify(&self, ctx: &CancelToken) -> Result<ResultStream<VerifyEvent, VerifyReport>> {
        let keys = self.store.all_keys().await?;
        let (emitter, stream) = stream::channel(ctx.clone(), self.config.event_buffer);

        tracing::info!("starting integrity verification");
        tokio::spawn(scan(Arc::clone(&self.store), keys, emitter));
        Ok(stream)
    }
}

enum Check {
    Ok,
    Vanished,
    Corrupt(CorruptReason),
}

async fn check_block(store: &dyn Blockstore, cid: &Cid) -> Check {
    match store.get(cid).await {
        Ok(payload) => {
            let actual = Cid::compute(cid.codec(), &payload);
            if actual == *cid {
                Check::Ok
            } else {
                Check::Corrupt(CorruptReason::Mismatch { actual })
            }
        }
        Err(e) if e.is_not_found() => Check::Vanished,
        Err(e) => Check::Corrupt(CorruptReason::ReadFailed(e.to_string())),
    }
}

async fn scan(
    store: Arc<dyn Blockstore>,
    mut keys: KeyStream,
    emitter: Emitter<VerifyEvent, VerifyReport>,
) {
    let started = Instant::now();
    let ctx = emitter.ctx().clone();
    let mut report = VerifyReport {
        status: StreamStatus::Completed,
        examined: 0,
        corrupt: Vec::new(),
        vanished: 0,
        enumeration_errors: 0,
    };

    let cancelled = loop {
        if ctx.is_cancelled() {
            break true;
        }

        let next = tokio::select! {
            biased;
            _ = ctx.cancelled() => break true,
            next = keys.next() => next,
        };

        let cid = match next {
            None => break false,
            Some(Ok(cid)) => cid,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "failed to enumerate a key during verify");
                report.enumeration_errors += 1;
                continue;
            }
        };

        report.examined += 1;
        match check_block(store.as_ref(), &cid).await {
            Check::Ok => {}
            Check::Vanished => {
                tracing::debug!(%cid, "block vanished during verify");
                report.vanished += 1;
            }
            Check::Corrupt(reason) => {
                tracing::warn!(%cid, %reason, "corrupt block");
                report.corrupt.push(cid);
                if emitter.emit(VerifyEvent::Corrupt { cid, reason }).await.is_err() {
                    break true;
                }
            }
        }

        let progress = VerifyEvent::Progress {
            count: report.examined,
        };
        if emitter.emit(progress).await.is_err() {
            break true;
        }
    };

    if cancelled {
        report.status = StreamStatus::Cancelled;
    } else {
        let failures = report.corrupt.len() + report.enumeration_errors;
        report.status = StreamStatus::from_failures(failures);
        let _ = emitter
            .emit(VerifyEvent::Complete {
                ok: failures == 0,
            })
            .await;
    }

    tracing::info!(
        status = ?report.status,
        examined = report.examined,
        corrupt = report.corrupt.len(),
        vanished = report.vanished,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "integrity verification finished"
    );
    emitter.close(report);
}
