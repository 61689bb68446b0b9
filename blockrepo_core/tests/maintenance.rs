//! End-to-end gc and verify runs against the on-disk store.

use async_trait::async_trait;
use blockrepo_core::{
    Algorithm, Blockstore, CancelToken, Cid, Codec, CorruptReason, DagReachability,
    DirectReachability, Error, FsBlockstore, GarbageCollector, GcConfig, GcEvent, GcReport,
    IntegrityVerifier, KeyStream, PinRoots, RepoLock, Result, ResultStream, StreamStatus,
    VerifyEvent, dag,
};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

fn new_store() -> (TempDir, Arc<FsBlockstore>) {
    let temp_dir = TempDir::new().unwrap();
    let store = FsBlockstore::init(temp_dir.path(), Algorithm::Blake3).unwrap();
    (temp_dir, Arc::new(store))
}

async fn drain_gc(mut stream: ResultStream<GcEvent, GcReport>) -> (Vec<GcEvent>, GcReport) {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    (events, stream.finish().await.unwrap())
}

async fn present(store: &dyn Blockstore) -> HashSet<Cid> {
    let mut keys = store.all_keys().await.unwrap();
    let mut found = HashSet::new();
    while let Some(key) = tokio_stream::StreamExt::next(&mut keys).await {
        found.insert(key.unwrap());
    }
    found
}

/// On-disk store that refuses to delete one block.
struct StuckDelete {
    inner: Arc<FsBlockstore>,
    stuck: Cid,
}

#[async_trait]
impl Blockstore for StuckDelete {
    async fn all_keys(&self) -> Result<KeyStream> {
        self.inner.all_keys().await
    }

    async fn get(&self, cid: &Cid) -> Result<Vec<u8>> {
        self.inner.get(cid).await
    }

    async fn put(&self, cid: &Cid, payload: &[u8]) -> Result<()> {
        self.inner.put(cid, payload).await
    }

    async fn delete(&self, cid: &Cid) -> Result<()> {
        if *cid == self.stuck {
            return Err(Error::Io {
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only medium"),
            });
        }
        self.inner.delete(cid).await
    }

    async fn has(&self, cid: &Cid) -> Result<bool> {
        self.inner.has(cid).await
    }

    async fn size(&self, cid: &Cid) -> Result<u64> {
        self.inner.size(cid).await
    }
}

#[tokio::test]
async fn gc_collect_mode_removes_unpinned_blocks() {
    let (_temp_dir, store) = new_store();
    let a = store.put_block(Codec::Raw, b"block A").await.unwrap();
    let b = store.put_block(Codec::Raw, b"block B").await.unwrap();
    let c = store.put_block(Codec::Raw, b"block C").await.unwrap();
    store.pins().add("keep-a", &a).unwrap();

    let roots = store.pins().roots().unwrap();
    let gc = GarbageCollector::new(store.clone(), RepoLock::new());
    let mut removed = HashSet::new();
    let report = gc
        .collect(&CancelToken::new(), &DirectReachability, &roots)
        .await
        .unwrap()
        .collect_removed(|cid| {
            removed.insert(*cid);
        })
        .await
        .unwrap();

    assert_eq!(removed, HashSet::from([b, c]));
    assert_eq!(report.status, StreamStatus::Completed);
    assert_eq!(present(&*store).await, HashSet::from([a]));
    assert!(!store.block_path(&b).exists());
}

#[tokio::test]
async fn gc_failed_deletion_leaves_block_and_marks_errors() {
    let (_temp_dir, fs_store) = new_store();
    let a = fs_store.put_block(Codec::Raw, b"block A").await.unwrap();
    let b = fs_store.put_block(Codec::Raw, b"block B").await.unwrap();
    let c = fs_store.put_block(Codec::Raw, b"block C").await.unwrap();
    let store = Arc::new(StuckDelete {
        inner: fs_store.clone(),
        stuck: c,
    });
    let roots: PinRoots = [a].into_iter().collect();

    let gc = GarbageCollector::new(store, RepoLock::new());
    let (events, report) = drain_gc(
        gc.collect(&CancelToken::new(), &DirectReachability, &roots)
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(events.len(), 2);
    // On-disk size includes the 16-byte block header.
    assert!(events.contains(&GcEvent::Removed { cid: b, size: 23 }));
    assert!(events.iter().any(|event| matches!(
        event,
        GcEvent::Failed { cid, error } if *cid == c && error.contains("read-only medium")
    )));
    assert_eq!(
        report.status,
        StreamStatus::CompletedWithErrors { failures: 1 }
    );
    assert_eq!(report.failed, vec![c]);
    assert_eq!(present(&*fs_store).await, HashSet::from([a, c]));
}

#[tokio::test]
async fn verify_reports_corrupted_block() {
    let (_temp_dir, store) = new_store();
    let x = store.put_block(Codec::Raw, b"block X").await.unwrap();
    let y = store.put_block(Codec::Raw, b"block Y").await.unwrap();
    let z = store.put_block(Codec::Raw, b"block Z").await.unwrap();

    // Rot one byte of Z's payload in place.
    let path = store.block_path(&z);
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] = b'!';
    std::fs::write(&path, bytes).unwrap();

    let mut stream = IntegrityVerifier::new(store.clone())
        .verify(&CancelToken::new())
        .await
        .unwrap();
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    let report = stream.finish().await.unwrap();

    let progress: Vec<u64> = events
        .iter()
        .filter_map(|event| match event {
            VerifyEvent::Progress { count } => Some(*count),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![1, 2, 3]);

    let corrupt: Vec<&VerifyEvent> = events
        .iter()
        .filter(|event| matches!(event, VerifyEvent::Corrupt { .. }))
        .collect();
    assert_eq!(corrupt.len(), 1);
    assert!(matches!(
        corrupt[0],
        VerifyEvent::Corrupt { cid, reason: CorruptReason::Mismatch { .. } } if *cid == z
    ));
    assert_eq!(events.last(), Some(&VerifyEvent::Complete { ok: false }));
    assert_eq!(report.corrupt, vec![z]);
    assert!(!report.corrupt.contains(&x) && !report.corrupt.contains(&y));
}

#[tokio::test]
async fn verify_consistent_store_completes_ok() {
    let (_temp_dir, store) = new_store();
    store.put_block(Codec::Raw, b"block X").await.unwrap();
    // Large enough to be stored compressed.
    store.put_block(Codec::Raw, &vec![7u8; 64 * 1024]).await.unwrap();

    let mut stream = IntegrityVerifier::new(store)
        .verify(&CancelToken::new())
        .await
        .unwrap();
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }

    assert_eq!(
        events,
        vec![
            VerifyEvent::Progress { count: 1 },
            VerifyEvent::Progress { count: 2 },
            VerifyEvent::Complete { ok: true },
        ]
    );
    assert!(stream.finish().await.unwrap().is_ok());
}

#[tokio::test]
async fn gc_while_another_sweep_holds_the_token_is_busy() {
    let (_temp_dir, store) = new_store();
    for i in 0..8u8 {
        store.put_block(Codec::Raw, &[i; 3]).await.unwrap();
    }
    let lock = RepoLock::new();
    let ctx = CancelToken::new();

    // A tiny buffer parks the first sweep on its second send.
    let config = GcConfig {
        event_buffer: 1,
        ..GcConfig::default()
    };
    let first = GarbageCollector::with_config(store.clone(), lock.clone(), config)
        .collect(&ctx, &DirectReachability, &PinRoots::new())
        .await
        .unwrap();

    let second = GarbageCollector::new(store.clone(), lock.clone())
        .collect(&ctx, &DirectReachability, &PinRoots::new())
        .await;
    assert!(matches!(second, Err(Error::LockBusy)));

    let (events, report) = drain_gc(first).await;
    assert_eq!(events.len(), 8);
    assert!(report.is_ok());
    assert!(present(&*store).await.is_empty());
    assert!(lock.try_acquire_exclusive().is_ok());
}

#[tokio::test]
async fn gc_keeps_everything_reachable_through_links() {
    let (_temp_dir, store) = new_store();
    let leaf = store.put_block(Codec::Raw, b"leaf").await.unwrap();
    let orphan = store.put_block(Codec::Raw, b"orphan").await.unwrap();
    let payload = dag::encode_links(vec![dag::LinkEntry::new("leaf", leaf).unwrap()]);
    let root = store.put_block(Codec::Links, &payload).await.unwrap();
    store.pins().add("tree", &root).unwrap();

    let roots = store.pins().roots().unwrap();
    let oracle = DagReachability::new(store.clone());
    let report = GarbageCollector::new(store.clone(), RepoLock::new())
        .collect(&CancelToken::new(), &oracle, &roots)
        .await
        .unwrap()
        .collect_removed(|_| {})
        .await
        .unwrap();

    assert_eq!(report.removed, 1);
    assert_eq!(report.retained, 2);
    assert_eq!(present(&*store).await, HashSet::from([root, leaf]));
    assert!(!store.has(&orphan).await.unwrap());
}

#[tokio::test]
async fn gc_events_serialize_with_type_tag() {
    let cid = Cid::compute(Codec::Raw, b"hello world");
    let json = serde_json::to_value(GcEvent::Removed { cid, size: 11 }).unwrap();
    assert_eq!(json["type"], "removed");
    assert_eq!(json["cid"], cid.to_hex());
    assert_eq!(json["size"], 11);

    let json = serde_json::to_value(StreamStatus::CompletedWithErrors { failures: 2 }).unwrap();
    assert_eq!(json["status"], "completed_with_errors");
    assert_eq!(json["failures"], 2);
}

/// Gc over every pinned graph, the way the CLI runs it.
async fn gc_pinned(store: &Arc<FsBlockstore>) -> Result<GcReport> {
    let roots = store.pins().roots()?;
    let oracle = DagReachability::new(store.clone());
    GarbageCollector::new(store.clone(), RepoLock::new())
        .collect(&CancelToken::new(), &oracle, &roots)
        .await?
        .collect_removed(|_| {})
        .await
}

#[tokio::test]
async fn gc_refuses_to_run_over_a_torn_pin_file() {
    let (temp_dir, store) = new_store();
    let precious = store.put_block(Codec::Raw, b"precious").await.unwrap();
    let orphan = store.put_block(Codec::Raw, b"orphan").await.unwrap();
    std::fs::write(
        temp_dir.path().join("pins").join("keep"),
        format!("{}\n", &precious.to_hex()[..40]),
    )
    .unwrap();

    let result = gc_pinned(&store).await;

    assert!(matches!(result, Err(Error::InvalidPin { .. })));
    assert_eq!(present(&*store).await, HashSet::from([precious, orphan]));
}
