//! Reachability oracles: expand pin roots into the retain set.

use crate::blockstore::Blockstore;
use crate::dag::child_links;
use crate::error::{Error, Result};
use crate::hash::Cid;
use crate::pin::PinRoots;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Computes every cid that must survive a sweep.
#[async_trait]
pub trait Reachability: Send + Sync {
    /// Expand `roots` into the full retain set.
    ///
    /// # Errors
    /// Any failure here aborts the gc run before anything is deleted.
    async fn reachable(&self, roots: &PinRoots) -> Result<HashSet<Cid>>;
}

/// Retains exactly the pinned cids and nothing they link to.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectReachability;

#[async_trait]
impl Reachability for DirectReachability {
    async fn reachable(&self, roots: &PinRoots) -> Result<HashSet<Cid>> {
        Ok(roots.iter().copied().collect())
    }
}

/// Retains the pinned cids and everything reachable through link nodes.
pub struct DagReachability {
    store: Arc<dyn Blockstore>,
}

impl DagReachability {
    /// Walk links stored in `store`.
    pub fn new(store: Arc<dyn Blockstore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Reachability for DagReachability {
    async fn reachable(&self, roots: &PinRoots) -> Result<HashSet<Cid>> {
        let mut live = HashSet::new();
        let mut queue: VecDeque<Cid> = roots.iter().copied().collect();

        while let Some(cid) = queue.pop_front() {
            if !live.insert(cid) {
                continue;
            }

            let payload = self.store.get(&cid).await.map_err(|e| {
                if e.is_not_found() {
                    Error::reachability(format!("missing block {} in pinned graph", cid))
                } else {
                    Error::reachability(format!("failed to read {}: {}", cid, e))
                }
            })?;

            let children = child_links(&cid, &payload)
                .map_err(|e| Error::reachability(format!("failed to decode {}: {}", cid, e)))?;
            queue.extend(children.into_iter().filter(|child| !live.contains(child)));
        }

        tracing::debug!(roots = roots.len(), live = live.len(), "computed retain set");
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstore::MemoryBlockstore;
    use crate::dag::{LinkEntry, encode_links};
    use crate::hash::Codec;

    async fn link_node(store: &MemoryBlockstore, children: &[(&str, Cid)]) -> Cid {
        let entries = children
            .iter()
            .map(|(name, cid)| LinkEntry::new(*name, *cid).unwrap())
            .collect();
        store
            .put_block(Codec::Links, &encode_links(entries))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_direct_returns_roots_only() {
        let a = Cid::compute(Codec::Raw, b"a");
        let b = Cid::compute(Codec::Links, b"b");
        let roots: PinRoots = [a, b].into_iter().collect();

        let live = DirectReachability.reachable(&roots).await.unwrap();
        assert_eq!(live, HashSet::from([a, b]));
    }

    #[tokio::test]
    async fn test_dag_follows_nested_links() {
        let store = Arc::new(MemoryBlockstore::new());
        let leaf1 = store.put_block(Codec::Raw, b"leaf1").await.unwrap();
        let leaf2 = store.put_block(Codec::Raw, b"leaf2").await.unwrap();
        let orphan = store.put_block(Codec::Raw, b"orphan").await.unwrap();
        let inner = link_node(&store, &[("leaf2", leaf2)]).await;
        let root = link_node(&store, &[("leaf1", leaf1), ("dir", inner)]).await;

        let oracle = DagReachability::new(store.clone());
        let live = oracle
            .reachable(&[root].into_iter().collect())
            .await
            .unwrap();

        assert_eq!(live, HashSet::from([root, inner, leaf1, leaf2]));
        assert!(!live.contains(&orphan));
    }

    #[tokio::test]
    async fn test_dag_shared_children_visited_once() {
        let store = Arc::new(MemoryBlockstore::new());
        let shared = store.put_block(Codec::Raw, b"shared").await.unwrap();
        let left = link_node(&store, &[("s", shared)]).await;
        let right = link_node(&store, &[("s", shared), ("again", shared)]).await;

        let oracle = DagReachability::new(store.clone());
        let live = oracle
            .reachable(&[left, right].into_iter().collect())
            .await
            .unwrap();
        assert_eq!(live.len(), 3);
    }

    #[tokio::test]
    async fn test_dag_missing_child_fails() {
        let store = Arc::new(MemoryBlockstore::new());
        let never_stored = Cid::compute(Codec::Raw, b"missing");
        let root = link_node(&store, &[("gone", never_stored)]).await;

        let oracle = DagReachability::new(store.clone());
        let err = oracle
            .reachable(&[root].into_iter().collect())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Reachability { .. }));
    }

    #[tokio::test]
    async fn test_dag_undecodable_node_fails() {
        let store = Arc::new(MemoryBlockstore::new());
        let bogus = store
            .put_block(Codec::Links, b"not a link node")
            .await
            .unwrap();

        let oracle = DagReachability::new(store.clone());
        let err = oracle
            .reachable(&[bogus].into_iter().collect())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Reachability { .. }));
    }

    #[tokio::test]
    async fn test_dag_empty_roots() {
        let store = Arc::new(MemoryBlockstore::new());
        store.put_block(Codec::Raw, b"unpinned").await.unwrap();
        let live = DagReachability::new(store.clone())
            .reachable(&PinRoots::new())
            .await
            .unwrap();
        assert!(live.is_empty());
    }
}
