//! Repository statistics.

use crate::blockstore::Blockstore;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use serde::Serialize;
use tokio_stream::StreamExt;

/// Block count and total stored size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RepoStat {
    pub num_blocks: u64,
    /// Sum of the stored block sizes in bytes.
    pub repo_size: u64,
}

/// Count every block in `store` and sum their sizes.
///
/// Blocks deleted while the walk runs are skipped.
///
/// # Errors
/// Returns the first enumeration or size error, or `Cancelled` if `ctx`
/// fires before the walk completes.
pub async fn repo_stat(ctx: &CancelToken, store: &dyn Blockstore) -> Result<RepoStat> {
    let mut keys = store.all_keys().await?;
    let mut stat = RepoStat::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            next = keys.next() => next,
        };
        let Some(cid) = next.transpose()? else {
            break;
        };

        match store.size(&cid).await {
            Ok(size) => {
                stat.num_blocks += 1;
                stat.repo_size += size;
            }
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        }
    }

    tracing::debug!(blocks = stat.num_blocks, bytes = stat.repo_size, "computed repo stat");
    Ok(stat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstore::MemoryBlockstore;
    use crate::hash::Codec;

    #[tokio::test]
    async fn test_stat_counts_blocks_and_bytes() {
        let store = MemoryBlockstore::new();
        store.put_block(Codec::Raw, b"abc").await.unwrap();
        store.put_block(Codec::Raw, b"defgh").await.unwrap();

        let stat = repo_stat(&CancelToken::new(), &store).await.unwrap();
        assert_eq!(
            stat,
            RepoStat {
                num_blocks: 2,
                repo_size: 8
            }
        );
    }

    #[tokio::test]
    async fn test_stat_empty_store() {
        let store = MemoryBlockstore::new();
        let stat = repo_stat(&CancelToken::new(), &store).await.unwrap();
        assert_eq!(stat, RepoStat::default());
    }

    #[tokio::test]
    async fn test_stat_cancelled() {
        let store = MemoryBlockstore::new();
        store.put_block(Codec::Raw, b"abc").await.unwrap();
        let ctx = CancelToken::new();
        ctx.cancel();

        let result = repo_stat(&ctx, &store).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
