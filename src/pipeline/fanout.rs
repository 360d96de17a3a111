//! Fan-out — splits one endpoint's publication stream into two feeds.
//!
//! Backpressure policy: each downstream feed is a hand-off buffer of
//! capacity one, and a publication is offered to both feeds at the same
//! time. A slow consumer can delay the next publication but never the
//! delivery of the current one to its sibling, and nothing is dropped.
//! Both consumers (cache listener, pool intake) only touch in-memory
//! state, so the buffers drain promptly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::Publication;

/// Capacity of every channel between pipeline stages.
pub const HANDOFF_CAPACITY: usize = 1;

/// Forward every publication from `upstream` to both feeds.
///
/// Returns when `upstream` is closed (or both consumers are gone); the
/// feed senders are dropped on return, which stops both consumers.
pub async fn run_fanout(
    mut upstream: mpsc::Receiver<Publication>,
    to_cache: mpsc::Sender<Publication>,
    to_pool: mpsc::Sender<Publication>,
    forwarded: Arc<AtomicU64>,
) {
    while let Some(list) = upstream.recv().await {
        debug!(seq = list.seq, tables = list.len(), "fan-out forwarding table list");

        let (cache_res, pool_res) = tokio::join!(
            to_cache.send(Arc::clone(&list)),
            to_pool.send(list),
        );

        if cache_res.is_err() {
            warn!("table cache listener is gone");
        }
        if pool_res.is_err() {
            warn!("collector pool intake is gone");
        }
        if cache_res.is_err() && pool_res.is_err() {
            break;
        }
        forwarded.fetch_add(1, Ordering::Relaxed);
    }

    debug!("fan-out stopped, releasing downstream feeds");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TableList;
    use std::time::Duration;

    fn publication(seq: u64, tables: &[&str]) -> Publication {
        Arc::new(TableList::new(seq, tables.iter().map(|t| t.to_string()).collect()))
    }

    #[tokio::test]
    async fn test_every_publication_reaches_both_feeds_in_order() {
        let (up_tx, up_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (cache_tx, mut cache_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (pool_tx, mut pool_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let forwarded = Arc::new(AtomicU64::new(0));

        let fanout = tokio::spawn(run_fanout(up_rx, cache_tx, pool_tx, Arc::clone(&forwarded)));

        let cache_reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(list) = cache_rx.recv().await {
                seen.push(list.seq);
            }
            seen
        });
        let pool_reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(list) = pool_rx.recv().await {
                seen.push(list.seq);
            }
            seen
        });

        for seq in 1..=10 {
            up_tx.send(publication(seq, &["orders"])).await.unwrap();
        }
        drop(up_tx);

        fanout.await.unwrap();
        let expected: Vec<u64> = (1..=10).collect();
        assert_eq!(cache_reader.await.unwrap(), expected);
        assert_eq!(pool_reader.await.unwrap(), expected);
        assert_eq!(forwarded.load(Ordering::Relaxed), 10);
    }

    #[tokio::test]
    async fn test_slow_feed_does_not_block_sibling_delivery() {
        let (up_tx, up_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (cache_tx, mut cache_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (pool_tx, mut pool_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let forwarded = Arc::new(AtomicU64::new(0));

        let fanout = tokio::spawn(run_fanout(up_rx, cache_tx, pool_tx, Arc::clone(&forwarded)));

        // Fill the pool feed so the next send to it has to wait.
        up_tx.send(publication(1, &["a"])).await.unwrap();
        let first = cache_rx.recv().await.unwrap();
        assert_eq!(first.seq, 1);

        up_tx.send(publication(2, &["b"])).await.unwrap();

        // The cache still gets #2 while the pool has not drained #1.
        let second = tokio::time::timeout(Duration::from_secs(1), cache_rx.recv())
            .await
            .expect("cache feed blocked by pool backpressure")
            .unwrap();
        assert_eq!(second.seq, 2);

        // Nothing was lost on the pool side either.
        assert_eq!(pool_rx.recv().await.unwrap().seq, 1);
        assert_eq!(pool_rx.recv().await.unwrap().seq, 2);

        drop(up_tx);
        fanout.await.unwrap();
        assert!(cache_rx.recv().await.is_none());
        assert!(pool_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_feed_does_not_stop_the_other() {
        let (up_tx, up_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (cache_tx, cache_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (pool_tx, mut pool_rx) = mpsc::channel(HANDOFF_CAPACITY);
        drop(cache_rx);

        let fanout = tokio::spawn(run_fanout(up_rx, cache_tx, pool_tx, Arc::new(AtomicU64::new(0))));

        up_tx.send(publication(1, &["a"])).await.unwrap();
        assert_eq!(pool_rx.recv().await.unwrap().seq, 1);

        drop(up_tx);
        fanout.await.unwrap();
    }
}
