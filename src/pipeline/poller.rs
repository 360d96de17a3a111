//! Table poller — lists an endpoint's tables on a fixed interval.
//!
//! Runs on pipeline start and then every `interval` (measured from the
//! end of one poll to the start of the next). A failed listing is
//! logged and retried on the next poll; the poller only stops when the
//! pipeline's shutdown signal fires or nobody consumes its publications.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::directory::TableDirectory;
use crate::types::{Endpoint, Publication, TableList};

/// Resolve once `shutdown` carries `true` or its sender is gone.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Poll `endpoint` until shutdown, publishing each table list.
///
/// Dropping `publish` on return closes the endpoint's publish channel,
/// which lets the downstream stages drain and exit in order.
pub async fn run_table_poller(
    endpoint: Endpoint,
    directory: Arc<dyn TableDirectory>,
    interval: Duration,
    publish: mpsc::Sender<Publication>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs_f64(), "table poller starting");
    let mut seq = 0u64;

    loop {
        let listing = tokio::select! {
            res = directory.list_tables(&endpoint) => res,
            _ = wait_for_shutdown(&mut shutdown) => break,
        };

        match listing {
            Ok(tables) => {
                seq += 1;
                debug!(seq, tables = ?tables, "discovered tables");
                let list = Arc::new(TableList::new(seq, tables));
                let sent = tokio::select! {
                    res = publish.send(list) => res.is_ok(),
                    _ = wait_for_shutdown(&mut shutdown) => break,
                };
                if !sent {
                    warn!("publish channel closed by consumer");
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "listing tables failed, retrying next poll");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }

    info!(publications = seq, "table poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDirectory;
    use std::time::Instant;

    #[tokio::test]
    async fn test_publishes_each_poll_with_increasing_seq() {
        let ep = Endpoint::from("http://a:9000");
        let dir = Arc::new(FakeDirectory::new());
        dir.set_tables(&ep, &["orders", "users"]);

        let (tx, mut rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        let poller = tokio::spawn(run_table_poller(
            ep.clone(),
            dir.clone(),
            Duration::from_millis(20),
            tx,
            stop_rx,
        ));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.tables, vec!["orders", "users"]);
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);

        stop_tx.send(true).unwrap();
        poller.await.unwrap();
        // Publish channel is closed once the poller is gone.
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_listing_failure_is_retried() {
        let ep = Endpoint::from("http://flaky:9000");
        let dir = Arc::new(FakeDirectory::new());
        dir.set_tables(&ep, &["orders"]);
        dir.fail_listings(&ep, 2);

        let (tx, mut rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        let poller = tokio::spawn(run_table_poller(
            ep.clone(),
            dir.clone(),
            Duration::from_millis(10),
            tx,
            stop_rx,
        ));

        let list = rx.recv().await.unwrap();
        assert_eq!(list.tables, vec!["orders"]);
        assert_eq!(list.seq, 1, "failed polls do not consume sequence numbers");
        assert!(dir.list_calls(&ep) >= 3);

        stop_tx.send(true).unwrap();
        poller.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_long_sleep() {
        let ep = Endpoint::from("http://a:9000");
        let dir = Arc::new(FakeDirectory::new());
        dir.set_tables(&ep, &["orders"]);

        let (tx, mut rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        let poller = tokio::spawn(run_table_poller(
            ep,
            dir,
            Duration::from_secs(3600),
            tx,
            stop_rx,
        ));

        rx.recv().await.unwrap();
        let started = Instant::now();
        stop_tx.send(true).unwrap();
        poller.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stops_when_consumer_goes_away() {
        let ep = Endpoint::from("http://a:9000");
        let dir = Arc::new(FakeDirectory::new());
        dir.set_tables(&ep, &["orders"]);

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let (_stop_tx, stop_rx) = watch::channel(false);

        tokio::time::timeout(
            Duration::from_secs(1),
            run_table_poller(ep, dir, Duration::from_millis(10), tx, stop_rx),
        )
        .await
        .expect("poller should stop once its publish channel is closed");
    }
}
