//! Per-endpoint pipeline — poller, fan-out, cache and collector pool.
//!
//! ```text
//!  poller ──publish──▶ fan-out ──▶ cache listener
//!                              └─▶ collector pool ──▶ metric sink
//! ```
//!
//! Stopping a pipeline fires its shutdown signal. The poller exits and
//! drops the publish sender, and every later stage sees its input close
//! and exits in turn. `shutdown` waits for all four tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument, Span};

use crate::directory::TableDirectory;
use crate::error::ConstructionError;
use crate::metrics::MetricSink;
use crate::pool::{CollectorPool, PoolSettings, PoolStats, PoolStatsSnapshot};
use crate::types::Endpoint;

pub mod cache;
pub mod fanout;
pub mod poller;

use cache::TableCache;
use fanout::HANDOFF_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Time between two table listings.
    pub poll_interval: Duration,
    pub pool: PoolSettings,
}

/// Background tasks of one pipeline, upstream first.
struct PipelineTasks {
    poller: JoinHandle<()>,
    fanout: JoinHandle<()>,
    cache_listener: JoinHandle<()>,
    pool: JoinHandle<()>,
}

/// Summary returned once a pipeline has fully stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub tables: usize,
    pub forwarded: u64,
    pub pool: PoolStatsSnapshot,
}

/// The bundle of tasks and channels monitoring one endpoint.
pub struct Pipeline {
    id: u64,
    cache: Arc<TableCache>,
    pool_stats: Arc<PoolStats>,
    forwarded: Arc<AtomicU64>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Option<PipelineTasks>,
    span: Span,
}

impl Pipeline {
    /// Build and start every stage for `endpoint`.
    ///
    /// `id` distinguishes successive pipelines of the same endpoint.
    /// Must be called from within a tokio runtime.
    pub fn start(
        id: u64,
        endpoint: Endpoint,
        directory: Arc<dyn TableDirectory>,
        sink: Arc<dyn MetricSink>,
        settings: PipelineSettings,
    ) -> Result<Self, ConstructionError> {
        directory
            .prepare(&endpoint)
            .map_err(|source| ConstructionError::Prepare {
                endpoint: endpoint.clone(),
                source,
            })?;
        let pool = CollectorPool::new(endpoint.clone(), Arc::clone(&directory), sink, settings.pool)?;
        let pool_stats = pool.stats();

        let span = info_span!("pipeline", endpoint = %endpoint, id);
        let cache = Arc::new(TableCache::new());
        let forwarded = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (publish_tx, publish_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (cache_tx, cache_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (pool_tx, pool_rx) = mpsc::channel(HANDOFF_CAPACITY);

        // Consumers first so nothing is published into a stage that is not running.
        let pool_task = tokio::spawn(pool.run(pool_rx).instrument(span.clone()));
        let cache_listener = tokio::spawn(Arc::clone(&cache).listen(cache_rx).instrument(span.clone()));
        let fanout = tokio::spawn(
            fanout::run_fanout(publish_rx, cache_tx, pool_tx, Arc::clone(&forwarded))
                .instrument(span.clone()),
        );
        let poller = tokio::spawn(
            poller::run_table_poller(
                endpoint.clone(),
                directory,
                settings.poll_interval,
                publish_tx,
                shutdown_rx,
            )
            .instrument(span.clone()),
        );

        span.in_scope(|| info!("pipeline started"));

        Ok(Self {
            id,
            cache,
            pool_stats,
            forwarded,
            shutdown_tx,
            tasks: Some(PipelineTasks {
                poller,
                fanout,
                cache_listener,
                pool: pool_task,
            }),
            span,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cache(&self) -> &Arc<TableCache> {
        &self.cache
    }

    pub fn pool_stats(&self) -> PoolStatsSnapshot {
        self.pool_stats.snapshot()
    }

    /// `true` once `shutdown` has completed.
    #[cfg(test)]
    pub fn is_stopped(&self) -> bool {
        self.tasks.is_none()
    }

    /// Stop every stage and wait for all of them, upstream to downstream.
    ///
    /// Calling it again after it completed is a no-op.
    pub async fn shutdown(&mut self) -> PipelineReport {
        if let Some(tasks) = self.tasks.take() {
            let _ = self.shutdown_tx.send(true);

            let stages = [
                ("poller", tasks.poller),
                ("fan-out", tasks.fanout),
                ("cache listener", tasks.cache_listener),
                ("collector pool", tasks.pool),
            ];
            for (stage, handle) in stages {
                if let Err(e) = handle.await {
                    self.span.in_scope(|| error!(stage, error = %e, "pipeline stage ended abnormally"));
                }
            }
        }

        let report = PipelineReport {
            tables: self.cache.tables().len(),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            pool: self.pool_stats.snapshot(),
        };
        self.span.in_scope(|| {
            info!(
                tables = report.tables,
                forwarded = report.forwarded,
                completed = report.pool.completed,
                failed = report.pool.failed,
                "pipeline stopped"
            )
        });
        report
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // A pipeline dropped without `shutdown` still stops its tasks.
        if self.tasks.is_some() {
            let _ = self.shutdown_tx.send(true);
        }
    }
}
