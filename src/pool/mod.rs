//! Collector pool — fetches table sizes for one endpoint.
//!
//! Each table list handed to the pool is expanded into one pending job
//! per table. A dispatcher starts jobs while a permit of the pool's
//! semaphore is available, so at most `workers` size calls run at once
//! no matter how many tables the endpoint has. Every job sleeps a random
//! jitter first so one large table list does not turn into a burst of
//! simultaneous requests.
//!
//! Intake is coalescing: a new table list replaces the jobs that are
//! still queued (tables that disappeared are dropped, tables already
//! queued are not queued twice). The queue is therefore bounded by the
//! endpoint's table count and intake never blocks the fan-out.

use rand::Rng;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use crate::directory::TableDirectory;
use crate::error::ConstructionError;
use crate::metrics::MetricSink;
use crate::types::{Endpoint, PendingTableJob, Publication};

/// Default ceiling of the pre-fetch jitter.
pub const DEFAULT_JITTER_MAX: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum concurrent size calls (N).
    pub workers: usize,
    /// Jitter is drawn uniformly from `[0, jitter_max)`.
    pub jitter_max: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: 5,
            jitter_max: DEFAULT_JITTER_MAX,
        }
    }
}

// ── Stats ───────────────────────────────────────────────────────────

/// Live job counters of one pool.
#[derive(Debug, Default)]
pub struct PoolStats {
    completed: AtomicU64,
    failed: AtomicU64,
    coalesced: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatsSnapshot {
    /// Sizes fetched and published.
    pub completed: u64,
    /// Size calls that failed and were dropped.
    pub failed: u64,
    /// Queued jobs superseded or de-duplicated by a newer table list.
    pub coalesced: u64,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }
}

// ── Pending Queue ───────────────────────────────────────────────────

/// FIFO of tables waiting for a permit, without duplicates.
#[derive(Debug, Default)]
struct PendingQueue {
    order: VecDeque<String>,
    queued: HashSet<String>,
}

impl PendingQueue {
    /// Make the queue reflect `tables`; returns how many jobs were coalesced.
    fn replace_with(&mut self, tables: &[String]) -> u64 {
        let wanted: HashSet<&str> = tables.iter().map(String::as_str).collect();

        let before = self.order.len();
        self.order.retain(|t| wanted.contains(t.as_str()));
        self.queued.retain(|t| wanted.contains(t.as_str()));
        let mut coalesced = (before - self.order.len()) as u64;

        for table in tables {
            if self.queued.insert(table.clone()) {
                self.order.push_back(table.clone());
            } else {
                coalesced += 1;
            }
        }
        coalesced
    }

    fn pop(&mut self) -> Option<String> {
        let table = self.order.pop_front()?;
        self.queued.remove(&table);
        Some(table)
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// ── Pool ────────────────────────────────────────────────────────────

/// Everything a running job needs, shared by all jobs of one pool.
struct JobContext {
    directory: Arc<dyn TableDirectory>,
    sink: Arc<dyn MetricSink>,
    stats: Arc<PoolStats>,
    jitter_max: Duration,
}

pub struct CollectorPool {
    endpoint: Endpoint,
    gate: Arc<Semaphore>,
    ctx: Arc<JobContext>,
}

impl CollectorPool {
    pub fn new(
        endpoint: Endpoint,
        directory: Arc<dyn TableDirectory>,
        sink: Arc<dyn MetricSink>,
        settings: PoolSettings,
    ) -> Result<Self, ConstructionError> {
        if settings.workers == 0 {
            return Err(ConstructionError::ZeroWorkers);
        }

        Ok(Self {
            endpoint,
            gate: Arc::new(Semaphore::new(settings.workers)),
            ctx: Arc::new(JobContext {
                directory,
                sink,
                stats: Arc::new(PoolStats::default()),
                jitter_max: settings.jitter_max,
            }),
        })
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.ctx.stats)
    }

    /// Consume table lists from `intake` and collect sizes until the
    /// channel closes. Queued jobs are then discarded and in-flight jobs
    /// are awaited before returning.
    pub async fn run(self, mut intake: mpsc::Receiver<Publication>) {
        let mut pending = PendingQueue::default();
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                Some(res) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = res {
                        error!(error = %e, "collection job panicked");
                    }
                }

                next = intake.recv() => match next {
                    Some(list) => {
                        let coalesced = pending.replace_with(&list.tables);
                        self.ctx.stats.coalesced.fetch_add(coalesced, Ordering::Relaxed);
                        debug!(
                            seq = list.seq,
                            tables = list.len(),
                            queued = pending.len(),
                            coalesced,
                            "pool received table list"
                        );
                    }
                    None => break,
                },

                permit = Arc::clone(&self.gate).acquire_owned(), if !pending.is_empty() => {
                    let Ok(permit) = permit else { break };
                    if let Some(table) = pending.pop() {
                        let job = PendingTableJob { endpoint: self.endpoint.clone(), table };
                        let ctx = Arc::clone(&self.ctx);
                        in_flight.spawn(collect_table(ctx, job, permit).in_current_span());
                    }
                }
            }
        }

        let discarded = pending.len();
        let draining = in_flight.len();
        debug!(discarded, draining, "pool intake closed, draining in-flight jobs");

        while let Some(res) = in_flight.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "collection job panicked");
            }
        }

        let stats = self.ctx.stats.snapshot();
        info!(
            completed = stats.completed,
            failed = stats.failed,
            coalesced = stats.coalesced,
            "collector pool stopped"
        );
    }
}

/// Draw a pre-fetch delay uniformly from `[0, max)`.
fn jitter_delay(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
}

/// One job: jitter, fetch, publish. Failures are logged and dropped.
async fn collect_table(ctx: Arc<JobContext>, job: PendingTableJob, _permit: OwnedSemaphorePermit) {
    tokio::time::sleep(jitter_delay(ctx.jitter_max)).await;

    match ctx.directory.table_size(&job.endpoint, &job.table).await {
        Ok(size) => {
            ctx.sink.set_table_size(&job.endpoint, &job.table, size);
            ctx.stats.completed.fetch_add(1, Ordering::Relaxed);
            debug!(table = %job.table, size_bytes = size, "table size collected");
        }
        Err(e) => {
            ctx.stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(table = %job.table, error = %e, "failed to get table size, dropping job");
        }
    }
}
