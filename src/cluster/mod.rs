//! Cluster manager — one pipeline per discovered endpoint.
//!
//! On every refresh the manager diffs the discovered endpoint set
//! against its registry: new endpoints get a fresh pipeline, vanished
//! endpoints have theirs stopped and removed, and everything else is
//! left alone. The registry is only ever touched from the refresh
//! driver, so a refresh never races with another.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::directory::TableDirectory;
use crate::discovery::EndpointDiscovery;
use crate::metrics::MetricSink;
use crate::pipeline::poller::wait_for_shutdown;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::types::Endpoint;

/// What one refresh changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub added: Vec<Endpoint>,
    pub removed: Vec<Endpoint>,
    /// New endpoints whose pipeline could not be built; retried next refresh.
    pub failed: Vec<Endpoint>,
}

impl RefreshSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.failed.is_empty()
    }
}

pub struct ClusterManager {
    directory: Arc<dyn TableDirectory>,
    sink: Arc<dyn MetricSink>,
    settings: PipelineSettings,
    registry: HashMap<Endpoint, Pipeline>,
    next_id: u64,
}

impl ClusterManager {
    pub fn new(
        directory: Arc<dyn TableDirectory>,
        sink: Arc<dyn MetricSink>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            directory,
            sink,
            settings,
            registry: HashMap::new(),
            next_id: 1,
        }
    }

    /// Endpoints with a live pipeline, sorted.
    pub fn monitored(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self.registry.keys().cloned().collect();
        endpoints.sort();
        endpoints
    }

    #[cfg(test)]
    pub fn is_monitored(&self, endpoint: &Endpoint) -> bool {
        self.registry.contains_key(endpoint)
    }

    /// Instance id of the endpoint's pipeline.
    #[cfg(test)]
    pub fn pipeline_id(&self, endpoint: &Endpoint) -> Option<u64> {
        self.registry.get(endpoint).map(Pipeline::id)
    }

    /// Cached table list of a monitored endpoint.
    #[cfg(test)]
    pub fn tables(&self, endpoint: &Endpoint) -> Option<Vec<String>> {
        self.registry.get(endpoint).map(|p| p.cache().tables())
    }

    /// Reconcile the registry with the currently discovered endpoints.
    pub async fn refresh(&mut self, current: &BTreeSet<Endpoint>) -> RefreshSummary {
        let mut summary = RefreshSummary::default();

        for endpoint in current {
            if self.registry.contains_key(endpoint) {
                continue;
            }
            info!(endpoint = %endpoint, "setting up monitoring for newly discovered endpoint");

            let id = self.next_id;
            self.next_id += 1;
            match Pipeline::start(
                id,
                endpoint.clone(),
                Arc::clone(&self.directory),
                Arc::clone(&self.sink),
                self.settings,
            ) {
                Ok(pipeline) => {
                    self.registry.insert(endpoint.clone(), pipeline);
                    summary.added.push(endpoint.clone());
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "unable to start monitoring, will retry next refresh");
                    summary.failed.push(endpoint.clone());
                }
            }
        }

        let gone: Vec<Endpoint> = self
            .registry
            .keys()
            .filter(|ep| !current.contains(*ep))
            .cloned()
            .collect();
        for endpoint in gone {
            self.unmonitor(&endpoint).await;
            summary.removed.push(endpoint);
        }

        summary.removed.sort();
        summary
    }

    /// Stop the endpoint's pipeline, wait for it, then forget the endpoint.
    async fn unmonitor(&mut self, endpoint: &Endpoint) {
        let Some(pipeline) = self.registry.get_mut(endpoint) else {
            return;
        };
        info!(endpoint = %endpoint, "stopping monitoring of removed endpoint");
        pipeline.shutdown().await;

        self.registry.remove(endpoint);
        self.sink.remove_endpoint(endpoint);
    }

    /// Stop every pipeline.
    pub async fn shutdown_all(&mut self) {
        let endpoints = self.monitored();
        for endpoint in &endpoints {
            self.unmonitor(endpoint).await;
        }
        info!(stopped = endpoints.len(), "all pipelines stopped");
    }

    /// Periodic refresh driver.
    ///
    /// Refreshes immediately, then every `interval`, until `shutdown`
    /// fires; all pipelines are stopped before returning. A failed
    /// discovery keeps the last known endpoint set.
    pub async fn run(
        mut self,
        discovery: Arc<dyn EndpointDiscovery>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(refresh_secs = interval.as_secs_f64(), "cluster manager starting");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }

            let discovered = tokio::select! {
                res = discovery.current_endpoints() => res,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            match discovered {
                Ok(endpoints) => {
                    let summary = self.refresh(&endpoints).await;
                    if summary.is_empty() {
                        debug!(monitored = self.registry.len(), "endpoint set unchanged");
                    } else {
                        info!(
                            added = summary.added.len(),
                            removed = summary.removed.len(),
                            failed = summary.failed.len(),
                            monitored = self.registry.len(),
                            "endpoint set refreshed"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        monitored = self.registry.len(),
                        "endpoint discovery failed, keeping last known endpoints"
                    );
                }
            }

            for (endpoint, pipeline) in &self.registry {
                debug!(
                    endpoint = %endpoint,
                    id = pipeline.id(),
                    tables = pipeline.cache().tables().len(),
                    updated_at = ?pipeline.cache().updated_at(),
                    completed = pipeline.pool_stats().completed,
                    failed = pipeline.pool_stats().failed,
                    "pipeline status"
                );
            }
        }

        self.shutdown_all().await;
        info!("cluster manager stopped");
    }
}
