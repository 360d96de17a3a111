//! Table size gauges — the sink collection jobs write into.
//!
//! Samples are last-write-wins per (endpoint, table) and are rendered
//! in the Prometheus text exposition format on every scrape.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::types::Endpoint;

/// Metric family name exposed to scrapers.
pub const TABLE_SIZE_METRIC: &str = "pinotexporter_table_size_bytes";

// ── Sink Trait ──────────────────────────────────────────────────────

/// Where collected table sizes are published.
pub trait MetricSink: Send + Sync {
    /// Record the latest size of `table` on `endpoint`. Idempotent.
    fn set_table_size(&self, endpoint: &Endpoint, table: &str, size_bytes: u64);

    /// Forget every sample of `endpoint` (called once its pipeline is gone).
    fn remove_endpoint(&self, endpoint: &Endpoint);
}

// ── Gauge Vector ────────────────────────────────────────────────────

#[derive(Default)]
pub struct TableSizeGauges {
    samples: RwLock<BTreeMap<(Endpoint, String), u64>>,
}

impl TableSizeGauges {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn get(&self, endpoint: &Endpoint, table: &str) -> Option<u64> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        samples.get(&(endpoint.clone(), table.to_string())).copied()
    }

    /// Number of samples reported for `endpoint`.
    #[cfg(test)]
    pub fn endpoint_samples(&self, endpoint: &Endpoint) -> usize {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        samples.keys().filter(|(ep, _)| ep == endpoint).count()
    }

    /// Render all samples in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);

        let mut out = String::new();
        out.push_str(&format!("# HELP {} Table size in bytes.\n", TABLE_SIZE_METRIC));
        out.push_str(&format!("# TYPE {} gauge\n", TABLE_SIZE_METRIC));
        for ((endpoint, table), size) in samples.iter() {
            out.push_str(&format!(
                "{}{{endpoint=\"{}\",table=\"{}\"}} {}\n",
                TABLE_SIZE_METRIC,
                escape_label(endpoint.as_str()),
                escape_label(table),
                size
            ));
        }
        out
    }
}

impl MetricSink for TableSizeGauges {
    fn set_table_size(&self, endpoint: &Endpoint, table: &str, size_bytes: u64) {
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        samples.insert((endpoint.clone(), table.to_string()), size_bytes);
    }

    fn remove_endpoint(&self, endpoint: &Endpoint) {
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        samples.retain(|(ep, _), _| ep != endpoint);
    }
}

/// Escape a label value per the exposition format (`\`, `"` and newline).
fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}
