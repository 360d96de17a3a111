//! Core data model shared by every pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ── Endpoint ────────────────────────────────────────────────────────

/// Opaque identifier of a monitored controller (its base URL in practice).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Endpoint {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ── Table List ──────────────────────────────────────────────────────

/// The complete set of tables one endpoint reported in one poll.
///
/// `seq` increases by one for every publication of a pipeline; sequence
/// zero is reserved for the empty list a cache starts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableList {
    pub seq: u64,
    pub tables: Vec<String>,
    pub observed_at: Option<DateTime<Utc>>,
}

impl TableList {
    pub fn empty() -> Self {
        Self {
            seq: 0,
            tables: Vec::new(),
            observed_at: None,
        }
    }

    pub fn new(seq: u64, tables: Vec<String>) -> Self {
        Self {
            seq,
            tables,
            observed_at: Some(Utc::now()),
        }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }
}

/// A table list as it travels through the pipeline channels.
pub type Publication = Arc<TableList>;

/// One table queued for size collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTableJob {
    pub endpoint: Endpoint,
    pub table: String,
}
