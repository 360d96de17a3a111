//! Table directory — the controller-facing capability.
//!
//! Pipelines only ever talk to a controller through this trait. The
//! production implementation is the REST client in [`controller`];
//! tests plug in an in-memory fake.

use async_trait::async_trait;

use crate::error::FetchError;
use crate::types::Endpoint;

pub mod controller;

// ── Directory Trait ─────────────────────────────────────────────────

/// Lists the tables of an endpoint and reports their sizes.
#[async_trait]
pub trait TableDirectory: Send + Sync {
    /// Checked once before a pipeline is started for `endpoint`.
    /// A failure keeps the endpoint unmonitored until the next refresh.
    fn prepare(&self, endpoint: &Endpoint) -> Result<(), FetchError> {
        let _ = endpoint;
        Ok(())
    }

    /// All table names currently hosted by `endpoint`, in reported order.
    async fn list_tables(&self, endpoint: &Endpoint) -> Result<Vec<String>, FetchError>;

    /// Size of `table` in bytes.
    async fn table_size(&self, endpoint: &Endpoint, table: &str) -> Result<u64, FetchError>;
}
