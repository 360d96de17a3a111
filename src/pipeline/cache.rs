//! Table cache — the latest table list published for one endpoint.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{Publication, TableList};

/// Holds the newest table list. Every publication replaces the stored
/// list wholesale; publications older than the stored one are ignored.
pub struct TableCache {
    current: Mutex<Publication>,
}

impl Default for TableCache {
    fn default() -> Self {
        Self {
            current: Mutex::new(Arc::new(TableList::empty())),
        }
    }
}

impl TableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current table names (empty before the first publication).
    pub fn tables(&self) -> Vec<String> {
        self.snapshot().tables.clone()
    }

    pub fn snapshot(&self) -> Publication {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    /// When the stored list was observed, `None` before the first publication.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot().observed_at
    }

    /// Replace the stored list. Returns `false` if `list` is not newer.
    pub fn apply(&self, list: Publication) -> bool {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if list.seq <= current.seq {
            return false;
        }
        *current = list;
        true
    }

    /// Apply every publication from `updates` until the channel closes.
    pub async fn listen(self: Arc<Self>, mut updates: mpsc::Receiver<Publication>) {
        while let Some(list) = updates.recv().await {
            let seq = list.seq;
            let count = list.len();
            if self.apply(list) {
                debug!(seq, tables = count, "table cache updated");
            } else {
                debug!(seq, "stale table list ignored");
            }
        }
        debug!("table cache listener stopped");
    }
}
