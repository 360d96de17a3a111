//! In-memory fakes of the external capabilities, for unit tests.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::directory::TableDirectory;
use crate::discovery::EndpointDiscovery;
use crate::error::{DiscoveryError, FetchError};
use crate::types::Endpoint;

/// Size reported for a table unless overridden: 1000 + name length.
pub fn default_size(table: &str) -> u64 {
    1000 + table.len() as u64
}

#[derive(Default)]
struct DirectoryState {
    tables: HashMap<Endpoint, Vec<String>>,
    listing_failures: HashMap<Endpoint, usize>,
    prepare_failures: HashMap<Endpoint, usize>,
    broken_tables: HashSet<String>,
    list_calls: HashMap<Endpoint, usize>,
    size_calls: Vec<(Endpoint, String, Instant)>,
}

/// Scriptable table directory that records every call it receives.
#[derive(Default)]
pub struct FakeDirectory {
    state: Mutex<DirectoryState>,
    size_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tables(&self, endpoint: &Endpoint, tables: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state
            .tables
            .insert(endpoint.clone(), tables.iter().map(|t| t.to_string()).collect());
    }

    /// Fail the next `times` listings of `endpoint`.
    pub fn fail_listings(&self, endpoint: &Endpoint, times: usize) {
        self.state.lock().unwrap().listing_failures.insert(endpoint.clone(), times);
    }

    /// Reject the next `times` pipeline constructions for `endpoint`.
    pub fn fail_prepare(&self, endpoint: &Endpoint, times: usize) {
        self.state.lock().unwrap().prepare_failures.insert(endpoint.clone(), times);
    }

    /// Size calls for `table` always fail.
    pub fn break_table(&self, table: &str) {
        self.state.lock().unwrap().broken_tables.insert(table.to_string());
    }

    pub fn set_size_delay(&self, delay: Duration) {
        *self.size_delay.lock().unwrap() = delay;
    }

    pub fn list_calls(&self, endpoint: &Endpoint) -> usize {
        let state = self.state.lock().unwrap();
        state.list_calls.get(endpoint).copied().unwrap_or(0)
    }

    /// Tables whose size was requested on `endpoint`, in call order.
    pub fn size_calls(&self, endpoint: &Endpoint) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .size_calls
            .iter()
            .filter(|(ep, _, _)| ep == endpoint)
            .map(|(_, table, _)| table.clone())
            .collect()
    }

    pub fn size_call_times(&self, endpoint: &Endpoint) -> Vec<Instant> {
        let state = self.state.lock().unwrap();
        state
            .size_calls
            .iter()
            .filter(|(ep, _, _)| ep == endpoint)
            .map(|(_, _, at)| *at)
            .collect()
    }

    pub fn total_size_calls(&self) -> usize {
        self.state.lock().unwrap().size_calls.len()
    }

    /// Highest number of size calls that were ever running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableDirectory for FakeDirectory {
    fn prepare(&self, endpoint: &Endpoint) -> Result<(), FetchError> {
        let mut state = self.state.lock().unwrap();
        match state.prepare_failures.get_mut(endpoint) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(FetchError::InvalidEndpoint(endpoint.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn list_tables(&self, endpoint: &Endpoint) -> Result<Vec<String>, FetchError> {
        let mut state = self.state.lock().unwrap();
        *state.list_calls.entry(endpoint.clone()).or_insert(0) += 1;
        if let Some(left) = state.listing_failures.get_mut(endpoint) {
            if *left > 0 {
                *left -= 1;
                return Err(FetchError::Connection("connection refused".into()));
            }
        }
        Ok(state.tables.get(endpoint).cloned().unwrap_or_default())
    }

    async fn table_size(&self, endpoint: &Endpoint, table: &str) -> Result<u64, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let broken = {
            let mut state = self.state.lock().unwrap();
            state
                .size_calls
                .push((endpoint.clone(), table.to_string(), Instant::now()));
            state.broken_tables.contains(table)
        };

        let delay = *self.size_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if broken {
            Err(FetchError::Decode(format!("garbage size document for {}", table)))
        } else {
            Ok(default_size(table))
        }
    }
}

/// Discovery that replays a script of results, repeating the last one.
pub struct ScriptedDiscovery {
    script: Mutex<VecDeque<Result<Vec<&'static str>, String>>>,
    last: Mutex<Option<Result<Vec<&'static str>, String>>>,
}

impl ScriptedDiscovery {
    pub fn new(script: Vec<Result<Vec<&'static str>, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl EndpointDiscovery for ScriptedDiscovery {
    async fn current_endpoints(&self) -> Result<BTreeSet<Endpoint>, DiscoveryError> {
        let next = {
            let mut script = self.script.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            if let Some(step) = script.pop_front() {
                *last = Some(step.clone());
                step
            } else {
                last.clone().unwrap_or(Ok(Vec::new()))
            }
        };
        match next {
            Ok(eps) => Ok(eps.into_iter().map(Endpoint::from).collect()),
            Err(msg) => Err(DiscoveryError::Unavailable(msg)),
        }
    }
}

pub fn endpoints(ids: &[&str]) -> BTreeSet<Endpoint> {
    ids.iter().map(|id| Endpoint::from(*id)).collect()
}
