//! Endpoint discovery — which controllers should be monitored right now.
//!
//! Direct mode monitors one configured controller. Kubernetes mode asks
//! the API server for Services matching a label selector; see
//! [`kubernetes`].

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::error::DiscoveryError;
use crate::types::Endpoint;

pub mod kubernetes;

/// Produces the current endpoint set. Polled by the cluster manager.
#[async_trait]
pub trait EndpointDiscovery: Send + Sync {
    async fn current_endpoints(&self) -> Result<BTreeSet<Endpoint>, DiscoveryError>;
}

/// A fixed endpoint set.
pub struct StaticDiscovery {
    endpoints: BTreeSet<Endpoint>,
}

impl StaticDiscovery {
    pub fn new(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        Self {
            endpoints: endpoints.into_iter().collect(),
        }
    }

    pub fn single(endpoint: Endpoint) -> Self {
        Self::new([endpoint])
    }
}

#[async_trait]
impl EndpointDiscovery for StaticDiscovery {
    async fn current_endpoints(&self) -> Result<BTreeSet<Endpoint>, DiscoveryError> {
        Ok(self.endpoints.clone())
    }
}
