//! Error types for the collection core.
//!
//! Everything below the process boundary returns one of these; `main`
//! and config loading wrap them in `anyhow` with context.

use thiserror::Error;

use crate::types::Endpoint;

/// A single list/size call against a controller failed.
///
/// Always transient: the unit of work is dropped and retried on the
/// next poll.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Connection(e.to_string())
        }
    }
}

/// The endpoint discovery backend could not produce a membership set.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery backend unavailable: {0}")]
    Unavailable(String),

    #[error("discovery backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed discovery response: {0}")]
    Decode(String),

    #[error("discovery misconfigured: {0}")]
    Config(String),
}

impl From<reqwest::Error> for DiscoveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            DiscoveryError::Decode(e.to_string())
        } else {
            DiscoveryError::Unavailable(e.to_string())
        }
    }
}

/// A pipeline for a newly discovered endpoint could not be started.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("worker concurrency limit must be at least 1")]
    ZeroWorkers,

    #[error("endpoint {endpoint} rejected: {source}")]
    Prepare {
        endpoint: Endpoint,
        #[source]
        source: FetchError,
    },
}

/// Semantic validation failures of a loaded configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("controller config missing (required in direct mode)")]
    MissingController,

    #[error("serviceDiscovery.labelSelector is not defined (required in kubernetes mode)")]
    MissingLabels,

    #[error("max_parallel_collectors must be at least 1")]
    ZeroWorkers,

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("jitter_max_ms is {0}, the ceiling is {1}")]
    JitterTooLarge(u64, u64),
}
