//! Exporter configuration, loaded from a YAML file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::pipeline::PipelineSettings;
use crate::pool::{PoolSettings, DEFAULT_JITTER_MAX};
use crate::types::Endpoint;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Monitor the single configured controller.
    #[default]
    Direct,
    /// Discover controllers as Kubernetes Services.
    Kubernetes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDiscoveryConfig {
    #[serde(default)]
    pub label_selector: BTreeMap<String, String>,
    /// Defaults to the in-cluster API server.
    #[serde(default)]
    pub api_server: Option<String>,
    #[serde(default)]
    pub token_path: Option<PathBuf>,
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub mode: Mode,
    pub controller: Option<ControllerConfig>,
    pub poll_freq_seconds: u64,
    pub max_parallel_collectors: usize,
    pub discovery_refresh_seconds: u64,
    pub request_timeout_seconds: u64,
    pub jitter_max_ms: u64,
    #[serde(rename = "serviceDiscovery")]
    pub service_discovery: ServiceDiscoveryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            mode: Mode::Direct,
            controller: None,
            poll_freq_seconds: 30,
            max_parallel_collectors: 5,
            discovery_refresh_seconds: 30,
            request_timeout_seconds: 4,
            jitter_max_ms: 500,
            service_discovery: ServiceDiscoveryConfig::default(),
        }
    }
}

impl Config {
    /// Read a YAML file; keys missing from it keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&data).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        // An empty document means "all defaults".
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.mode {
            Mode::Direct if self.controller.is_none() => return Err(ConfigError::MissingController),
            Mode::Kubernetes if self.service_discovery.label_selector.is_empty() => {
                return Err(ConfigError::MissingLabels)
            }
            _ => {}
        }
        if self.max_parallel_collectors == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.poll_freq_seconds == 0 {
            return Err(ConfigError::ZeroInterval("poll_freq_seconds"));
        }
        if self.discovery_refresh_seconds == 0 {
            return Err(ConfigError::ZeroInterval("discovery_refresh_seconds"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::ZeroInterval("request_timeout_seconds"));
        }
        let ceiling = DEFAULT_JITTER_MAX.as_millis() as u64;
        if self.jitter_max_ms > ceiling {
            return Err(ConfigError::JitterTooLarge(self.jitter_max_ms, ceiling));
        }
        Ok(())
    }

    // ── Builders ────────────────────────────────────────────────────

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_poll_frequency_seconds(mut self, seconds: u64) -> Self {
        self.poll_freq_seconds = seconds;
        self
    }

    pub fn with_max_parallel_collectors(mut self, workers: usize) -> Self {
        self.max_parallel_collectors = workers;
        self
    }

    pub fn with_controller(mut self, url: impl Into<String>) -> Self {
        self.controller = Some(ControllerConfig { url: url.into() });
        self
    }

    // ── Derived Settings ────────────────────────────────────────────

    pub fn controller_endpoint(&self) -> Option<Endpoint> {
        self.controller.as_ref().map(|c| Endpoint::new(c.url.as_str()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn discovery_refresh(&self) -> Duration {
        Duration::from_secs(self.discovery_refresh_seconds)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            poll_interval: Duration::from_secs(self.poll_freq_seconds),
            pool: PoolSettings {
                workers: self.max_parallel_collectors,
                jitter_max: Duration::from_millis(self.jitter_max_ms),
            },
        }
    }
}
