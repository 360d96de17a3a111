//! Kubernetes Service discovery.
//!
//! Lists Services in every namespace through the core API
//! (`GET /api/v1/services?labelSelector=...`) and maps each one to
//! `http://{name}.{namespace}.svc:{first port}`. Authenticates with the
//! pod's service-account token, re-read on every request so rotated
//! tokens are picked up.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Certificate, Url};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use super::EndpointDiscovery;
use crate::config::ServiceDiscoveryConfig;
use crate::error::DiscoveryError;
use crate::types::Endpoint;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const DEFAULT_API_SERVER: &str = "https://kubernetes.default.svc";

// ── Wire Types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ServiceList {
    #[serde(default)]
    items: Vec<Service>,
}

#[derive(Debug, Deserialize)]
struct Service {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: ServiceSpec,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
    #[serde(default = "default_namespace")]
    namespace: String,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceSpec {
    #[serde(default)]
    ports: Vec<ServicePort>,
}

#[derive(Debug, Deserialize)]
struct ServicePort {
    port: u16,
}

fn default_namespace() -> String {
    "default".to_string()
}

// ── Helpers ─────────────────────────────────────────────────────────

/// `k=v` pairs sorted and joined by commas.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn endpoints_from_services(list: ServiceList) -> BTreeSet<Endpoint> {
    let mut endpoints = BTreeSet::new();
    for service in list.items {
        let Some(port) = service.spec.ports.first() else {
            warn!(
                service = %service.metadata.name,
                namespace = %service.metadata.namespace,
                "service exposes no ports, skipping"
            );
            continue;
        };
        endpoints.insert(Endpoint::new(format!(
            "http://{}.{}.svc:{}",
            service.metadata.name, service.metadata.namespace, port.port
        )));
    }
    endpoints
}

/// API server from the in-cluster environment, or the cluster DNS name.
fn in_cluster_api_server() -> String {
    match (
        std::env::var("KUBERNETES_SERVICE_HOST"),
        std::env::var("KUBERNETES_SERVICE_PORT"),
    ) {
        (Ok(host), Ok(port)) if !host.is_empty() => {
            if host.contains(':') {
                format!("https://[{}]:{}", host, port)
            } else {
                format!("https://{}:{}", host, port)
            }
        }
        _ => DEFAULT_API_SERVER.to_string(),
    }
}

// ── Discovery ───────────────────────────────────────────────────────

pub struct KubernetesDiscovery {
    client: reqwest::Client,
    api_server: Url,
    selector: String,
    token_path: Option<PathBuf>,
}

impl KubernetesDiscovery {
    pub fn from_config(
        config: &ServiceDiscoveryConfig,
        timeout: Duration,
    ) -> Result<Self, DiscoveryError> {
        let api_server = config
            .api_server
            .clone()
            .unwrap_or_else(in_cluster_api_server);
        let api_server = Url::parse(&api_server)
            .map_err(|e| DiscoveryError::Config(format!("invalid apiServer {}: {}", api_server, e)))?;

        let mut builder = reqwest::Client::builder().timeout(timeout);

        let ca_path = config
            .ca_path
            .clone()
            .or_else(|| existing(Path::new(SERVICE_ACCOUNT_DIR).join("ca.crt")));
        if let Some(path) = ca_path {
            let pem = std::fs::read(&path).map_err(|e| {
                DiscoveryError::Config(format!("reading CA bundle {}: {}", path.display(), e))
            })?;
            let cert = Certificate::from_pem(&pem).map_err(|e| {
                DiscoveryError::Config(format!("parsing CA bundle {}: {}", path.display(), e))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| DiscoveryError::Config(format!("failed to build HTTP client: {}", e)))?;

        let token_path = config
            .token_path
            .clone()
            .or_else(|| existing(Path::new(SERVICE_ACCOUNT_DIR).join("token")));

        Ok(Self {
            client,
            api_server,
            selector: label_selector(&config.label_selector),
            token_path,
        })
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    fn services_url(&self) -> Result<Url, DiscoveryError> {
        let mut url = self.api_server.clone();
        url.path_segments_mut()
            .map_err(|_| DiscoveryError::Config(format!("apiServer {} cannot be a base", self.api_server)))?
            .pop_if_empty()
            .extend(["api", "v1", "services"]);
        url.query_pairs_mut().append_pair("labelSelector", &self.selector);
        Ok(url)
    }

    async fn bearer_token(&self) -> Result<Option<String>, DiscoveryError> {
        let Some(path) = &self.token_path else {
            return Ok(None);
        };
        let token = tokio::fs::read_to_string(path).await.map_err(|e| {
            DiscoveryError::Config(format!("reading token {}: {}", path.display(), e))
        })?;
        Ok(Some(token.trim().to_string()))
    }
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.exists().then_some(path)
}

#[async_trait]
impl EndpointDiscovery for KubernetesDiscovery {
    async fn current_endpoints(&self) -> Result<BTreeSet<Endpoint>, DiscoveryError> {
        let url = self.services_url()?;
        let mut req = self.client.get(url).header(ACCEPT, "application/json");
        if let Some(token) = self.bearer_token().await? {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DiscoveryError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let list: ServiceList = resp.json().await?;
        let endpoints = endpoints_from_services(list);
        debug!(selector = %self.selector, endpoints = ?endpoints, "discovered controller services");
        Ok(endpoints)
    }
}
