//! Controller REST client.
//!
//! Talks to the controller admin API:
//! - `GET {endpoint}/tables` → `{"tables": [...]}`
//! - `GET {endpoint}/tables/{table}/size` → size document
//!
//! Every call carries the client-wide request timeout.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use super::TableDirectory;
use crate::error::FetchError;
use crate::types::Endpoint;

// ── Wire Types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TablesResponse {
    #[serde(default)]
    tables: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableSizeResponse {
    #[serde(default)]
    reported_size_in_bytes: Option<i64>,
    #[serde(default)]
    realtime_segments: Option<SegmentsSize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SegmentsSize {
    reported_size_in_bytes: i64,
}

/// Pick the sample out of a size document.
///
/// Realtime tables report under `realtimeSegments`; offline-only tables
/// have no such section and the top-level figure is used instead. The
/// controller reports -1 when it could not reach any server.
fn reported_size(resp: &TableSizeResponse) -> Result<u64, FetchError> {
    let size = resp
        .realtime_segments
        .as_ref()
        .map(|s| s.reported_size_in_bytes)
        .or(resp.reported_size_in_bytes)
        .ok_or_else(|| FetchError::Decode("size document has no reportedSizeInBytes".into()))?;

    u64::try_from(size).map_err(|_| FetchError::Decode(format!("negative table size {}", size)))
}

// ── Client ──────────────────────────────────────────────────────────

pub struct ControllerClient {
    client: reqwest::Client,
}

impl ControllerClient {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Connection(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        Ok(resp.json().await?)
    }
}

/// Parse `endpoint` as an absolute http(s) base URL.
fn base_url(endpoint: &Endpoint) -> Result<Url, FetchError> {
    let url = Url::parse(endpoint.as_str())
        .map_err(|_| FetchError::InvalidEndpoint(endpoint.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(FetchError::InvalidEndpoint(endpoint.to_string())),
    }
}

/// Append path segments to the endpoint's base path, percent-encoding each.
fn endpoint_url(endpoint: &Endpoint, segments: &[&str]) -> Result<Url, FetchError> {
    let mut url = base_url(endpoint)?;
    url.path_segments_mut()
        .map_err(|_| FetchError::InvalidEndpoint(endpoint.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[async_trait]
impl TableDirectory for ControllerClient {
    fn prepare(&self, endpoint: &Endpoint) -> Result<(), FetchError> {
        base_url(endpoint).map(|_| ())
    }

    async fn list_tables(&self, endpoint: &Endpoint) -> Result<Vec<String>, FetchError> {
        let url = endpoint_url(endpoint, &["tables"])?;
        let body: TablesResponse = self.get_json(url).await?;
        Ok(body.tables)
    }

    async fn table_size(&self, endpoint: &Endpoint, table: &str) -> Result<u64, FetchError> {
        let url = endpoint_url(endpoint, &["tables", table, "size"])?;
        let body: TableSizeResponse = self.get_json(url).await?;
        reported_size(&body)
    }
}
