//! Scrape endpoint.
//!
//! - `GET /metrics` → table sizes in the Prometheus text format
//! - `GET /healthz` → `ok`

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::metrics::TableSizeGauges;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn router(gauges: Arc<TableSizeGauges>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .with_state(gauges)
}

async fn metrics(State(gauges): State<Arc<TableSizeGauges>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", PROMETHEUS_CONTENT_TYPE)],
        gauges.render_prometheus(),
    )
}

async fn healthz() -> &'static str {
    "ok"
}

/// Serve on `0.0.0.0:{port}` until `shutdown` resolves.
pub async fn serve(
    port: u16,
    gauges: Arc<TableSizeGauges>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "metrics server listening");

    axum::serve(listener, router(gauges))
        .with_graceful_shutdown(shutdown)
        .await
        .context("metrics server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricSink, TABLE_SIZE_METRIC};
    use crate::types::Endpoint;

    #[tokio::test]
    async fn test_metrics_handler_returns_text() {
        let gauges = Arc::new(TableSizeGauges::new());
        gauges.set_table_size(&Endpoint::from("http://a:9000"), "orders", 42);

        let resp = metrics(State(gauges)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[tokio::test]
    async fn test_serves_over_http() {
        let gauges = Arc::new(TableSizeGauges::new());
        gauges.set_table_size(&Endpoint::from("http://a:9000"), "orders", 42);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, router(gauges))
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        let client = reqwest::Client::new();
        let body = client
            .get(format!("http://{}/metrics", addr))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains(TABLE_SIZE_METRIC));
        assert!(body.contains(r#"table="orders""#));

        let health = client
            .get(format!("http://{}/healthz", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(health.status().as_u16(), 200);
        assert_eq!(health.text().await.unwrap(), "ok");

        let _ = stop_tx.send(());
        server.await.unwrap().unwrap();
    }
}
