use anyhow::{Context, Result};
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::info;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize Prometheus metrics exporter
/// Returns a handle that can be used to render metrics for scraping
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        // Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s
        .set_buckets_for_metric(
            Matcher::Full("polar.webhook.processing_ms".to_string()),
            &[
                1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
            ],
        )
        .context("failed to set buckets for polar.webhook.processing_ms")?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Background task to update process metrics
/// Updates uptime and memory usage metrics every 5 seconds
pub async fn process_metrics_task() {
    let start_time = Instant::now();

    loop {
        metrics::gauge!("process.uptime.seconds").set(start_time.elapsed().as_secs() as f64);
        metrics::gauge!("process.is_up").set(1.0);

        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
                let rss_kb = status
                    .lines()
                    .find(|line| line.starts_with("VmRSS:"))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<f64>().ok());
                if let Some(kb) = rss_kb {
                    metrics::gauge!("process.memory.bytes").set(kb * 1024.0);
                }
            }
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Initialize webhook metrics to zero so they appear in Prometheus before the first delivery
pub fn initialize_webhook_metrics() {
    metrics::counter!("polar.webhook.received").absolute(0);
    metrics::counter!("polar.webhook.signature_invalid").absolute(0);
    metrics::counter!("polar.webhook.product_mismatch").absolute(0);

    for tier in ["free", "pro", "team"] {
        metrics::counter!("polar.subscriptions.upserted", "tier" => tier).absolute(0);
    }
}

/// Start a standalone metrics server on the specified port
pub async fn start_metrics_server(port: u16) -> Result<()> {
    let handle = init_metrics()?;
    if METRICS_HANDLE.set(handle).is_err() {
        anyhow::bail!("Metrics handle already initialized");
    }
    initialize_webhook_metrics();

    tokio::spawn(process_metrics_task());

    let app = Router::new().route(
        "/metrics",
        get(|| async {
            METRICS_HANDLE
                .get()
                .map(|handle| handle.render())
                .unwrap_or_default()
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting metrics server on http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind metrics server")?;

    axum::serve(listener, app)
        .await
        .context("Metrics server failed")?;

    Ok(())
}
