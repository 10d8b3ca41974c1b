use axum::{Router, routing::get};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use owo_colors::OwoColorize;
use std::sync::OnceLock;
use std::time::Instant;
use tokio::net::TcpListener;

use crate::shutdown::shutdown_signal;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn install_recorder_once() -> &'static PrometheusHandle {
    PROM_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("install global metrics recorder")
    })
}

/// Serves `/metrics`, `/healthz`, `/readyz` on `port`. Runs until shutdown
/// signalled (SIGINT/SIGTERM).
pub async fn run_metrics_server(port: u16) {
    let handle = install_recorder_once().clone();
    let metrics_route = get(move || {
        let handle = handle.clone();
        async move { handle.render() }
    });
    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .route("/metrics", metrics_route);
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind metrics server to {addr}: {e}"));
    println!(
        "{}{}",
        "starting metrics server • port=".green(),
        port.to_string().green().dimmed()
    );
    let started = Instant::now();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("metrics server failed");
    println!(
        "{} {}",
        "metrics server stopped • uptime was".yellow(),
        format!("{:.2?}", started.elapsed()).yellow().dimmed()
    );
}

/// The per-ClusterQueue metrics named in spec.md §6.
pub mod cluster_queue {
    use super::*;

    pub fn set_pending(cluster_queue: &str, active: u64, inadmissible: u64) {
        gauge!("pending_workloads", "cluster_queue" => cluster_queue.to_string(), "status" => "active")
            .set(active as f64);
        gauge!("pending_workloads", "cluster_queue" => cluster_queue.to_string(), "status" => "inadmissible")
            .set(inadmissible as f64);
    }

    pub fn set_admitted_active(cluster_queue: &str, n: u64) {
        gauge!("admitted_active_workloads", "cluster_queue" => cluster_queue.to_string())
            .set(n as f64);
    }

    pub fn inc_admitted_total(cluster_queue: &str) {
        counter!("admitted_workloads_total", "cluster_queue" => cluster_queue.to_string())
            .increment(1);
    }

    pub fn set_status(cluster_queue: &str, status: &str) {
        for s in ["Pending", "Active", "Terminating"] {
            gauge!("cluster_queue_status", "cluster_queue" => cluster_queue.to_string(), "status" => s)
                .set(if s == status { 1.0 } else { 0.0 });
        }
    }
}
