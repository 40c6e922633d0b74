//! Metrics/health HTTP surface. A separate Tokio task; reads C1 (scanner)
//! and C2 (cache) at scrape time and holds no reconciler state of its own.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use slog::{info, warn, Logger};
use tokio_util::sync::CancellationToken;

use crate::cache::PodCache;
use crate::cgroup::{extract_container_id, extract_pod_uid, Scanner};
use crate::telemetry::Counters;

pub struct MetricsConfig {
    pub bind_address: SocketAddr,
    pub swap_threshold_percent: f64,
    pub dry_run: bool,
}

struct AppState {
    prometheus: PrometheusHandle,
    scanner: Scanner,
    cache: Arc<PodCache>,
    counters: Arc<Counters>,
    config: MetricsConfig,
    logger: Logger,
}

/// Start the `/metrics` + `/healthz` server. Runs until `stop` fires.
pub async fn run(
    scanner: Scanner,
    cache: Arc<PodCache>,
    counters: Arc<Counters>,
    config: MetricsConfig,
    logger: Logger,
    stop: CancellationToken,
) -> anyhow::Result<()> {
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {e}"))?;

    let addr = config.bind_address;
    let state = Arc::new(AppState {
        prometheus,
        scanner,
        cache,
        counters,
        config,
        logger: logger.clone(),
    });

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(logger, "metrics server listening"; "address" => %addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            stop.cancelled().await;
        })
        .await?;

    info!(logger, "metrics server stopped");
    Ok(())
}

async fn healthz_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.cache.is_synced() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "pod cache not yet synced")
    }
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    record_counters_and_gauges(&state);
    collect_scrape_time_metrics(&state);
    state.prometheus.render()
}

/// Monotone counters and simple gauges, recorded straight from the shared
/// atomics the reconciler and deletion path maintain.
fn record_counters_and_gauges(state: &AppState) {
    use std::sync::atomic::Ordering;

    counter!("soomkiller_pods_killed_total")
        .absolute(state.counters.pods_killed_total.load(Ordering::Relaxed));
    counter!("soomkiller_delete_errors_total")
        .absolute(state.counters.delete_errors_total.load(Ordering::Relaxed));
    counter!("soomkiller_event_errors_total")
        .absolute(state.counters.event_errors_total.load(Ordering::Relaxed));

    gauge!("soomkiller_last_kill_unix_seconds")
        .set(state.counters.last_kill_unix.load(Ordering::Relaxed) as f64);
    gauge!("soomkiller_swap_threshold_percent").set(state.config.swap_threshold_percent);
    gauge!("soomkiller_dry_run").set(if state.config.dry_run { 1.0 } else { 0.0 });
    gauge!("soomkiller_pod_cache_synced").set(if state.cache.is_synced() { 1.0 } else { 0.0 });
}

/// Per-container swap/memory/PSI gauges and node-wide swap I/O counters,
/// recomputed on every scrape by calling straight into C1/C2.
fn collect_scrape_time_metrics(state: &AppState) {
    let scan = match state.scanner.find_pod_cgroups() {
        Ok(scan) => scan,
        Err(err) => {
            warn!(state.logger, "scrape-time cgroup scan failed"; "error" => %err);
            return;
        }
    };

    for path in &scan.recognized {
        let path_str = path.to_string_lossy();
        let Some(uid) = extract_pod_uid(&path_str) else {
            continue;
        };
        let Some((_, container_id)) = extract_container_id(&path_str) else {
            continue;
        };
        let metrics = match state.scanner.get_container_metrics(path) {
            Ok(metrics) => metrics,
            Err(_) => continue,
        };

        let (namespace, pod_name) = match state.cache.get_by_uid(&uid) {
            Some(view) => (view.namespace, view.name),
            None => ("unknown".to_string(), uid.clone()),
        };

        gauge!("soomkiller_container_swap_bytes",
            "namespace" => namespace.clone(), "pod" => pod_name.clone(), "container" => container_id.clone())
            .set(metrics.swap_current_bytes as f64);
        gauge!("soomkiller_container_memory_max_bytes",
            "namespace" => namespace.clone(), "pod" => pod_name.clone(), "container" => container_id.clone())
            .set(metrics.memory_max_bytes as f64);
        gauge!("soomkiller_container_psi_some_avg10",
            "namespace" => namespace.clone(), "pod" => pod_name.clone(), "container" => container_id.clone())
            .set(metrics.psi.some.avg10);
        gauge!("soomkiller_container_psi_full_avg10",
            "namespace" => namespace, "pod" => pod_name, "container" => container_id)
            .set(metrics.psi.full.avg10);
    }

    let swap_io = state.scanner.get_swap_io_stats();
    gauge!("soomkiller_node_pswpin_total").set(swap_io.pswpin as f64);
    gauge!("soomkiller_node_pswpout_total").set(swap_io.pswpout as f64);
}
