//! Structured logging and metrics for the scanning gateway.
//!
//! Logging follows the teacher's `observability::tracing_init` shape, scaled
//! down to what this gateway actually needs: an `EnvFilter` driven by
//! `LOG_LEVEL`, and a plain or JSON formatter selected by `LOG_FORMAT`.
//! Metrics mirror `observability::metrics`: Prometheus counters/histograms
//! recorded through the `metrics` facade and rendered at `/metrics`.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::domain::{EngineKind, Verdict};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the global tracing subscriber. `log_level` is one of the
/// values accepted by `LOG_LEVEL` (`debug|info`); anything else falls back
/// to `info`. JSON output is selected by setting `LOG_FORMAT=json`.
pub fn init_tracing(log_level: &str) {
    let directive = match log_level {
        "debug" => "avwarden=debug,tower_http=debug,info",
        _ => "avwarden=info,tower_http=info,warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Install the Prometheus recorder. Idempotent: a second call is a no-op so
/// tests that spin up the gateway repeatedly don't panic.
pub fn init_metrics() {
    if PROMETHEUS_HANDLE.get().is_some() {
        return;
    }
    let builder = PrometheusBuilder::new().set_buckets_for_metric(
        metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
        &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
    );
    let builder = match builder {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, "failed to configure metrics buckets, using defaults");
            PrometheusBuilder::new()
        }
    };
    match builder.install_recorder() {
        Ok(handle) => {
            let _ = PROMETHEUS_HANDLE.set(handle);
        }
        Err(e) => tracing::warn!(error = %e, "failed to install Prometheus recorder"),
    }
}

/// Render the current Prometheus exposition text, or `None` if metrics were
/// never initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Record one completed scan request.
pub fn record_scan(engine: EngineKind, verdict: Verdict, duration: Duration) {
    let engine = engine.as_str();
    let verdict_str = verdict.to_string();

    counter!("avwarden_scans_total", "engine" => engine.to_string(), "status" => verdict_str.clone())
        .increment(1);
    histogram!("avwarden_scan_duration_seconds", "engine" => engine.to_string(), "status" => verdict_str)
        .record(duration.as_secs_f64());
}

/// Record one HTTP request at the router boundary.
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let status_class = format!("{}xx", status / 100);
    counter!(
        "avwarden_http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status_class" => status_class
    )
    .increment(1);
    histogram!("avwarden_http_request_duration_seconds", "method" => method.to_string(), "path" => path.to_string())
        .record(duration.as_secs_f64());
}
