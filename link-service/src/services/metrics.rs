//! Metrics collection for link-service.
//!
//! Provides per-flow linking metrics and standard Prometheus metrics.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static LINK_FLOW_STEPS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static PROVIDER_API_CALLS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize metrics collection.
pub fn init_metrics() {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if METRICS_HANDLE.set(handle).is_err() {
        panic!("failed to set metrics handle: already initialized");
    }

    let registry = Registry::new();

    // Flow-step counter: one increment per orchestrated operation
    let flow_steps_counter = IntCounterVec::new(
        Opts::new(
            "link_flow_steps_total",
            "Total linking flow steps by provider, step, and outcome",
        ),
        &["provider", "step", "outcome"],
    )
    .expect("Failed to create link_flow_steps_total metric");

    // Upstream call counter keyed by HTTP status (or transport failure)
    let provider_calls_counter = IntCounterVec::new(
        Opts::new(
            "provider_api_calls_total",
            "Total provider API calls by provider, operation, and status",
        ),
        &["provider", "operation", "status"],
    )
    .expect("Failed to create provider_api_calls_total metric");

    registry
        .register(Box::new(flow_steps_counter.clone()))
        .expect("Failed to register link_flow_steps_total");
    registry
        .register(Box::new(provider_calls_counter.clone()))
        .expect("Failed to register provider_api_calls_total");

    PROMETHEUS_REGISTRY
        .set(registry)
        .expect("Failed to set prometheus registry");
    LINK_FLOW_STEPS_TOTAL
        .set(flow_steps_counter)
        .expect("Failed to set link_flow_steps_total");
    PROVIDER_API_CALLS_TOTAL
        .set(provider_calls_counter)
        .expect("Failed to set provider_api_calls_total");
}

/// Get metrics output in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    // Append custom prometheus metrics
    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

/// Record an orchestrated flow step and its outcome.
pub fn record_flow_step(provider: &str, step: &str, outcome: &str) {
    if let Some(counter) = LINK_FLOW_STEPS_TOTAL.get() {
        counter.with_label_values(&[provider, step, outcome]).inc();
    }
}

/// Record a provider API call.
pub fn record_provider_call(provider: &str, operation: &str, status: &str) {
    if let Some(counter) = PROVIDER_API_CALLS_TOTAL.get() {
        counter
            .with_label_values(&[provider, operation, status])
            .inc();
    }
}
