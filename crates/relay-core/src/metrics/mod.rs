//! Prometheus metrics for relays, reliability checks and session leases.
//!
//! Recording goes through the `metrics` facade and is lock-free. The exporter handle is
//! installed once per process and rendered by the portal's `/metrics` route.
//!
//! Provider addresses are interned for labels. The paired provider set is small, so the
//! pool stays bounded.

use crate::types::QosReport;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{borrow::Cow, sync::OnceLock, time::Duration};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

static PROVIDER_LABEL_POOL: OnceLock<dashmap::DashMap<String, &'static str>> = OnceLock::new();

#[inline]
fn provider_label(provider: &str) -> Cow<'static, str> {
    let pool = PROVIDER_LABEL_POOL.get_or_init(dashmap::DashMap::new);

    if let Some(interned) = pool.get(provider) {
        return Cow::Borrowed(*interned);
    }

    let owned = provider.to_string();
    let leaked: &'static str = Box::leak(owned.clone().into_boxed_str());
    pool.insert(owned, leaked);
    Cow::Borrowed(leaked)
}

fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "failed to install global prometheus recorder, using a detached one"
                );
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Owner of the process-wide Prometheus exporter handle.
#[derive(Clone)]
pub struct MetricsCollector {
    prometheus_handle: PrometheusHandle,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self { prometheus_handle: init_prometheus_recorder() }
    }

    /// Renders all recorded metrics in the Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Records the outcome of a primary relay. `outcome` is `success` or a
/// [`RelayError::as_str`](crate::relay::RelayError::as_str) label.
pub fn record_relay(chain_id: &str, provider: Option<&str>, outcome: &'static str, latency: Duration) {
    let provider = provider.map_or(Cow::Borrowed("none"), provider_label);
    counter!(
        "relay_requests_total",
        "chain_id" => chain_id.to_string(),
        "provider" => provider.clone(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("relay_request_duration_seconds", "chain_id" => chain_id.to_string(), "provider" => provider)
        .record(latency.as_secs_f64());
}

/// Records the status of a data-reliability follow-up.
pub fn record_reliability(chain_id: &str, status: &'static str) {
    counter!("relay_reliability_checks_total", "chain_id" => chain_id.to_string(), "status" => status)
        .increment(1);
}

/// Records a session returned to the session manager.
pub fn record_session_released(outcome: &'static str) {
    counter!("relay_sessions_released_total", "outcome" => outcome).increment(1);
}

/// Publishes the latest QoS report computed for a provider.
pub fn record_qos(provider: &str, report: &QosReport) {
    let provider = provider_label(provider);
    gauge!("relay_qos_latency", "provider" => provider.clone()).set(report.latency);
    gauge!("relay_qos_availability", "provider" => provider.clone()).set(report.availability);
    gauge!("relay_qos_sync", "provider" => provider).set(report.sync);
}
