//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_cache_lookups_total` (counter): cache lookups by tier and result
//! - `guard_cache_writes_total` / `guard_cache_deletes_total` (counters)
//! - `guard_cache_errors_total` (counter): remote-tier failures by operation
//! - `guard_cache_local_entries` (gauge): current local-tier size
//! - `guard_retries_total` (counter): scheduled retries by policy
//! - `guard_breaker_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `guard_breaker_transitions_total` (counter): transitions by breaker and target
//! - `guard_breaker_rejections_total` (counter): fail-fast rejections
//! - `guard_pool_requests_total` / `guard_pool_batched_total` (counters)
//! - `guard_pool_active` (gauge): in-flight requests per host
//! - `guard_coalesced_total` (counter): callers that shared another caller's upstream call
//! - `guard_upstream_duration_seconds` (histogram): upstream latency per host
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are bounded: breaker names, hosts and content types come from config

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus exporter with an HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus exporter"),
    }
}

pub fn record_cache_lookup(tier: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("guard_cache_lookups_total", "tier" => tier, "result" => result).increment(1);
}

pub fn record_cache_write(content_type: &str) {
    counter!("guard_cache_writes_total", "content_type" => content_type.to_string()).increment(1);
}

pub fn record_cache_delete() {
    counter!("guard_cache_deletes_total").increment(1);
}

pub fn record_cache_error(op: &'static str) {
    counter!("guard_cache_errors_total", "op" => op).increment(1);
}

pub fn record_cache_size(size: usize) {
    gauge!("guard_cache_local_entries").set(size as f64);
}

pub fn record_retry(policy: &str) {
    counter!("guard_retries_total", "policy" => policy.to_string()).increment(1);
}

pub fn record_breaker_state(name: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("guard_breaker_state", "name" => name.to_string()).set(value);
}

pub fn record_breaker_transition(name: &str, to: CircuitState) {
    counter!(
        "guard_breaker_transitions_total",
        "name" => name.to_string(),
        "to" => to.as_str()
    )
    .increment(1);
    record_breaker_state(name, to);
}

pub fn record_breaker_rejection(name: &str) {
    counter!("guard_breaker_rejections_total", "name" => name.to_string()).increment(1);
}

pub fn record_pool_request(host: &str, start: Instant) {
    counter!("guard_pool_requests_total", "host" => host.to_string()).increment(1);
    histogram!("guard_upstream_duration_seconds", "host" => host.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_pool_batched(host: &str, size: usize) {
    counter!("guard_pool_batched_total", "host" => host.to_string()).increment(size as u64);
}

pub fn record_pool_active(host: &str, active: usize) {
    gauge!("guard_pool_active", "host" => host.to_string()).set(active as f64);
}

pub fn record_coalesced() {
    counter!("guard_coalesced_total").increment(1);
}
