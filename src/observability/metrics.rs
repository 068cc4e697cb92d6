//! Metrics collection and exposition.
//!
//! # Metrics
//! - `wss_connections_accepted_total` (counter): accepted TCP connections by listener
//! - `wss_active_connections` (gauge): connections currently driven
//! - `wss_handshakes_total` (counter): TLS handshakes by outcome
//! - `wss_handshake_duration_seconds` (histogram): time to finish a handshake
//! - `wss_bootstrap_failures_total` (counter): connections whose pipeline could not be built
//! - `wss_connections_closed_total` (counter): closed connections by reason
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; a no-op until a recorder is installed
//! - Prometheus exposition is optional (`observability.metrics_enabled`)

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::net::connection::CloseReason;
use crate::net::listener::ListenerIdentity;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint started");
    Ok(())
}

pub fn record_accepted(listener: &ListenerIdentity) {
    counter!(
        "wss_connections_accepted_total",
        "listener" => listener.name().to_string()
    )
    .increment(1);
    gauge!("wss_active_connections").increment(1.0);
}

pub fn record_handshake(outcome: &'static str, elapsed: Duration) {
    counter!("wss_handshakes_total", "outcome" => outcome).increment(1);
    histogram!("wss_handshake_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_bootstrap_failure(listener: &ListenerIdentity) {
    counter!(
        "wss_bootstrap_failures_total",
        "listener" => listener.name().to_string()
    )
    .increment(1);
}

pub fn record_closed(reason: CloseReason) {
    counter!("wss_connections_closed_total", "reason" => reason.as_str()).increment(1);
    gauge!("wss_active_connections").decrement(1.0);
}
