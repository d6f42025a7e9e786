//! Tracing subscriber and Prometheus exporter set-up.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Telemetry could not be installed.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// `METRICS_HOST`/`METRICS_PORT` do not form a socket address
    #[error("Invalid metrics address {0}")]
    Address(String),

    /// The exporter failed to build or bind
    #[error("Failed to install Prometheus exporter: {0}")]
    Exporter(#[from] BuildError),
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; `default_filter` is used otherwise.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Install the Prometheus recorder with its own HTTP listener on
/// `host:port`, and describe the core's metrics.
///
/// # Errors
///
/// Returns [`TelemetryError`] if the address is invalid or the exporter
/// cannot be installed.
pub fn install_metrics(host: &str, port: u16) -> Result<SocketAddr, TelemetryError> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|_| TelemetryError::Address(format!("{host}:{port}")))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full("prize_draw_reservation_attempts".to_string()),
            &[1.0, 2.0, 3.0, 4.0, 5.0, 8.0, 13.0],
        )?
        .install()?;

    prize_draw_core::metrics::register_metrics();
    tracing::info!(%addr, "Metrics exporter listening");
    Ok(addr)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_invalid_metrics_address_is_rejected() {
        let error = install_metrics("not a host", 9090).unwrap_err();
        assert!(matches!(error, TelemetryError::Address(_)));
    }
}
