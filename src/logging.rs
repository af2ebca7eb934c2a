//! Logging module for PipeForge
//!
//! Configures structured logging using the tracing crate, providing JSON
//! output for production and pretty formatting for development.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::error::Result;

/// Initialize the logging system
///
/// Configures tracing based on the environment:
/// - Production: JSON formatted logs
/// - Development: Pretty formatted logs with colors
pub fn init_tracing(log_level: &str, environment: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pipeforge={}", log_level)));

    let is_production = environment == "production";

    if is_production {
        let formatting_layer = fmt::layer()
            .json()
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true);

        Registry::default()
            .with(env_filter)
            .with(formatting_layer)
            .try_init()
            .map_err(|e| {
                crate::error::Error::internal(format!("Failed to initialize tracing: {}", e))
            })?;
    } else {
        let formatting_layer = fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);

        Registry::default()
            .with(env_filter)
            .with(formatting_layer)
            .try_init()
            .map_err(|e| {
                crate::error::Error::internal(format!("Failed to initialize tracing: {}", e))
            })?;
    }

    tracing::info!(
        environment = environment,
        log_level = log_level,
        "Logging initialized"
    );

    Ok(())
}

/// Helper struct for logging metrics
///
/// Skips and circuit breaker transitions are surfaced as structured log
/// lines a metrics pipeline can scrape.
pub struct LogMetrics;

impl LogMetrics {
    /// Log a counter increment
    pub fn counter(name: &str, value: u64, labels: &[(&str, &str)]) {
        tracing::info!(
            metric_type = "counter",
            metric_name = name,
            metric_value = value,
            metric_labels = ?labels,
            "Metric recorded"
        );
    }

    /// Log a gauge value
    pub fn gauge(name: &str, value: f64, labels: &[(&str, &str)]) {
        tracing::info!(
            metric_type = "gauge",
            metric_name = name,
            metric_value = value,
            metric_labels = ?labels,
            "Metric recorded"
        );
    }
}
