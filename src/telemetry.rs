use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;

/// Initialize structured logging. `RUST_LOG` wins over the configured level.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    // Writes go to stderr so that command output on stdout stays parseable.
    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    tracing::debug!(json = config.json_logs, "FeatureFlow telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking the log lines of one run
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Create the span every log line of a workflow run is recorded under
pub fn create_run_span(workflow: &str, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "workflow_run",
        workflow = workflow,
        correlation.id = correlation_id,
        otel.kind = "internal"
    )
}

/// Shutdown telemetry gracefully
pub fn shutdown_telemetry() {
    // For structured logging, no explicit shutdown needed
    tracing::debug!("FeatureFlow telemetry shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_ids_are_unique() {
        let first = generate_correlation_id();
        let second = generate_correlation_id();
        assert_ne!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_run_span_without_subscriber() {
        let span = create_run_span("Capture", "abc");
        // disabled without a subscriber, but always constructible
        let _entered = span.enter();
    }
}
