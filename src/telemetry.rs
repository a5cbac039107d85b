//! Tracing and OpenTelemetry setup
//!
//! Logs always go to stdout through `tracing-subscriber`. Spans are exported
//! over OTLP only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace, Resource};
use tracing::{info, Level, Subscriber};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{fmt, prelude::*, registry::LookupSpan, EnvFilter};

use crate::error::{Error, Result};

const SERVICE_NAME: &str = "searchdb-operator";
const OTEL_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Build the OTLP layer for the given subscriber.
pub fn init_telemetry<S>(endpoint: &str) -> Result<OpenTelemetryLayer<S, trace::Tracer>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    global::set_text_map_propagator(TraceContextPropagator::new());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(trace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])))
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .map_err(|e| Error::ConfigError(format!("failed to install OTLP pipeline: {e}")))?;

    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// Install the global subscriber: env filter, fmt layer and optional OTLP.
pub fn init_logging(json: bool) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = if json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    match std::env::var(OTEL_ENDPOINT_ENV) {
        Ok(endpoint) => {
            let otel_layer = init_telemetry(&endpoint)?;
            registry.with(otel_layer).init();
            info!("OpenTelemetry tracing initialized ({})", endpoint);
        }
        Err(_) => {
            registry.init();
            info!("OpenTelemetry tracing disabled ({} not set)", OTEL_ENDPOINT_ENV);
        }
    }
    Ok(())
}

/// Flush any spans still buffered in the batch exporter.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}
