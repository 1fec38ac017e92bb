//! OpenTelemetry trace export (cargo feature `telemetry`)
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP/HTTP collector (e.g. http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: service name (default: scribe-dispatchd)
//!
//! The export layer is composed into the subscriber built in `main`; when the
//! endpoint is unset, or the feature is off, no layer is added.

use anyhow::Result;
#[cfg(feature = "telemetry")]
use tracing::Subscriber;
#[cfg(feature = "telemetry")]
use tracing_subscriber::registry::LookupSpan;

#[cfg(feature = "telemetry")]
pub fn layer<S>(
) -> Result<Option<tracing_opentelemetry::OpenTelemetryLayer<S, opentelemetry_sdk::trace::Tracer>>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};

    if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_err() {
        return Ok(None);
    }

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "scribe-dispatchd".to_string());

    // Endpoint is read from the environment by the exporter itself
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .build()?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();
    let tracer = provider.tracer(service_name);
    opentelemetry::global::set_tracer_provider(provider);

    Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer)))
}

#[cfg(not(feature = "telemetry"))]
pub fn layer() -> Result<Option<tracing_subscriber::layer::Identity>> {
    Ok(None)
}

/// Warn once logging is up if export was requested but cannot happen
pub fn report_status() {
    let requested = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok();
    if requested && cfg!(not(feature = "telemetry")) {
        tracing::warn!("OTEL_EXPORTER_OTLP_ENDPOINT set but feature 'telemetry' not enabled");
    } else if requested {
        tracing::info!("OpenTelemetry trace export enabled");
    } else {
        tracing::debug!("OpenTelemetry not configured (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
    }
}

/// Flush pending spans
pub fn shutdown() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}
