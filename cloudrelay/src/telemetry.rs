//! Logging and tracing setup: a `tracing-subscriber` registry with an `EnvFilter`, a console
//! layer and optional OpenTelemetry export.
//!
//! Console output is human readable by default. Set `log_format: json` to emit one JSON object
//! per event, which is easier to ship to a log aggregator.
//!
//! Span export over OTLP/HTTP is off unless `enable_otel_export` is set. The exporter then reads
//! the usual OpenTelemetry variables:
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | collector base URL | `http://localhost:4318` |
//! | `OTEL_EXPORTER_OTLP_PROTOCOL` | `http/protobuf` or `http/json` | `http/protobuf` |
//! | `OTEL_EXPORTER_OTLP_HEADERS` | `key=value` pairs, comma separated, `%20` for a space | none |
//! | `OTEL_SERVICE_NAME` | `service.name` resource attribute | `cloudrelay` |
//!
//! The tracer provider is kept in a `OnceLock` so [`shutdown_telemetry`] can flush pending spans:
//! `tracing-opentelemetry` only holds the tracer, not the provider.

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{Subscriber, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LogFormat;

/// Provider kept for [`shutdown_telemetry`]
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Console output layer in the configured format
fn fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_current_span(true).boxed(),
    }
}

/// Install the global subscriber: filter, console layer and, when `enable_otel_export` is set, the
/// OTLP layer. `RUST_LOG` overrides the default `info` filter.
pub fn init_telemetry(enable_otel_export: bool, log_format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // If OTLP setup fails, fall back to console logging only
    let (otel_layer, otel_error) = if enable_otel_export {
        match create_otlp_tracer() {
            Ok(tracer) => (Some(tracing_opentelemetry::layer().with_tracer(tracer)), None),
            Err(e) => (None, Some(e)),
        }
    } else {
        (None, None)
    };
    let otel_active = otel_layer.is_some();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer(log_format))
        .with(otel_layer)
        .try_init()?;

    match (otel_active, otel_error) {
        (true, _) => info!("Telemetry initialized with OTLP export enabled"),
        (false, Some(e)) => info!("Telemetry initialized without OTLP export: {}", e),
        (false, None) => info!("Telemetry initialized (OTLP export disabled)"),
    }

    Ok(())
}

/// Parse `OTEL_EXPORTER_OTLP_HEADERS` (`key=value,key2=value2`, `%20` for spaces).
fn parse_otlp_headers(raw: &str) -> HashMap<String, String> {
    raw.replace("%20", " ")
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Only the HTTP transports are compiled in; anything else falls back to protobuf.
fn otlp_protocol(raw: Option<&str>) -> Protocol {
    match raw {
        Some("http/json") => Protocol::HttpJson,
        _ => Protocol::HttpBinary,
    }
}

/// Build an OTLP/HTTP span exporter and tracer from the standard `OTEL_*` variables.
fn create_otlp_tracer() -> anyhow::Result<opentelemetry_sdk::trace::Tracer> {
    let service_name = std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "cloudrelay".to_string());
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string());
    let headers = std::env::var("OTEL_EXPORTER_OTLP_HEADERS")
        .map(|raw| parse_otlp_headers(&raw))
        .unwrap_or_default();
    let protocol = otlp_protocol(std::env::var("OTEL_EXPORTER_OTLP_PROTOCOL").ok().as_deref());

    // The subscriber is not installed yet, so this goes to stderr directly
    eprintln!(
        "[otlp] exporting spans for {service_name} to {endpoint} ({} custom headers)",
        headers.len()
    );

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(&endpoint)
        .with_protocol(protocol)
        .with_headers(headers)
        .build()?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_attribute(KeyValue::new("service.name", service_name.clone()))
                .build(),
        )
        .build();

    let tracer = tracer_provider.tracer(service_name);
    let _ = TRACER_PROVIDER.set(tracer_provider);

    Ok(tracer)
}

/// Flush buffered spans and stop the exporter. A no-op when export was never enabled.
pub fn shutdown_telemetry() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(e) = provider.shutdown()
    {
        tracing::error!("Failed to shutdown tracer provider: {}", e);
    }
}
