use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{resource::Resource, trace as sdktrace};

/// OTLP/gRPC tracer exporting spans synchronously as they close.
pub fn tracer(service_name: &'static str, endpoint: &str) -> Result<sdktrace::Tracer> {
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(
            sdktrace::Config::default()
                .with_resource(Resource::new(vec![KeyValue::new("service.name", service_name)])),
        )
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .install_simple()
        .with_context(|| format!("Failed to install OTLP exporter for {endpoint}"))
}

pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}
