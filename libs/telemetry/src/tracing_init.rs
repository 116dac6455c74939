use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::{HasExportConfig, MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::TraceContextPropagator,
    trace::SdkTracerProvider,
};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::Layer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{TelemetryConfig, TelemetryProtocol};

const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(15);

static INIT: OnceLock<()> = OnceLock::new();
static METER_PROVIDER: OnceLock<SdkMeterProvider> = OnceLock::new();

/// Installs the global subscriber once; later calls are no-ops.
pub fn init_telemetry(cfg: TelemetryConfig) -> Result<()> {
    let exporters = cfg.exporter_enabled();
    if INIT.get().is_some() {
        return Ok(());
    }

    init_tracing(&cfg, exporters)?;
    if exporters {
        init_metrics(&cfg)?;
    }

    INIT.set(()).ok();
    Ok(())
}

/// Records the identifiers every pipeline span carries, once they are known.
pub fn with_common_fields(span: &Span, channel_uuid: &str, msg_uuid: Option<&str>, msg_id: Option<i64>) {
    span.record("channel_uuid", tracing::field::display(channel_uuid));
    if let Some(msg_uuid) = msg_uuid {
        span.record("msg_uuid", tracing::field::display(msg_uuid));
    }
    if let Some(msg_id) = msg_id {
        span.record("msg_id", msg_id);
    }
}

fn init_tracing(cfg: &TelemetryConfig, exporters: bool) -> Result<()> {
    let fmt_layer = if cfg.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.default_filter.as_str()));
    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    if !exporters {
        registry.try_init().ok();
        return Ok(());
    }

    let tracer_provider = SdkTracerProvider::builder()
        .with_resource(build_resource(cfg))
        .with_batch_exporter(span_exporter(cfg).context("build OTLP span exporter")?)
        .build();
    let tracer = tracer_provider.tracer(cfg.service_name.clone());
    global::set_tracer_provider(tracer_provider);
    global::set_text_map_propagator(TraceContextPropagator::new());

    registry.with(OpenTelemetryLayer::new(tracer)).try_init().ok();
    Ok(())
}

fn init_metrics(cfg: &TelemetryConfig) -> Result<()> {
    if METER_PROVIDER.get().is_some() {
        return Ok(());
    }
    let reader = PeriodicReader::builder(metric_exporter(cfg).context("build OTLP metric exporter")?)
        .with_interval(METRIC_EXPORT_INTERVAL)
        .build();
    let provider = SdkMeterProvider::builder()
        .with_resource(build_resource(cfg))
        .with_reader(reader)
        .build();
    global::set_meter_provider(provider.clone());
    METER_PROVIDER.set(provider).ok();
    Ok(())
}

fn span_exporter(cfg: &TelemetryConfig) -> Result<SpanExporter, opentelemetry_otlp::ExporterBuildError> {
    match cfg.protocol {
        TelemetryProtocol::Grpc => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(cfg.endpoint.clone())
            .build(),
        TelemetryProtocol::HttpProtobuf => {
            let mut builder = SpanExporter::builder().with_http();
            builder.export_config().endpoint = Some(cfg.endpoint.clone());
            builder.build()
        }
    }
}

fn metric_exporter(cfg: &TelemetryConfig) -> Result<MetricExporter, opentelemetry_otlp::ExporterBuildError> {
    match cfg.protocol {
        TelemetryProtocol::Grpc => MetricExporter::builder()
            .with_tonic()
            .with_endpoint(cfg.endpoint.clone())
            .build(),
        TelemetryProtocol::HttpProtobuf => {
            let mut builder = MetricExporter::builder().with_http();
            builder.export_config().endpoint = Some(cfg.endpoint.clone());
            builder.build()
        }
    }
}

fn build_resource(cfg: &TelemetryConfig) -> Resource {
    Resource::builder_empty()
        .with_service_name(cfg.service_name.clone())
        .with_attributes([
            KeyValue::new("service.version", cfg.service_version.clone()),
            KeyValue::new("deployment.environment", cfg.environment.clone()),
        ])
        .build()
}
