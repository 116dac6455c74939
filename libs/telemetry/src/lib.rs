//! Tracing and metric helpers shared by Inlet services.
//!
//! `install` wires a `tracing` subscriber (JSON or text) and, when enabled via
//! environment, OTLP exporters for spans and metrics. Counters go through the
//! `metrics` facade so tests and binaries can plug in any recorder.

mod config;
mod context;
mod metrics;
mod tracing_init;

pub use config::{TelemetryConfig, TelemetryProtocol};
pub use context::TelemetryLabels;
pub use metrics::{record_counter, record_gauge, record_histogram};
pub use tracing_init::{init_telemetry, with_common_fields};

/// Installs the subscriber for `service_name`, reading the rest of the
/// configuration from the environment.
pub fn install(service_name: &str) -> anyhow::Result<()> {
    init_telemetry(TelemetryConfig::from_env(
        service_name,
        env!("CARGO_PKG_VERSION"),
    ))
}
