use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryProtocol {
    Grpc,
    HttpProtobuf,
}

impl TelemetryProtocol {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "http" | "http/protobuf" => Self::HttpProtobuf,
            _ => Self::Grpc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub endpoint: String,
    pub protocol: TelemetryProtocol,
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    /// Filter used when `RUST_LOG` is not set.
    pub default_filter: String,
    pub json_logs: bool,
    pub enabled: bool,
}

impl TelemetryConfig {
    pub fn new(service_name: &str, service_version: &str) -> Self {
        Self {
            endpoint: String::new(),
            protocol: TelemetryProtocol::Grpc,
            service_name: service_name.to_string(),
            service_version: service_version.to_string(),
            environment: "dev".into(),
            default_filter: "info".into(),
            json_logs: true,
            enabled: false,
        }
    }

    pub fn from_env(default_service_name: &str, default_service_version: &str) -> Self {
        let mut cfg = Self::new(default_service_name, default_service_version);
        cfg.endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_default();
        if let Ok(protocol) = env::var("OTEL_EXPORTER_OTLP_PROTOCOL") {
            cfg.protocol = TelemetryProtocol::parse(&protocol);
        }
        if let Ok(name) = env::var("OTEL_SERVICE_NAME") {
            cfg.service_name = name;
        }
        if let Ok(version) = env::var("OTEL_SERVICE_VERSION") {
            cfg.service_version = version;
        }
        cfg.environment = env::var("OTEL_RESOURCE_ATTRIBUTES")
            .ok()
            .and_then(|attrs| parse_environment_from_resource(&attrs))
            .or_else(|| env::var("DEPLOYMENT_ENV").ok())
            .unwrap_or(cfg.environment);
        if let Ok(format) = env::var("LOG_FORMAT") {
            cfg.json_logs = !matches!(format.to_lowercase().as_str(), "text" | "pretty" | "plain");
        }
        cfg.enabled = env::var("ENABLE_OTEL")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        cfg
    }

    pub fn exporter_enabled(&self) -> bool {
        self.enabled && !self.endpoint.trim().is_empty()
    }
}

fn parse_environment_from_resource(value: &str) -> Option<String> {
    value.split(',').find_map(|kv| {
        let (key, val) = kv.split_once('=')?;
        (key.trim() == "deployment.environment").then(|| val.trim().to_string())
    })
}
