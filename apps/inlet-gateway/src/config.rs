use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use inlet_backend::BackendConfig;
use inlet_core::Channel;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub addr: SocketAddr,
    /// Work queue and fingerprint cache fall back to in-process versions when unset.
    pub nats_url: Option<String>,
    pub channels_file: Option<PathBuf>,
    pub backend: BackendConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let addr = env_string("INLET_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into());
        let addr = addr
            .parse()
            .with_context(|| format!("invalid INLET_ADDR: {addr}"))?;
        Ok(Self {
            addr,
            nats_url: env_string("NATS_URL"),
            channels_file: env_string("INLET_CHANNELS_FILE").map(PathBuf::from),
            backend: BackendConfig::from_env()?,
        })
    }

    /// Channels to seed into the store at startup.
    pub fn load_channels(&self) -> Result<Vec<Channel>> {
        let Some(path) = &self.channels_file else {
            return Ok(Vec::new());
        };
        let raw = std::fs::read(path)
            .with_context(|| format!("unable to read channels file {}", path.display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("invalid channels file {}", path.display()))
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
