use anyhow::Result;
use inlet_gateway::config::GatewayConfig;
use inlet_telemetry::install as init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry("inlet-gateway")?;

    let config = GatewayConfig::from_env()?;
    inlet_gateway::run(config).await
}
