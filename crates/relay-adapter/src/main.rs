mod adapter;
mod cli;

use clap::Parser;
use tracing::warn;

use adapter::Adapter;
use cli::Cli;
use relay_core::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "relay_adapter=info".into()))
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| std::env::var("RELAY_CONFIG").ok());

    let config = RelayConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "config load failed, using defaults");
        RelayConfig::default()
    });

    let adapter = Adapter::build(config)?;
    adapter.start().await?;

    Ok(())
}
