//! forged — TCP server fronting a demo build engine.

use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use forge_server::config::Config;
use forge_server::demo::DemoEngine;
use forge_server::server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Read config from env + CLI. CLI (e.g. --port 7001) wins.
    let config = Config::from_env_and_args()?;
    let engine = DemoEngine::new(Duration::from_millis(500));

    server::run(config, engine).await?;
    Ok(())
}
