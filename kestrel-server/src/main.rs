//! `kestreld` entry point.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use kestrel_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::default();
    let addr = config.addr;
    let server = Server::bind(config)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    server.run().await.context("server terminated")?;
    Ok(())
}
