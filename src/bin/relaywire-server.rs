use anyhow::Context;
use relaywire::{AppConfig, ProxyServer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    tracing::info!(host = %config.host, port = config.port, "starting relaywire proxy server");

    let server = ProxyServer::bind_with_http(config.server_config(), &config.http_config())
        .context("failed to bind proxy server")?;
    server.run().await.context("server terminated")?;
    Ok(())
}
