use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lazykv_server::{serve, Store, BIND_VAR, DEFAULT_BIND};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr = std::env::var(BIND_VAR).unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "lazykv-server listening");

    serve(listener, Arc::new(Store::new()))
        .await
        .context("server stopped")?;
    Ok(())
}
