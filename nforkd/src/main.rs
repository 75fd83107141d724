use std::env;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nfork::api::AdminServer;
use nfork::config;
use nfork::Controller;

const DEFAULT_CONFIG: &str = "nfork.json";
const DEFAULT_ADMIN_LISTEN: &str = "0.0.0.0:9090";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = env::var("NFORK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let admin_listen =
        env::var("NFORK_ADMIN_LISTEN").unwrap_or_else(|_| DEFAULT_ADMIN_LISTEN.to_string());

    let descriptors = config::load_descriptors(&config_path)
        .with_context(|| format!("unable to load '{}'", config_path))?;

    let controller = Arc::new(
        Controller::start(&descriptors)
            .await
            .context("unable to start inbounds")?,
    );

    let admin = AdminServer::bind(&admin_listen, Arc::clone(&controller))
        .await
        .context("unable to start the admin API")?;

    info!(
        config = %config_path,
        admin = %admin.local_addr(),
        inbounds = descriptors.len(),
        "nfork running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("unable to wait for shutdown signal")?;

    info!("shutting down");
    admin.close();
    controller.close().await;

    Ok(())
}
