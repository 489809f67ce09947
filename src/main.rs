//! grafanacloud-secrets - HTTP Server Entry Point
//!
//! Starts the HTTP server that exposes the credential engine.

use grafanacloud_secrets::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grafanacloud_secrets=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: storage={:?}, max_attempts={}, backoff={:?}, revoke_not_found={:?}",
        config.storage_type,
        config.retry_policy.max_attempts,
        config.retry_policy.backoff,
        config.revoke_not_found
    );

    // Start HTTP server
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting server on {}", addr);

    api::serve(config).await?;

    Ok(())
}
