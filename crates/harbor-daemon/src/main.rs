//! Harbor daemon entry point.
//!
//! Starts the configured warm pools, sweeps idle and expired sandboxes on a
//! fixed interval and cleans everything up on Ctrl-C.

use harbor_daemon::{Daemon, DaemonConfig};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing - logs go to stderr
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("harbor_daemon=info".parse()?)
                .add_directive("harbor_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Harbor daemon");

    // Load and validate configuration from environment
    let config = DaemonConfig::from_env()?;
    tracing::info!(?config, "Configuration loaded");
    config.validate()?;

    let daemon = Daemon::new(config);
    daemon.start_pools().await?;

    daemon
        .run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;

    tracing::info!("Cleaning up...");
    daemon.shutdown().await;
    Ok(())
}
