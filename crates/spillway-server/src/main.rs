use anyhow::Context;
use clap::Parser;
use spillway_logging::{InstanceContext, InstanceContextGuard, SpillwaySubscriberBuilder};
use spillway_server::{Cli, ServerConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::from_cli(&cli)?;

    let _log_guard = SpillwaySubscriberBuilder::new()
        .with_config(config.logging.clone())
        .init();

    let instance = InstanceContext::new(config.logging.service_name.clone());
    let _context = InstanceContextGuard::new(instance.clone());

    async move {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("Failed to bind {}", config.listen))?;

        let shutdown = CancellationToken::new();
        tokio::spawn(wait_for_ctrl_c(shutdown.clone()));

        spillway_server::run(config, listener, shutdown).await?;
        Ok(())
    }
    .instrument(instance.span())
    .await
}

async fn wait_for_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received ctrl-c, shutting down");
            shutdown.cancel();
        }
        Err(e) => warn!(error = %e, "Failed to listen for ctrl-c"),
    }
}
