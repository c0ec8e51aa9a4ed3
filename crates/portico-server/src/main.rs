use anyhow::Context;
use clap::Parser;
use portico_server::{logging, CliArgs, ModuleResolver, TransportManager};
use tokio::signal::unix::{signal, SignalKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let config = args.load_config().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    logging::init(&config)?;
    tracing::info!("portico {} starting", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Effective configuration:\n{}", config.to_yaml());

    let resolver = ModuleResolver::from_config(&config)?;
    let manager = TransportManager::new(config, resolver);

    // A signal arriving during startup is picked up once start_all returns
    let mut sigint = signal(SignalKind::interrupt()).context("cannot install SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;

    if let Err(e) = manager.start_all().await {
        tracing::error!("Startup failed: {}", e);
        return Err(e.into());
    }
    for status in manager.status().await {
        tracing::debug!("{} listening on {}", status.transport, status.local_addr);
    }

    tokio::select! {
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }

    manager.stop_all().await;
    tracing::info!("portico shutdown complete");
    Ok(())
}
