use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use task_broker::{Broker, BrokerServer, Config, RestoreOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;
    info!(
        version = task_broker::VERSION,
        timeout_secs = config.timeout,
        path = %config.path,
        "Starting task broker"
    );

    let addr = config.listen_addr();
    let (server, restored) = BrokerServer::bind_and_restore(addr, Broker::from_config(&config))
        .await
        .with_context(|| format!("failed to start on {addr}"))?;

    match restored {
        RestoreOutcome::Restored { pending, leased } => {
            info!(pending, leased, "Resuming from snapshot")
        }
        RestoreOutcome::Absent => info!("No snapshot found, starting empty"),
        RestoreOutcome::Discarded { reason } => warn!("Snapshot discarded: {}", reason),
    }

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Task broker stopped");
    Ok(())
}
