//! `orion daemon` — Background retry drainer and maintenance.

use orion_config::AppConfig;
use tokio::sync::watch;
use tracing::info;

use crate::runtime::Runtime;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let runtime = Runtime::open(config).await?;
    let orchestrator = runtime.orchestrator()?;
    let notifier = runtime.notifier();

    println!("🛰️  Orion Daemon — Starting background tasks");
    println!("   Database:  {}", runtime.config.memory.database_path().display());
    println!(
        "   Drainer:   every {}s, {} attempts, {}s apart",
        runtime.config.queue.drain_interval_secs,
        runtime.config.queue.max_attempts,
        runtime.config.queue.retry_delay_secs
    );
    println!(
        "   Prune:     every {}s",
        runtime.config.memory.prune_interval_secs
    );
    println!("   Channels:  {}", notifier.channel_names().join(", "));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let drainer = runtime
        .drainer(orchestrator)
        .start(runtime.config.queue.drain_interval(), shutdown_rx.clone());
    let maintenance = runtime
        .maintenance()
        .start(runtime.config.memory.prune_interval(), shutdown_rx);
    info!("Daemon started");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown_tx.send(true).ok();

    let (drained, maintained) = tokio::join!(drainer, maintenance);
    drained?;
    maintained?;
    runtime.close().await;

    println!("👋 Orion daemon stopped");
    Ok(())
}
