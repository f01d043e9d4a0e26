// warden daemon: host-side heartbeat agent
//
// Runs the heartbeat monitor for the local host over the configured shared
// mount points. The HA manager itself is embedded by the control plane via
// the library crate, where real directory/power/agent integrations exist;
// stand-alone, this binary keeps the storage liveness records fresh.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use warden::infrastructure::heartbeat::{DirHeartbeatPool, HeartbeatMonitor, PoolKind};
use warden::traits::agent_channel::AgentChannel;
use warden::traits::alert_sink::LogAlertSink;
use warden::WardenConfig;

#[derive(Debug, Parser)]
#[command(name = "warden", about = "Host HA heartbeat agent")]
struct Args {
    /// Address this host tags its heartbeat records with.
    #[arg(long)]
    host_address: String,

    /// Shared mount points to heartbeat on (repeatable).
    #[arg(long = "pool")]
    pools: Vec<std::path::PathBuf>,
}

/// Local agent endpoints for the stand-alone daemon. The fail-safe reboot is
/// left to the init system; this binary only logs the request.
struct LocalAgent;

#[async_trait::async_trait]
impl AgentChannel for LocalAgent {
    async fn ping(&self, _resource: &warden::Resource) -> bool {
        true
    }

    async fn push_ha_state(&self, _resource: &warden::Resource, _enabled: bool) -> Result<()> {
        Ok(())
    }

    async fn request_local_reboot(&self) -> Result<()> {
        tracing::error!("local fail-safe reboot requested; deferring to the init system");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = WardenConfig::load()?;

    let monitor = HeartbeatMonitor::new(
        args.host_address.clone(),
        config.heartbeat.to_monitor_config(),
        Arc::new(LogAlertSink),
        Arc::new(LocalAgent),
    );

    for path in args.pools.iter().chain(config.heartbeat.pool_paths.iter()) {
        monitor.register_pool(Arc::new(DirHeartbeatPool::new(
            PoolKind::SharedMountPoint,
            path.clone(),
        )));
    }
    if monitor.pool_count() == 0 {
        anyhow::bail!("no heartbeat pools configured; pass --pool or set heartbeat.pool_paths");
    }

    tracing::info!(
        host = %args.host_address,
        pools = monitor.pool_count(),
        "starting heartbeat monitor"
    );

    let runner = monitor.clone();
    let handle = tokio::spawn(runner.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    monitor.stop();
    handle.abort();
    Ok(())
}
