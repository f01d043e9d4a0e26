//! Heartbeat monitor: keeps the local host's liveness records fresh
//!
//! Runs on every host. Each iteration walks the registered pools grouped by
//! backend kind, re-validates that each pool still exists, prunes the ones
//! that do not, and writes a fresh heartbeat with bounded per-pool retry.
//! Exhausting the retries raises an alert and, when configured, requests a
//! local fail-safe reboot. Never a remote action.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::types::{Alert, AlertSeverity};
use crate::infrastructure::heartbeat::pool::{HeartbeatPool, PoolKind, PoolSnapshot};
use crate::traits::agent_channel::AgentChannel;
use crate::traits::alert_sink::AlertSink;

/// Monitor loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatMonitorConfig {
    /// Interval between heartbeat rounds.
    pub interval: Duration,
    /// Write attempts per pool per round.
    pub max_write_tries: u32,
    /// Fixed delay between write attempts.
    pub retry_delay: Duration,
    /// Request a local reboot when a round fails on every try for a pool.
    pub reboot_on_heartbeat_failure: bool,
}

impl Default for HeartbeatMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_write_tries: 5,
            retry_delay: Duration::from_secs(10),
            reboot_on_heartbeat_failure: false,
        }
    }
}

/// Registry of heartbeat pools for the local host, plus the write loop.
///
/// Registries are grouped by kind under one coarse lock each; contention is
/// low (registration events and the periodic loop) and operations are fast,
/// so nothing finer is warranted. Locks are never held across a pool I/O
/// await; the loop works on snapshots.
pub struct HeartbeatMonitor {
    local_host: String,
    config: HeartbeatMonitorConfig,
    registries: HashMap<PoolKind, Mutex<HashMap<Uuid, Arc<dyn HeartbeatPool>>>>,
    alerts: Arc<dyn AlertSink>,
    agent: Arc<dyn AgentChannel>,
    stopped: AtomicBool,
}

impl HeartbeatMonitor {
    pub fn new(
        local_host: impl Into<String>,
        config: HeartbeatMonitorConfig,
        alerts: Arc<dyn AlertSink>,
        agent: Arc<dyn AgentChannel>,
    ) -> Arc<Self> {
        let registries = PoolKind::ALL
            .into_iter()
            .map(|kind| (kind, Mutex::new(HashMap::new())))
            .collect();
        Arc::new(Self {
            local_host: local_host.into(),
            config,
            registries,
            alerts,
            agent,
            stopped: AtomicBool::new(false),
        })
    }

    /// Register a pool. Idempotent: re-registering the same pool id
    /// replaces the entry.
    pub fn register_pool(&self, pool: Arc<dyn HeartbeatPool>) {
        let kind = pool.kind();
        if let Some(registry) = self.registries.get(&kind) {
            let replaced = registry.lock().insert(pool.id(), pool.clone()).is_some();
            tracing::info!(
                pool_id = %pool.id(),
                kind = %kind,
                location = %pool.location(),
                replaced,
                "registered heartbeat pool"
            );
        }
    }

    /// Remove a pool by id. Idempotent; unknown ids are ignored.
    pub fn unregister_pool(&self, id: Uuid) {
        for (kind, registry) in &self.registries {
            if registry.lock().remove(&id).is_some() {
                tracing::info!(pool_id = %id, kind = %kind, "unregistered heartbeat pool");
                return;
            }
        }
    }

    /// Snapshot of all registered pools, grouped by kind. Kinds with no
    /// pools are omitted.
    pub fn snapshot(&self) -> PoolSnapshot {
        let mut snapshot = PoolSnapshot::new();
        for (kind, registry) in &self.registries {
            let pools: Vec<_> = registry.lock().values().cloned().collect();
            if !pools.is_empty() {
                snapshot.insert(*kind, pools);
            }
        }
        snapshot
    }

    pub fn pool_count(&self) -> usize {
        self.registries.values().map(|r| r.lock().len()).sum()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Run the heartbeat loop until stopped.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.interval);
        loop {
            interval.tick().await;
            if self.stopped.load(Ordering::SeqCst) {
                tracing::info!("heartbeat monitor stopped");
                break;
            }
            self.heartbeat_round().await;
        }
    }

    /// One full round: every kind group, prune then write.
    pub async fn heartbeat_round(&self) {
        for kind in PoolKind::ALL {
            let pools: Vec<_> = match self.registries.get(&kind) {
                Some(registry) => registry.lock().values().cloned().collect(),
                None => continue,
            };
            if pools.is_empty() {
                continue;
            }
            tracing::debug!(kind = %kind, pools = pools.len(), "heartbeat round for pool kind");

            for pool in pools {
                if !pool.is_available().await {
                    tracing::warn!(
                        pool_id = %pool.id(),
                        kind = %kind,
                        location = %pool.location(),
                        "pool no longer available, pruning from heartbeat registry"
                    );
                    self.unregister_pool(pool.id());
                    continue;
                }
                self.write_with_retry(pool).await;
            }
        }
    }

    async fn write_with_retry(&self, pool: Arc<dyn HeartbeatPool>) {
        let mut last_error = None;
        for attempt in 1..=self.config.max_write_tries.max(1) {
            match pool.write_heartbeat(&self.local_host, Utc::now()).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(
                        pool_id = %pool.id(),
                        location = %pool.location(),
                        attempt,
                        max_tries = self.config.max_write_tries,
                        error = %e,
                        "heartbeat write failed"
                    );
                    last_error = Some(e);
                    if attempt < self.config.max_write_tries {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        self.on_write_exhausted(&pool, last_error).await;
    }

    async fn on_write_exhausted(&self, pool: &Arc<dyn HeartbeatPool>, error: Option<anyhow::Error>) {
        let reason = error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        tracing::error!(
            pool_id = %pool.id(),
            location = %pool.location(),
            error = %reason,
            "heartbeat writes exhausted for pool"
        );
        self.alerts
            .raise(Alert::new(
                AlertSeverity::Critical,
                None,
                "heartbeat write failure",
                format!(
                    "host {} failed to write heartbeat to pool {} ({}): {}",
                    self.local_host,
                    pool.id(),
                    pool.location(),
                    reason
                ),
            ))
            .await;

        if self.config.reboot_on_heartbeat_failure {
            tracing::error!(
                host = %self.local_host,
                "requesting local fail-safe reboot after heartbeat failure"
            );
            if let Err(e) = self.agent.request_local_reboot().await {
                tracing::error!(error = %e, "fail-safe reboot request failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::heartbeat::pool::MemoryHeartbeatPool;
    use anyhow::Result;
    use async_trait::async_trait;
    use crate::domain::types::Resource;

    #[derive(Default)]
    struct RecordingAgent {
        reboots: AtomicBool,
    }

    #[async_trait]
    impl AgentChannel for RecordingAgent {
        async fn ping(&self, _resource: &Resource) -> bool {
            true
        }
        async fn push_ha_state(&self, _resource: &Resource, _enabled: bool) -> Result<()> {
            Ok(())
        }
        async fn request_local_reboot(&self) -> Result<()> {
            self.reboots.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingSink {
        raised: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn raise(&self, _alert: Alert) {
            self.raised.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_config() -> HeartbeatMonitorConfig {
        HeartbeatMonitorConfig {
            interval: Duration::from_millis(50),
            max_write_tries: 2,
            retry_delay: Duration::from_millis(1),
            reboot_on_heartbeat_failure: false,
        }
    }

    #[tokio::test]
    async fn round_writes_heartbeat_to_every_pool() {
        let sink = Arc::new(CountingSink::default());
        let agent = Arc::new(RecordingAgent::default());
        let monitor = HeartbeatMonitor::new("10.0.0.1", fast_config(), sink, agent);

        let nfs = MemoryHeartbeatPool::new(PoolKind::NetworkFilesystem, "nfs://a");
        let rbd = MemoryHeartbeatPool::new(PoolKind::BlockStore, "rbd://b");
        monitor.register_pool(nfs.clone());
        monitor.register_pool(rbd.clone());

        monitor.heartbeat_round().await;

        assert!(nfs.read_heartbeat("10.0.0.1").await.unwrap().is_some());
        assert!(rbd.read_heartbeat("10.0.0.1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn vanished_pool_is_pruned_not_written() {
        let sink = Arc::new(CountingSink::default());
        let agent = Arc::new(RecordingAgent::default());
        let monitor = HeartbeatMonitor::new("10.0.0.1", fast_config(), sink.clone(), agent);

        let pool = MemoryHeartbeatPool::new(PoolKind::SharedMountPoint, "gfs://a");
        monitor.register_pool(pool.clone());
        pool.set_available(false);

        monitor.heartbeat_round().await;

        assert_eq!(monitor.pool_count(), 0);
        // Pruning is not a write failure; no alert.
        assert_eq!(sink.raised.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn registration_is_idempotent() {
        let sink = Arc::new(CountingSink::default());
        let agent = Arc::new(RecordingAgent::default());
        let monitor = HeartbeatMonitor::new("10.0.0.1", fast_config(), sink, agent);

        let pool = MemoryHeartbeatPool::new(PoolKind::NetworkFilesystem, "nfs://a");
        monitor.register_pool(pool.clone());
        monitor.register_pool(pool.clone());
        assert_eq!(monitor.pool_count(), 1);

        monitor.unregister_pool(pool.id());
        monitor.unregister_pool(pool.id());
        assert_eq!(monitor.pool_count(), 0);
    }

    /// A pool that is "available" but always fails writes, to hit the
    /// exhaustion path.
    struct BrokenPool {
        id: Uuid,
    }

    #[async_trait]
    impl HeartbeatPool for BrokenPool {
        fn id(&self) -> Uuid {
            self.id
        }
        fn kind(&self) -> PoolKind {
            PoolKind::ClusteredVolume
        }
        fn location(&self) -> String {
            "clvm://broken".to_string()
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn write_heartbeat(&self, _host: &str, _at: chrono::DateTime<Utc>) -> Result<()> {
            anyhow::bail!("i/o error")
        }
        async fn read_heartbeat(&self, _host: &str) -> Result<Option<chrono::DateTime<Utc>>> {
            Ok(None)
        }
        async fn activity_since(&self, _host: &str, _since: chrono::DateTime<Utc>) -> Result<bool> {
            Ok(false)
        }
        async fn clear_host_records(&self, _host: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn exhausted_writes_alert_and_optionally_reboot() {
        let sink = Arc::new(CountingSink::default());
        let agent = Arc::new(RecordingAgent::default());
        let mut config = fast_config();
        config.reboot_on_heartbeat_failure = true;
        let monitor = HeartbeatMonitor::new("10.0.0.1", config, sink.clone(), agent.clone());

        monitor.register_pool(Arc::new(BrokenPool { id: Uuid::new_v4() }));
        monitor.heartbeat_round().await;

        assert_eq!(sink.raised.load(Ordering::SeqCst), 1);
        assert!(agent.reboots.load(Ordering::SeqCst));
    }
}
