//! Heartbeat pools: shared storage as the liveness medium
//!
//! A heartbeat pool is one shared storage backend a host can write a
//! liveness record to. Liveness is inferred through the data plane the
//! workloads depend on, not through a separate network channel: a host that
//! can still reach its storage is, by construction, the host we must not
//! fence.
//!
//! Backends differ in how the record is stored (a file on a mount point, an
//! object in a block store, a tagged extent on a clustered volume); the
//! trait hides that behind write/read/activity operations keyed by the
//! host's address.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Backend kind of a heartbeat pool. Pools are grouped and checked by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolKind {
    NetworkFilesystem,
    SharedMountPoint,
    BlockStore,
    ClusteredVolume,
}

impl PoolKind {
    pub const ALL: [PoolKind; 4] = [
        PoolKind::NetworkFilesystem,
        PoolKind::SharedMountPoint,
        PoolKind::BlockStore,
        PoolKind::ClusteredVolume,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::NetworkFilesystem => "network-filesystem",
            PoolKind::SharedMountPoint => "shared-mount-point",
            PoolKind::BlockStore => "block-store",
            PoolKind::ClusteredVolume => "clustered-volume",
        }
    }
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One liveness record: which host wrote, and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub host: String,
    pub written_at: DateTime<Utc>,
}

/// Capability interface over one shared-storage heartbeat backend.
#[async_trait]
pub trait HeartbeatPool: Send + Sync {
    fn id(&self) -> Uuid;

    fn kind(&self) -> PoolKind;

    /// Mount point / address, for logging only.
    fn location(&self) -> String;

    /// Whether the backing pool still exists and is running. The monitor
    /// prunes pools that stop reporting available, so stale registry
    /// entries never produce false liveness signals.
    async fn is_available(&self) -> bool;

    /// Write a liveness record for `host` stamped `at`. The write itself is
    /// the heartbeat.
    async fn write_heartbeat(&self, host: &str, at: DateTime<Utc>) -> Result<()>;

    /// Most recent heartbeat timestamp attributed to `host`, if any.
    async fn read_heartbeat(&self, host: &str) -> Result<Option<DateTime<Utc>>>;

    /// Whether any write activity from `host` occurred after `since`.
    async fn activity_since(&self, host: &str, since: DateTime<Utc>) -> Result<bool>;

    /// Remove `host`'s records from this pool. Called after a successful
    /// fence so later reads cannot mistake pre-fence activity for life.
    async fn clear_host_records(&self, host: &str) -> Result<()>;
}

/// Grouped snapshot of pools, as consumed by the checkers.
pub type PoolSnapshot = HashMap<PoolKind, Vec<Arc<dyn HeartbeatPool>>>;

/// Heartbeat pool backed by a directory on a shared mount point.
///
/// One timestamp file per host under the mount root. Suits the
/// network-filesystem and shared-mount-point kinds, where every host in the
/// cluster sees the same directory.
pub struct DirHeartbeatPool {
    id: Uuid,
    kind: PoolKind,
    root: PathBuf,
}

impl DirHeartbeatPool {
    pub fn new(kind: PoolKind, root: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            root: root.into(),
        }
    }

    fn record_path(&self, host: &str) -> PathBuf {
        // Host addresses may contain separators; keep the file name flat.
        let name = host.replace(['/', '\\', ':'], "_");
        self.root.join(format!("hb-{name}"))
    }

    async fn read_record(&self, path: &Path) -> Result<Option<HeartbeatRecord>> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => {
                let record: HeartbeatRecord = serde_json::from_str(raw.trim())
                    .with_context(|| format!("malformed heartbeat record at {}", path.display()))?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading heartbeat at {}", path.display())),
        }
    }
}

#[async_trait]
impl HeartbeatPool for DirHeartbeatPool {
    fn id(&self) -> Uuid {
        self.id
    }

    fn kind(&self) -> PoolKind {
        self.kind
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }

    async fn is_available(&self) -> bool {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) => meta.is_dir(),
            Err(_) => false,
        }
    }

    async fn write_heartbeat(&self, host: &str, at: DateTime<Utc>) -> Result<()> {
        let record = HeartbeatRecord {
            host: host.to_string(),
            written_at: at,
        };
        let path = self.record_path(host);
        let payload = serde_json::to_string(&record)?;
        tokio::fs::write(&path, payload)
            .await
            .with_context(|| format!("writing heartbeat at {}", path.display()))?;
        Ok(())
    }

    async fn read_heartbeat(&self, host: &str) -> Result<Option<DateTime<Utc>>> {
        let record = self.read_record(&self.record_path(host)).await?;
        Ok(record.map(|r| r.written_at))
    }

    async fn activity_since(&self, host: &str, since: DateTime<Utc>) -> Result<bool> {
        let record = self.read_record(&self.record_path(host)).await?;
        Ok(record.map(|r| r.written_at > since).unwrap_or(false))
    }

    async fn clear_host_records(&self, host: &str) -> Result<()> {
        let path = self.record_path(host);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("clearing heartbeat at {}", path.display())),
        }
    }
}

/// In-process heartbeat pool.
///
/// Stands in for block-store and clustered-volume backends whose drivers
/// live outside this crate, and doubles as the test backend. Availability
/// is toggleable so pruning behavior can be exercised.
pub struct MemoryHeartbeatPool {
    id: Uuid,
    kind: PoolKind,
    location: String,
    available: AtomicBool,
    records: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MemoryHeartbeatPool {
    pub fn new(kind: PoolKind, location: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            kind,
            location: location.into(),
            available: AtomicBool::new(true),
            records: RwLock::new(HashMap::new()),
        })
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl HeartbeatPool for MemoryHeartbeatPool {
    fn id(&self) -> Uuid {
        self.id
    }

    fn kind(&self) -> PoolKind {
        self.kind
    }

    fn location(&self) -> String {
        self.location.clone()
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn write_heartbeat(&self, host: &str, at: DateTime<Utc>) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            anyhow::bail!("pool {} is not available", self.location);
        }
        self.records.write().insert(host.to_string(), at);
        Ok(())
    }

    async fn read_heartbeat(&self, host: &str) -> Result<Option<DateTime<Utc>>> {
        if !self.available.load(Ordering::SeqCst) {
            anyhow::bail!("pool {} is not available", self.location);
        }
        Ok(self.records.read().get(host).copied())
    }

    async fn activity_since(&self, host: &str, since: DateTime<Utc>) -> Result<bool> {
        if !self.available.load(Ordering::SeqCst) {
            anyhow::bail!("pool {} is not available", self.location);
        }
        Ok(self
            .records
            .read()
            .get(host)
            .map(|ts| *ts > since)
            .unwrap_or(false))
    }

    async fn clear_host_records(&self, host: &str) -> Result<()> {
        self.records.write().remove(host);
        Ok(())
    }
}
