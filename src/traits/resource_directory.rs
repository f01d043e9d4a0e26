//! Resource directory: host/cluster/zone lookup and partition HA flags
//!
//! The cluster topology is owned by the surrounding system; the HA engine
//! reads host snapshots from it and persists the cluster/zone-level HA
//! flags through it. An in-memory implementation is provided for tests and
//! for running the engine stand-alone.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::types::Resource;

#[async_trait]
pub trait ResourceDirectory: Send + Sync {
    /// Look up a host snapshot by id. Returns `None` for unknown hosts;
    /// removed hosts are returned with `removed` set.
    async fn find_host(&self, id: Uuid) -> Option<Resource>;

    async fn hosts_in_cluster(&self, cluster_id: Uuid) -> Vec<Resource>;

    async fn hosts_in_zone(&self, zone_id: Uuid) -> Vec<Resource>;

    /// Cluster-level HA flag. An absent flag reads as enabled.
    async fn is_ha_enabled_for_cluster(&self, cluster_id: Uuid) -> bool;

    /// Zone-level HA flag. An absent flag reads as enabled.
    async fn is_ha_enabled_for_zone(&self, zone_id: Uuid) -> bool;

    async fn set_cluster_ha_enabled(&self, cluster_id: Uuid, enabled: bool);

    async fn set_zone_ha_enabled(&self, zone_id: Uuid, enabled: bool);
}

/// In-memory resource directory backed by plain maps.
#[derive(Default)]
pub struct InMemoryResourceDirectory {
    hosts: RwLock<HashMap<Uuid, Resource>>,
    cluster_flags: RwLock<HashMap<Uuid, bool>>,
    zone_flags: RwLock<HashMap<Uuid, bool>>,
}

impl InMemoryResourceDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn upsert_host(&self, host: Resource) {
        self.hosts.write().insert(host.id, host);
    }

    pub fn mark_removed(&self, id: Uuid) {
        if let Some(host) = self.hosts.write().get_mut(&id) {
            host.removed = true;
        }
    }
}

#[async_trait]
impl ResourceDirectory for InMemoryResourceDirectory {
    async fn find_host(&self, id: Uuid) -> Option<Resource> {
        self.hosts.read().get(&id).cloned()
    }

    async fn hosts_in_cluster(&self, cluster_id: Uuid) -> Vec<Resource> {
        self.hosts
            .read()
            .values()
            .filter(|h| h.cluster_id == Some(cluster_id))
            .cloned()
            .collect()
    }

    async fn hosts_in_zone(&self, zone_id: Uuid) -> Vec<Resource> {
        self.hosts
            .read()
            .values()
            .filter(|h| h.zone_id == Some(zone_id))
            .cloned()
            .collect()
    }

    async fn is_ha_enabled_for_cluster(&self, cluster_id: Uuid) -> bool {
        self.cluster_flags
            .read()
            .get(&cluster_id)
            .copied()
            .unwrap_or(true)
    }

    async fn is_ha_enabled_for_zone(&self, zone_id: Uuid) -> bool {
        self.zone_flags
            .read()
            .get(&zone_id)
            .copied()
            .unwrap_or(true)
    }

    async fn set_cluster_ha_enabled(&self, cluster_id: Uuid, enabled: bool) {
        self.cluster_flags.write().insert(cluster_id, enabled);
    }

    async fn set_zone_ha_enabled(&self, zone_id: Uuid, enabled: bool) {
        self.zone_flags.write().insert(zone_id, enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{HypervisorKind, ResourceState};

    fn host(cluster: Uuid, zone: Uuid) -> Resource {
        Resource {
            id: Uuid::new_v4(),
            name: "kvm-01".to_string(),
            address: "10.0.0.1".to_string(),
            cluster_id: Some(cluster),
            zone_id: Some(zone),
            hypervisor: HypervisorKind::Kvm,
            state: ResourceState::Enabled,
            removed: false,
        }
    }

    #[tokio::test]
    async fn absent_partition_flags_read_as_enabled() {
        let dir = InMemoryResourceDirectory::new();
        let cluster = Uuid::new_v4();
        assert!(dir.is_ha_enabled_for_cluster(cluster).await);

        dir.set_cluster_ha_enabled(cluster, false).await;
        assert!(!dir.is_ha_enabled_for_cluster(cluster).await);
    }

    #[tokio::test]
    async fn cluster_and_zone_membership_lookups() {
        let dir = InMemoryResourceDirectory::new();
        let cluster = Uuid::new_v4();
        let zone = Uuid::new_v4();
        let h = host(cluster, zone);
        let id = h.id;
        dir.upsert_host(h);

        assert_eq!(dir.hosts_in_cluster(cluster).await.len(), 1);
        assert_eq!(dir.hosts_in_zone(zone).await.len(), 1);
        assert!(dir.hosts_in_cluster(Uuid::new_v4()).await.is_empty());

        dir.mark_removed(id);
        let found = dir.find_host(id).await.unwrap();
        assert!(found.removed);
    }
}
