//! HA configuration records and the CAS-guarded state store
//!
//! One `HaConfig` per (resource id, resource type). The record is created on
//! first configuration and never deleted, only disabled. The single write
//! path for the `state` field is `compare_and_swap_state`: a transition is
//! applied only if the recorded state still equals the expected from-state,
//! which turns racing controllers into exactly one winner and silent losers.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::state_machine::HaState;
use crate::domain::types::ResourceType;

/// Persisted per-resource HA configuration and current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaConfig {
    pub resource_id: Uuid,
    pub resource_type: ResourceType,
    /// Provider name, resolved against the registry at configuration time.
    pub provider: String,
    pub enabled: bool,
    pub state: HaState,
    /// Controller instance allowed to drive transitions for this resource.
    /// `None` means unowned; any controller may process it.
    pub owner: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl HaConfig {
    fn key(&self) -> (Uuid, ResourceType) {
        (self.resource_id, self.resource_type)
    }
}

#[async_trait]
pub trait HaConfigRepository: Send + Sync {
    async fn find(&self, resource_id: Uuid, resource_type: ResourceType) -> Option<HaConfig>;

    async fn list(&self) -> Vec<HaConfig>;

    async fn list_filtered(
        &self,
        resource_id: Option<Uuid>,
        resource_type: Option<ResourceType>,
    ) -> Vec<HaConfig>;

    /// Insert or replace a record.
    async fn upsert(&self, config: HaConfig) -> Result<()>;

    /// Update the enabled flag. Returns false if no record exists.
    async fn set_enabled(&self, resource_id: Uuid, resource_type: ResourceType, enabled: bool)
        -> bool;

    /// Update the provider name. Returns false if no record exists.
    async fn set_provider(
        &self,
        resource_id: Uuid,
        resource_type: ResourceType,
        provider: &str,
    ) -> bool;

    /// Apply a state transition iff the stored state equals `from`.
    /// Returns false on a lost race or a missing record.
    async fn compare_and_swap_state(
        &self,
        resource_id: Uuid,
        resource_type: ResourceType,
        from: HaState,
        to: HaState,
    ) -> bool;

    /// Set or clear the owning controller.
    async fn set_owner(
        &self,
        resource_id: Uuid,
        resource_type: ResourceType,
        owner: Option<Uuid>,
    ) -> bool;

    /// Clear ownership of every record owned by `controller`. Returns the
    /// number of records released. Called on controller shutdown so a
    /// standby can adopt the resources.
    async fn release_ownership(&self, controller: Uuid) -> usize;
}

/// In-memory repository; the reference implementation and the test backend.
#[derive(Default)]
pub struct InMemoryHaConfigRepository {
    records: RwLock<HashMap<(Uuid, ResourceType), HaConfig>>,
}

impl InMemoryHaConfigRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl HaConfigRepository for InMemoryHaConfigRepository {
    async fn find(&self, resource_id: Uuid, resource_type: ResourceType) -> Option<HaConfig> {
        self.records
            .read()
            .get(&(resource_id, resource_type))
            .cloned()
    }

    async fn list(&self) -> Vec<HaConfig> {
        self.records.read().values().cloned().collect()
    }

    async fn list_filtered(
        &self,
        resource_id: Option<Uuid>,
        resource_type: Option<ResourceType>,
    ) -> Vec<HaConfig> {
        self.records
            .read()
            .values()
            .filter(|c| resource_id.map(|id| c.resource_id == id).unwrap_or(true))
            .filter(|c| {
                resource_type
                    .map(|t| c.resource_type == t)
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    async fn upsert(&self, config: HaConfig) -> Result<()> {
        self.records.write().insert(config.key(), config);
        Ok(())
    }

    async fn set_enabled(
        &self,
        resource_id: Uuid,
        resource_type: ResourceType,
        enabled: bool,
    ) -> bool {
        match self.records.write().get_mut(&(resource_id, resource_type)) {
            Some(record) => {
                record.enabled = enabled;
                record.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    async fn set_provider(
        &self,
        resource_id: Uuid,
        resource_type: ResourceType,
        provider: &str,
    ) -> bool {
        match self.records.write().get_mut(&(resource_id, resource_type)) {
            Some(record) => {
                record.provider = provider.to_string();
                record.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    async fn compare_and_swap_state(
        &self,
        resource_id: Uuid,
        resource_type: ResourceType,
        from: HaState,
        to: HaState,
    ) -> bool {
        match self.records.write().get_mut(&(resource_id, resource_type)) {
            Some(record) if record.state == from => {
                record.state = to;
                record.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    async fn set_owner(
        &self,
        resource_id: Uuid,
        resource_type: ResourceType,
        owner: Option<Uuid>,
    ) -> bool {
        match self.records.write().get_mut(&(resource_id, resource_type)) {
            Some(record) => {
                record.owner = owner;
                record.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    async fn release_ownership(&self, controller: Uuid) -> usize {
        let mut released = 0;
        for record in self.records.write().values_mut() {
            if record.owner == Some(controller) {
                record.owner = None;
                record.updated_at = Utc::now();
                released += 1;
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(state: HaState) -> HaConfig {
        HaConfig {
            resource_id: Uuid::new_v4(),
            resource_type: ResourceType::Host,
            provider: "kvmhaprovider".to_string(),
            enabled: true,
            state,
            owner: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn cas_applies_only_from_expected_state() {
        let repo = InMemoryHaConfigRepository::new();
        let c = config(HaState::Available);
        let id = c.resource_id;
        repo.upsert(c).await.unwrap();

        // Wrong from-state loses.
        assert!(
            !repo
                .compare_and_swap_state(id, ResourceType::Host, HaState::Suspect, HaState::Checking)
                .await
        );

        // Correct from-state wins.
        assert!(
            repo.compare_and_swap_state(id, ResourceType::Host, HaState::Available, HaState::Suspect)
                .await
        );
        let found = repo.find(id, ResourceType::Host).await.unwrap();
        assert_eq!(found.state, HaState::Suspect);
    }

    #[tokio::test]
    async fn concurrent_cas_has_exactly_one_winner() {
        let repo = InMemoryHaConfigRepository::new();
        let c = config(HaState::Available);
        let id = c.resource_id;
        repo.upsert(c).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.compare_and_swap_state(
                    id,
                    ResourceType::Host,
                    HaState::Available,
                    HaState::Suspect,
                )
                .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "stale from-state must lose the race");
    }

    #[tokio::test]
    async fn release_ownership_clears_only_own_records() {
        let repo = InMemoryHaConfigRepository::new();
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();

        let mut mine = config(HaState::Available);
        mine.owner = Some(me);
        let mut theirs = config(HaState::Available);
        theirs.owner = Some(other);
        let theirs_id = theirs.resource_id;

        repo.upsert(mine).await.unwrap();
        repo.upsert(theirs).await.unwrap();

        assert_eq!(repo.release_ownership(me).await, 1);
        let still_owned = repo.find(theirs_id, ResourceType::Host).await.unwrap();
        assert_eq!(still_owned.owner, Some(other));
    }

    #[tokio::test]
    async fn filtered_listing() {
        let repo = InMemoryHaConfigRepository::new();
        let a = config(HaState::Available);
        let a_id = a.resource_id;
        repo.upsert(a).await.unwrap();
        repo.upsert(config(HaState::Disabled)).await.unwrap();

        assert_eq!(repo.list().await.len(), 2);
        assert_eq!(repo.list_filtered(Some(a_id), None).await.len(), 1);
        assert_eq!(
            repo.list_filtered(None, Some(ResourceType::Host)).await.len(),
            2
        );
    }
}
