//! KVM host HA provider
//!
//! Eligibility requires a working out-of-band power channel and at least one
//! heartbeat pool: without either there is no safe way to recover or fence.
//! Health is the agent probe backed by storage liveness in "any" mode, so a
//! host whose management agent died but whose heartbeats are fresh does not
//! read as unhealthy. Activity checks and the fencing decision read storage
//! directly through the checkers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::HaError;
use crate::domain::types::{HypervisorKind, LivenessVerdict, Resource, ResourceType};
use crate::infrastructure::ha::provider::{HaProvider, ProviderSettings};
use crate::infrastructure::heartbeat::checker::{ActivityChecker, LivenessChecker};
use crate::infrastructure::heartbeat::monitor::HeartbeatMonitor;
use crate::infrastructure::heartbeat::pool::HeartbeatPool;
use crate::traits::agent_channel::AgentChannel;
use crate::traits::power_channel::{PowerChannel, PowerOperation, PowerState};

pub struct KvmHaProvider {
    monitor: Arc<HeartbeatMonitor>,
    liveness: LivenessChecker,
    activity: ActivityChecker,
    power: Arc<dyn PowerChannel>,
    agent: Arc<dyn AgentChannel>,
    settings: ProviderSettings,
}

impl KvmHaProvider {
    pub fn new(
        monitor: Arc<HeartbeatMonitor>,
        power: Arc<dyn PowerChannel>,
        agent: Arc<dyn AgentChannel>,
        settings: ProviderSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            monitor,
            liveness: LivenessChecker::new(),
            activity: ActivityChecker::new(),
            power,
            agent,
            settings,
        })
    }

    /// Remove the fenced host's heartbeat records so a later liveness read
    /// cannot mistake pre-fence activity for life. Failures are logged, not
    /// fatal: the fence itself already succeeded.
    async fn clear_heartbeat_records(&self, resource: &Resource) {
        for pools in self.monitor.snapshot().values() {
            for pool in pools {
                if let Err(e) = pool.clear_host_records(&resource.address).await {
                    tracing::warn!(
                        resource_id = %resource.id,
                        pool_id = %pool.id(),
                        error = %e,
                        "failed to clear heartbeat records for fenced host"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl HaProvider for KvmHaProvider {
    fn name(&self) -> &str {
        "kvmhaprovider"
    }

    fn resource_type(&self) -> ResourceType {
        ResourceType::Host
    }

    fn resource_sub_type(&self) -> HypervisorKind {
        HypervisorKind::Kvm
    }

    async fn is_eligible(&self, resource: &Resource) -> bool {
        if !self.power.is_enabled(resource).await {
            tracing::debug!(
                resource_id = %resource.id,
                "host has no out-of-band management, not HA-eligible"
            );
            return false;
        }
        !resource.in_maintenance()
            && !resource.admin_disabled()
            && self.monitor.pool_count() > 0
            && matches!(resource.hypervisor, HypervisorKind::Kvm | HypervisorKind::Lxc)
    }

    async fn is_healthy(&self, resource: &Resource) -> Result<bool, HaError> {
        if self.agent.ping(resource).await {
            return Ok(true);
        }
        // Agent unreachable; let storage speak. Any fresh pool kind counts.
        let snapshot = self.monitor.snapshot();
        let verdict = self
            .liveness
            .check(
                &resource.address,
                &snapshot,
                false,
                self.settings.heartbeat_staleness_window,
            )
            .await;
        match verdict {
            LivenessVerdict::Alive => Ok(true),
            LivenessVerdict::Dead => Ok(false),
            LivenessVerdict::Undetermined => Err(HaError::InsufficientEvidence {
                resource_id: resource.id,
            }),
        }
    }

    async fn has_activity(
        &self,
        resource: &Resource,
        since: DateTime<Utc>,
    ) -> Result<LivenessVerdict, HaError> {
        let snapshot = self.monitor.snapshot();
        Ok(self.activity.check(&resource.address, &snapshot, since).await)
    }

    async fn recover(&self, resource: &Resource) -> Result<bool, HaError> {
        if !self.power.is_enabled(resource).await {
            return Err(HaError::Recovery {
                resource_id: resource.id,
                reason: "out-of-band management is not enabled for this host".to_string(),
            });
        }
        match self.power.execute(resource, PowerOperation::Reset).await {
            Ok(acknowledged) => {
                tracing::info!(
                    resource_id = %resource.id,
                    acknowledged,
                    "recovery power reset issued"
                );
                Ok(acknowledged)
            }
            Err(e) => Err(HaError::Recovery {
                resource_id: resource.id,
                reason: e.to_string(),
            }),
        }
    }

    async fn fence(&self, resource: &Resource) -> Result<bool, HaError> {
        if !self.power.is_enabled(resource).await {
            return Err(HaError::Fence {
                resource_id: resource.id,
                reason: "out-of-band management is not enabled for this host".to_string(),
            });
        }

        // Idempotency: a host already off (or with unknown power state after
        // an earlier fence) is a success with no side effect.
        match self.power.power_state(resource).await {
            Ok(PowerState::Off) | Ok(PowerState::Unknown) => {
                tracing::info!(
                    resource_id = %resource.id,
                    "host already powered off, fence is a no-op"
                );
                self.clear_heartbeat_records(resource).await;
                return Ok(true);
            }
            Ok(PowerState::On) => {}
            Err(e) => {
                tracing::warn!(
                    resource_id = %resource.id,
                    error = %e,
                    "could not read power state before fencing"
                );
            }
        }

        match self.power.execute(resource, PowerOperation::Off).await {
            Ok(true) => {
                self.clear_heartbeat_records(resource).await;
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => Err(HaError::Fence {
                resource_id: resource.id,
                reason: e.to_string(),
            }),
        }
    }

    fn settings(&self, _resource: &Resource) -> ProviderSettings {
        self.settings.clone()
    }
}
