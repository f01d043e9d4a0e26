//! HA provider capability interface and registry
//!
//! One provider per resource kind / hypervisor combination. Providers are
//! resolved by name once at configuration time and looked up from the
//! registry on every poll, so swapping hypervisors never needs a type
//! switch in the manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::HaError;
use crate::domain::types::{HypervisorKind, LivenessVerdict, Resource, ResourceType};

/// Per-provider timeouts and thresholds, resolved per resource (providers
/// typically scope these to the resource's cluster).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub health_check_timeout: Duration,
    pub activity_check_timeout: Duration,
    /// Minimum spacing between activity checks for one resource.
    pub max_activity_check_interval: Duration,
    /// Sample floor before the failure ratio is evaluated.
    pub max_activity_checks: u32,
    /// Failed-sample ratio at which Degraded escalates to Recovering.
    pub activity_check_failure_ratio: f64,
    pub recovery_timeout: Duration,
    pub max_recovery_attempts: u32,
    /// How long a Recovered resource waits before returning to Available.
    pub recovery_wait_period: Duration,
    pub fence_timeout: Duration,
    pub max_fence_attempts: u32,
    /// Minimum dwell time in Degraded between activity rechecks.
    pub max_degraded_wait: Duration,
    /// Heartbeat age beyond which a record stops counting as fresh.
    pub heartbeat_staleness_window: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            health_check_timeout: Duration::from_secs(10),
            activity_check_timeout: Duration::from_secs(60),
            max_activity_check_interval: Duration::from_secs(60),
            max_activity_checks: 3,
            activity_check_failure_ratio: 0.7,
            recovery_timeout: Duration::from_secs(30),
            max_recovery_attempts: 3,
            recovery_wait_period: Duration::from_secs(600),
            fence_timeout: Duration::from_secs(60),
            max_fence_attempts: 5,
            max_degraded_wait: Duration::from_secs(300),
            heartbeat_staleness_window: Duration::from_secs(120),
        }
    }
}

/// Capability interface implemented once per resource kind / hypervisor.
#[async_trait]
pub trait HaProvider: Send + Sync {
    /// Registry name; matched case-insensitively.
    fn name(&self) -> &str;

    fn resource_type(&self) -> ResourceType;

    /// Hypervisor kind this provider can drive.
    fn resource_sub_type(&self) -> HypervisorKind;

    /// Whether the resource currently qualifies for automated HA handling.
    async fn is_eligible(&self, resource: &Resource) -> bool;

    /// Cheap periodic health probe.
    async fn is_healthy(&self, resource: &Resource) -> Result<bool, HaError>;

    /// Time-windowed activity check: any disk activity since `since`?
    async fn has_activity(
        &self,
        resource: &Resource,
        since: DateTime<Utc>,
    ) -> Result<LivenessVerdict, HaError>;

    /// Attempt to recover the resource through its recovery channel.
    async fn recover(&self, resource: &Resource) -> Result<bool, HaError>;

    /// Fence the resource. Must be idempotent: fencing an already-off
    /// resource returns success with no side effect.
    async fn fence(&self, resource: &Resource) -> Result<bool, HaError>;

    /// Timeouts and thresholds for this resource.
    fn settings(&self, resource: &Resource) -> ProviderSettings;
}

/// Providers keyed by lowercase name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn HaProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn HaProvider>) {
        let name = provider.name().to_lowercase();
        tracing::debug!(provider = %name, "registered HA provider");
        self.providers.insert(name, provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn HaProvider>> {
        self.providers.get(&name.to_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(&name.to_lowercase())
    }

    /// Provider names matching a resource type and sub-type.
    pub fn list(&self, resource_type: ResourceType, sub_type: HypervisorKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .values()
            .filter(|p| p.resource_type() == resource_type && p.resource_sub_type() == sub_type)
            .map(|p| p.name().to_string())
            .collect();
        names.sort();
        names
    }
}
