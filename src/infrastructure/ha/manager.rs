//! HA Manager - Coordinator for host failure detection and fencing
//!
//! A thin coordinator over specialized components:
//! - HaStateMachine: pure transition table (no I/O)
//! - HaConfigRepository: CAS-guarded persisted state
//! - CounterRegistry: per-resource attempt/suspicion bookkeeping
//! - TaskPool x4: bounded execution of health / activity / recovery / fence
//!
//! One periodic poll enumerates every HA configuration and dispatches work;
//! task results come back as events through `apply_event`, which performs
//! the compare-and-swap and then queues the side effect for the new state
//! onto the appropriate pool. The CAS itself never does I/O and no lock is
//! held across task dispatch. A failed CAS is a lost race and is dropped;
//! the next poll re-evaluates from the stored state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::HaError;
use crate::domain::state_machine::{HaEvent, HaState, HaStateMachine};
use crate::domain::types::{
    Alert, AlertSeverity, HostStatus, HypervisorKind, LivenessVerdict, Resource, ResourceType,
};
use crate::infrastructure::ha::counter::CounterRegistry;
use crate::infrastructure::ha::provider::{HaProvider, ProviderRegistry};
use crate::infrastructure::task_pool::{TaskPool, TaskPoolConfig, TaskTicket};
use crate::repositories::ha_config::{HaConfig, HaConfigRepository};
use crate::traits::agent_channel::AgentChannel;
use crate::traits::alert_sink::AlertSink;
use crate::traits::resource_directory::ResourceDirectory;

/// Poll cadence and pool sizing for one manager instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaManagerConfig {
    pub poll_interval: Duration,
    pub health_pool: TaskPoolConfig,
    pub activity_pool: TaskPoolConfig,
    pub recovery_pool: TaskPoolConfig,
    pub fence_pool: TaskPoolConfig,
}

impl Default for HaManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            health_pool: TaskPoolConfig {
                workers: 8,
                queue_size: 128,
            },
            activity_pool: TaskPoolConfig {
                workers: 4,
                queue_size: 64,
            },
            recovery_pool: TaskPoolConfig {
                workers: 2,
                queue_size: 32,
            },
            fence_pool: TaskPoolConfig {
                workers: 2,
                queue_size: 32,
            },
        }
    }
}

/// The HA orchestrator. Cheap to clone; all fields are shared.
#[derive(Clone)]
pub struct HaManager {
    controller_id: Uuid,
    config: HaManagerConfig,
    repo: Arc<dyn HaConfigRepository>,
    directory: Arc<dyn ResourceDirectory>,
    providers: Arc<ProviderRegistry>,
    counters: Arc<CounterRegistry>,
    alerts: Arc<dyn AlertSink>,
    agent: Arc<dyn AgentChannel>,
    health_pool: TaskPool,
    activity_pool: TaskPool,
    recovery_pool: TaskPool,
    fence_pool: TaskPool,
    stopped: Arc<AtomicBool>,
}

impl HaManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        controller_id: Uuid,
        config: HaManagerConfig,
        repo: Arc<dyn HaConfigRepository>,
        directory: Arc<dyn ResourceDirectory>,
        providers: Arc<ProviderRegistry>,
        alerts: Arc<dyn AlertSink>,
        agent: Arc<dyn AgentChannel>,
    ) -> Self {
        let health_pool = TaskPool::new("ha-health", config.health_pool);
        let activity_pool = TaskPool::new("ha-activity", config.activity_pool);
        let recovery_pool = TaskPool::new("ha-recovery", config.recovery_pool);
        let fence_pool = TaskPool::new("ha-fence", config.fence_pool);
        Self {
            controller_id,
            config,
            repo,
            directory,
            providers,
            counters: Arc::new(CounterRegistry::new()),
            alerts,
            agent,
            health_pool,
            activity_pool,
            recovery_pool,
            fence_pool,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn controller_id(&self) -> Uuid {
        self.controller_id
    }

    // ------------------------------------------------------------------
    // External API surface
    // ------------------------------------------------------------------

    /// Configure HA for a resource with the named provider. Creates the
    /// record disabled; `enable_ha` arms it.
    pub async fn configure_ha(
        &self,
        resource_id: Uuid,
        resource_type: ResourceType,
        provider_name: &str,
    ) -> Result<bool, HaError> {
        let provider =
            self.providers
                .get(provider_name)
                .ok_or_else(|| HaError::UnknownProvider {
                    name: provider_name.to_string(),
                })?;

        let resource = self
            .directory
            .find_host(resource_id)
            .await
            .filter(|r| !r.removed)
            .ok_or_else(|| HaError::Eligibility {
                resource_id,
                reason: "resource not found in directory".to_string(),
            })?;

        if resource.hypervisor != provider.resource_sub_type() {
            return Err(HaError::IncompatibleProvider {
                provider: provider_name.to_lowercase(),
                resource_id,
                reason: format!(
                    "provider drives {:?}, resource is {:?}",
                    provider.resource_sub_type(),
                    resource.hypervisor
                ),
            });
        }

        let name = provider_name.to_lowercase();
        match self.repo.find(resource_id, resource_type).await {
            Some(_) => {
                self.repo
                    .set_provider(resource_id, resource_type, &name)
                    .await;
            }
            None => {
                self.repo
                    .upsert(HaConfig {
                        resource_id,
                        resource_type,
                        provider: name.clone(),
                        enabled: false,
                        state: HaState::Disabled,
                        owner: Some(self.controller_id),
                        updated_at: Utc::now(),
                    })
                    .await
                    .map_err(|e| HaError::Eligibility {
                        resource_id,
                        reason: e.to_string(),
                    })?;
            }
        }
        tracing::info!(resource_id = %resource_id, provider = %name, "HA configured for resource");
        Ok(true)
    }

    /// Enable HA for a configured resource.
    pub async fn enable_ha(
        &self,
        resource_id: Uuid,
        resource_type: ResourceType,
    ) -> Result<bool, HaError> {
        let config = self
            .repo
            .find(resource_id, resource_type)
            .await
            .ok_or(HaError::UnknownResource {
                resource_id,
                resource_type,
            })?;

        self.repo.set_enabled(resource_id, resource_type, true).await;
        if config.state == HaState::Disabled {
            self.apply_event(&config, HaEvent::Enabled, None).await;
        }
        self.push_agent_flag(resource_id, true).await;
        tracing::info!(resource_id = %resource_id, "HA enabled for resource");
        Ok(true)
    }

    /// Disable HA for a configured resource. Any in-flight escalation stops
    /// at the next dispatch gate; no further tasks are launched.
    pub async fn disable_ha(
        &self,
        resource_id: Uuid,
        resource_type: ResourceType,
    ) -> Result<bool, HaError> {
        let config = self
            .repo
            .find(resource_id, resource_type)
            .await
            .ok_or(HaError::UnknownResource {
                resource_id,
                resource_type,
            })?;

        self.repo
            .set_enabled(resource_id, resource_type, false)
            .await;
        if config.state != HaState::Disabled {
            self.apply_event(&config, HaEvent::Disabled, None).await;
        }
        self.counters.purge(resource_id, resource_type);
        self.push_agent_flag(resource_id, false).await;
        tracing::info!(resource_id = %resource_id, "HA disabled for resource");
        Ok(true)
    }

    /// Enable the cluster flag and cascade to member hosts. Hosts with no
    /// HA configuration are configured with the first provider matching
    /// their hypervisor, when one is registered.
    pub async fn enable_ha_for_cluster(&self, cluster_id: Uuid) -> Result<bool, HaError> {
        self.directory.set_cluster_ha_enabled(cluster_id, true).await;
        for host in self.directory.hosts_in_cluster(cluster_id).await {
            match self.repo.find(host.id, host.resource_type()).await {
                Some(config) if !config.enabled => {
                    let _ = self.enable_ha(host.id, host.resource_type()).await;
                }
                Some(_) => {}
                None => {
                    let candidates =
                        self.providers.list(host.resource_type(), host.hypervisor);
                    if let Some(provider) = candidates.first() {
                        if self
                            .configure_ha(host.id, host.resource_type(), provider)
                            .await
                            .is_ok()
                        {
                            let _ = self.enable_ha(host.id, host.resource_type()).await;
                        }
                    } else {
                        tracing::debug!(
                            resource_id = %host.id,
                            hypervisor = ?host.hypervisor,
                            "no provider registered for hypervisor, skipping auto-configure"
                        );
                    }
                }
            }
        }
        Ok(true)
    }

    /// Disable the cluster flag and cascade `Disabled` to member hosts.
    pub async fn disable_ha_for_cluster(&self, cluster_id: Uuid) -> Result<bool, HaError> {
        self.directory
            .set_cluster_ha_enabled(cluster_id, false)
            .await;
        for host in self.directory.hosts_in_cluster(cluster_id).await {
            if self.repo.find(host.id, host.resource_type()).await.is_some() {
                let _ = self.disable_ha(host.id, host.resource_type()).await;
            }
        }
        Ok(true)
    }

    /// Enable the zone flag. Member resources re-arm on the next poll.
    pub async fn enable_ha_for_zone(&self, zone_id: Uuid) -> Result<bool, HaError> {
        self.directory.set_zone_ha_enabled(zone_id, true).await;
        Ok(true)
    }

    /// Disable the zone flag and cascade `Disabled` to member hosts.
    pub async fn disable_ha_for_zone(&self, zone_id: Uuid) -> Result<bool, HaError> {
        self.directory.set_zone_ha_enabled(zone_id, false).await;
        for host in self.directory.hosts_in_zone(zone_id).await {
            if let Some(config) = self.repo.find(host.id, host.resource_type()).await {
                if config.state != HaState::Disabled {
                    self.apply_event(&config, HaEvent::Disabled, None).await;
                }
                self.counters.purge(host.id, host.resource_type());
            }
        }
        Ok(true)
    }

    pub fn list_ha_providers(
        &self,
        resource_type: ResourceType,
        sub_type: HypervisorKind,
    ) -> Vec<String> {
        self.providers.list(resource_type, sub_type)
    }

    pub async fn list_ha_resources(
        &self,
        resource_id: Option<Uuid>,
        resource_type: Option<ResourceType>,
    ) -> Vec<HaConfig> {
        self.repo.list_filtered(resource_id, resource_type).await
    }

    /// Whether VMs on the host should be considered alive, derived from HA
    /// state alone. Errors with `UnknownResource` when the host has no HA
    /// configuration so callers can fall back to another investigator.
    pub async fn is_vm_alive_on_host(&self, resource_id: Uuid) -> Result<bool, HaError> {
        let config = self
            .repo
            .find(resource_id, ResourceType::Host)
            .await
            .ok_or(HaError::UnknownResource {
                resource_id,
                resource_type: ResourceType::Host,
            })?;
        Ok(config.state != HaState::Fenced)
    }

    /// Host status for external health reporting.
    pub async fn host_status(&self, resource_id: Uuid) -> HostStatus {
        match self.repo.find(resource_id, ResourceType::Host).await {
            Some(config) => config.state.host_status(),
            None => HostStatus::Unknown,
        }
    }

    // ------------------------------------------------------------------
    // Poll loop
    // ------------------------------------------------------------------

    /// Run the background poll until stopped.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        loop {
            interval.tick().await;
            if self.stopped.load(Ordering::SeqCst) {
                tracing::info!("HA manager poll loop stopped");
                break;
            }
            self.poll_once().await;
        }
    }

    /// Stop the poll loop and release this controller's ownership so a
    /// standby can adopt the resources.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let released = self.repo.release_ownership(self.controller_id).await;
        tracing::info!(released, "HA manager stopped, ownership released");
    }

    /// One poll tick over every HA configuration. Public so tests can step
    /// the manager deterministically.
    pub async fn poll_once(&self) {
        let configs = self.repo.list().await;
        tracing::debug!(count = configs.len(), "HA poll tick");
        for config in configs {
            let resource_id = config.resource_id;
            if let Err(e) = self.process_config(config).await {
                tracing::error!(
                    resource_id = %resource_id,
                    error = %e,
                    "error processing HA configuration"
                );
            }
        }
    }

    async fn process_config(&self, config: HaConfig) -> anyhow::Result<()> {
        // Ownership guard: never race another controller for its resources.
        if let Some(owner) = config.owner {
            if owner != self.controller_id {
                tracing::debug!(
                    resource_id = %config.resource_id,
                    owner = %owner,
                    "skipping resource owned by another controller"
                );
                return Ok(());
            }
        }

        // Resource validation: a vanished host is disabled, not polled.
        let resource = match self.directory.find_host(config.resource_id).await {
            Some(r) if !r.removed => r,
            _ => {
                if config.state != HaState::Disabled {
                    tracing::warn!(
                        resource_id = %config.resource_id,
                        "resource missing from directory, disabling HA"
                    );
                    let _ = self.disable_ha(config.resource_id, config.resource_type).await;
                }
                return Ok(());
            }
        };

        // Enabled gates: per-resource flag plus cluster/zone flags.
        let zone_enabled = match resource.zone_id {
            Some(zone) => self.directory.is_ha_enabled_for_zone(zone).await,
            None => true,
        };
        let cluster_enabled = match resource.cluster_id {
            Some(cluster) => self.directory.is_ha_enabled_for_cluster(cluster).await,
            None => true,
        };
        let mut config = config;
        if !config.enabled || !zone_enabled || !cluster_enabled {
            if config.state != HaState::Disabled
                && self.apply_event(&config, HaEvent::Disabled, None).await
            {
                self.counters.purge(config.resource_id, config.resource_type);
            }
            return Ok(());
        } else if config.state == HaState::Disabled {
            if !self.apply_event(&config, HaEvent::Enabled, None).await {
                return Ok(());
            }
            config = match self.repo.find(config.resource_id, config.resource_type).await {
                Some(c) => c,
                None => return Ok(()),
            };
        }

        // Provider resolution and eligibility gate.
        let Some(provider) = self.providers.get(&config.provider) else {
            tracing::warn!(
                resource_id = %config.resource_id,
                provider = %config.provider,
                "configured provider is not registered"
            );
            return Ok(());
        };
        if !provider.is_eligible(&resource).await {
            if config.state != HaState::Ineligible {
                self.apply_event(&config, HaEvent::Ineligible, None).await;
            }
            return Ok(());
        } else if config.state == HaState::Ineligible {
            if !self.apply_event(&config, HaEvent::Eligible, None).await {
                return Ok(());
            }
            config = match self.repo.find(config.resource_id, config.resource_type).await {
                Some(c) => c,
                None => return Ok(()),
            };
        }

        let counter = self
            .counters
            .get_or_create(config.resource_id, config.resource_type);
        let settings = provider.settings(&resource);
        let now = Utc::now();
        let ctx = Some((&resource, &provider));

        if HaStateMachine::polls_health(config.state) {
            self.dispatch_health_check(&resource, &provider).await;
        }

        match config.state {
            HaState::Suspect => {
                if counter.can_perform_activity_check(now, settings.max_activity_check_interval) {
                    self.apply_event(&config, HaEvent::PerformActivityCheck, ctx)
                        .await;
                }
            }
            HaState::Checking => {
                // A check whose task timed out leaves the state untouched;
                // re-drive it at the activity-check cadence.
                if counter.can_perform_activity_check(now, settings.max_activity_check_interval) {
                    self.dispatch_activity_check(&resource, &provider).await;
                }
            }
            HaState::Degraded => {
                if counter.should_recheck_activity(now, settings.max_degraded_wait) {
                    self.apply_event(&config, HaEvent::PeriodicRecheckResourceActivity, ctx)
                        .await;
                }
            }
            HaState::Recovering => {
                if counter.recovery_attempts() >= settings.max_recovery_attempts {
                    self.apply_event(&config, HaEvent::RecoveryOperationThresholdExceeded, ctx)
                        .await;
                } else {
                    self.apply_event(&config, HaEvent::RetryRecovery, ctx).await;
                }
            }
            HaState::Recovered => {
                counter.mark_recovery_started(now);
                if counter.can_exit_recovery(now, settings.recovery_wait_period)
                    && self
                        .apply_event(&config, HaEvent::RecoveryWaitPeriodTimeout, ctx)
                        .await
                {
                    counter.mark_recovery_completed();
                }
            }
            HaState::Fencing => {
                if counter.fence_attempts() >= settings.max_fence_attempts {
                    self.apply_event(&config, HaEvent::FenceOperationThresholdExceeded, ctx)
                        .await;
                } else if counter.can_attempt_fencing() {
                    self.apply_event(&config, HaEvent::RetryFencing, ctx).await;
                }
            }
            _ => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transition application and side effects
    // ------------------------------------------------------------------

    /// Apply an event through the CAS-guarded repository and dispatch the
    /// side effect for the new state. Returns false when the table rejects
    /// the event or the CAS loses a race; a lost race is silently dropped
    /// and the next poll re-evaluates.
    async fn apply_event(
        &self,
        config: &HaConfig,
        event: HaEvent,
        ctx: Option<(&Resource, &Arc<dyn HaProvider>)>,
    ) -> bool {
        let from = config.state;
        let to = match HaStateMachine::next_state(from, event) {
            Ok(to) => to,
            Err(e) => {
                tracing::warn!(
                    resource_id = %config.resource_id,
                    error = %e,
                    "event rejected by transition table"
                );
                return false;
            }
        };

        let applied = self
            .repo
            .compare_and_swap_state(config.resource_id, config.resource_type, from, to)
            .await;
        if !applied {
            tracing::debug!(
                resource_id = %config.resource_id,
                from = ?from,
                to = ?to,
                event = ?event,
                "transition lost the race, dropping"
            );
            return false;
        }

        tracing::info!(
            resource_id = %config.resource_id,
            from = ?from,
            to = ?to,
            event = ?event,
            "HA state transitioned"
        );
        self.run_side_effect(config, event, to, ctx).await;
        true
    }

    fn run_side_effect<'a>(
        &'a self,
        config: &'a HaConfig,
        event: HaEvent,
        to: HaState,
        ctx: Option<(&'a Resource, &'a Arc<dyn HaProvider>)>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
        let counter = self
            .counters
            .get_or_create(config.resource_id, config.resource_type);

        match to {
            HaState::Suspect => {
                counter.mark_suspect(Utc::now());
            }
            HaState::Available => {
                counter.reset();
            }
            HaState::Disabled => {
                self.counters.purge(config.resource_id, config.resource_type);
            }
            HaState::Checking => {
                if let Some((resource, provider)) = ctx {
                    self.dispatch_activity_check(resource, provider).await;
                }
            }
            HaState::Recovering => {
                if let Some((resource, provider)) = ctx {
                    self.dispatch_recovery(resource, provider).await;
                }
            }
            HaState::Fencing => {
                if event == HaEvent::FenceOperationThresholdExceeded {
                    if counter.mark_threshold_alerted() {
                        self.alerts
                            .raise(Alert::new(
                                AlertSeverity::Critical,
                                Some(config.resource_id),
                                "fence attempts exhausted",
                                format!(
                                    "resource {} exhausted its fence attempts and requires \
                                     operator intervention; it remains in Fencing",
                                    config.resource_id
                                ),
                            ))
                            .await;
                    }
                } else if let Some((resource, provider)) = ctx {
                    self.dispatch_fence(resource, provider).await;
                }
            }
            HaState::Fenced => {
                self.alerts
                    .raise(Alert::new(
                        AlertSeverity::Warning,
                        Some(config.resource_id),
                        "host fenced",
                        format!(
                            "resource {} was fenced; its workloads are safe to restart elsewhere",
                            config.resource_id
                        ),
                    ))
                    .await;
            }
            _ => {}
        }
        })
    }

    // ------------------------------------------------------------------
    // Task dispatch and result processing
    // ------------------------------------------------------------------

    async fn dispatch_health_check(&self, resource: &Resource, provider: &Arc<dyn HaProvider>) {
        let mgr = self.clone();
        let resource = resource.clone();
        let provider = provider.clone();
        let timeout = provider.settings(&resource).health_check_timeout;
        self.health_pool
            .submit(Box::pin(async move {
                match tokio::time::timeout(timeout, provider.is_healthy(&resource)).await {
                    Ok(Ok(healthy)) => mgr.on_health_check_result(&resource, healthy).await,
                    Ok(Err(e)) => {
                        tracing::debug!(
                            resource_id = %resource.id,
                            error = %e,
                            "health check inconclusive"
                        );
                    }
                    Err(_) => {
                        tracing::debug!(
                            resource_id = %resource.id,
                            timeout = ?timeout,
                            "health check timed out, inconclusive"
                        );
                    }
                }
            }))
            .await;
    }

    async fn on_health_check_result(&self, resource: &Resource, healthy: bool) {
        let Some(config) = self
            .repo
            .find(resource.id, resource.resource_type())
            .await
        else {
            return;
        };
        if healthy {
            if matches!(
                config.state,
                HaState::Suspect | HaState::Degraded | HaState::Fenced
            ) {
                self.apply_event(&config, HaEvent::HealthCheckPassed, None)
                    .await;
            }
        } else if HaStateMachine::polls_health(config.state) {
            self.apply_event(&config, HaEvent::HealthCheckFailed, None)
                .await;
        }
    }

    async fn dispatch_activity_check(&self, resource: &Resource, provider: &Arc<dyn HaProvider>) {
        let counter = self
            .counters
            .get_or_create(resource.id, resource.resource_type());
        let since = counter.suspect_since().unwrap_or_else(Utc::now);
        let settings = provider.settings(resource);

        let mgr = self.clone();
        let resource = resource.clone();
        let provider = provider.clone();
        self.activity_pool
            .submit(Box::pin(async move {
                let outcome = tokio::time::timeout(
                    settings.activity_check_timeout,
                    provider.has_activity(&resource, since),
                )
                .await;
                match outcome {
                    Ok(Ok(verdict)) => {
                        mgr.on_activity_check_result(&resource, &provider, verdict)
                            .await;
                    }
                    Ok(Err(e)) => {
                        // Missing evidence is a refusal to certify, not a
                        // failed sample.
                        tracing::warn!(
                            resource_id = %resource.id,
                            error = %e,
                            "activity check inconclusive"
                        );
                    }
                    Err(_) => {
                        tracing::debug!(
                            resource_id = %resource.id,
                            timeout = ?settings.activity_check_timeout,
                            "activity check timed out, inconclusive"
                        );
                    }
                }
            }))
            .await;
    }

    async fn on_activity_check_result(
        &self,
        resource: &Resource,
        provider: &Arc<dyn HaProvider>,
        verdict: LivenessVerdict,
    ) {
        let Some(config) = self
            .repo
            .find(resource.id, resource.resource_type())
            .await
        else {
            return;
        };
        let counter = self
            .counters
            .get_or_create(resource.id, resource.resource_type());
        let settings = provider.settings(resource);
        let now = Utc::now();
        let ctx = Some((resource, provider));

        match verdict {
            LivenessVerdict::Alive => {
                counter.record_activity_check(now, true);
                self.apply_event(&config, HaEvent::ActivityDetected, ctx).await;
            }
            LivenessVerdict::Dead => {
                counter.record_activity_check(now, false);
                if self
                    .apply_event(&config, HaEvent::NoActivityDetected, ctx)
                    .await
                    && counter.failure_ratio_exceeded(
                        settings.max_activity_checks,
                        settings.activity_check_failure_ratio,
                    )
                {
                    if let Some(fresh) = self
                        .repo
                        .find(resource.id, resource.resource_type())
                        .await
                    {
                        self.apply_event(&fresh, HaEvent::ActivityCheckFailureRatioExceeded, ctx)
                            .await;
                    }
                }
            }
            LivenessVerdict::Undetermined => {
                // No sample recorded, no transition: the resource stays in
                // its current state and the poll re-drives the check.
                tracing::debug!(
                    resource_id = %resource.id,
                    "activity verdict undetermined, leaving state untouched"
                );
            }
        }
    }

    async fn dispatch_recovery(&self, resource: &Resource, provider: &Arc<dyn HaProvider>) {
        let counter = self
            .counters
            .get_or_create(resource.id, resource.resource_type());
        let settings = provider.settings(resource);
        if counter.recovery_attempts() >= settings.max_recovery_attempts {
            tracing::debug!(
                resource_id = %resource.id,
                "recovery attempts exhausted, not dispatching"
            );
            return;
        }
        let ticket = TaskTicket::new();
        if !counter.try_claim_recovery(ticket.clone()) {
            tracing::debug!(
                resource_id = %resource.id,
                "recovery task already outstanding, not dispatching"
            );
            return;
        }
        let attempt = counter.incr_recovery_attempts();
        tracing::info!(resource_id = %resource.id, attempt, "dispatching recovery task");

        let mgr = self.clone();
        let resource = resource.clone();
        let provider = provider.clone();
        self.recovery_pool
            .submit(Box::pin(async move {
                let outcome =
                    tokio::time::timeout(settings.recovery_timeout, provider.recover(&resource))
                        .await;
                ticket.finish();
                match outcome {
                    Ok(Ok(true)) => mgr.on_recovery_succeeded(&resource, &provider).await,
                    Ok(Ok(false)) => {
                        tracing::warn!(resource_id = %resource.id, "recovery attempt failed");
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(resource_id = %resource.id, error = %e, "recovery error");
                    }
                    Err(_) => {
                        tracing::debug!(
                            resource_id = %resource.id,
                            timeout = ?settings.recovery_timeout,
                            "recovery timed out, outcome discarded"
                        );
                    }
                }
            }))
            .await;
    }

    async fn on_recovery_succeeded(&self, resource: &Resource, provider: &Arc<dyn HaProvider>) {
        let Some(config) = self
            .repo
            .find(resource.id, resource.resource_type())
            .await
        else {
            return;
        };
        if config.state == HaState::Recovering {
            self.apply_event(&config, HaEvent::RecoverySucceeded, Some((resource, provider)))
                .await;
        }
    }

    async fn dispatch_fence(&self, resource: &Resource, provider: &Arc<dyn HaProvider>) {
        let counter = self
            .counters
            .get_or_create(resource.id, resource.resource_type());
        let settings = provider.settings(resource);
        let ticket = TaskTicket::new();
        if !counter.try_claim_fence(ticket.clone()) {
            tracing::debug!(
                resource_id = %resource.id,
                "fence task already outstanding, not dispatching"
            );
            return;
        }
        let attempt = counter.incr_fence_attempts();
        tracing::warn!(resource_id = %resource.id, attempt, "dispatching fence task");

        let mgr = self.clone();
        let resource = resource.clone();
        let provider = provider.clone();
        self.fence_pool
            .submit(Box::pin(async move {
                let outcome =
                    tokio::time::timeout(settings.fence_timeout, provider.fence(&resource)).await;
                ticket.finish();
                match outcome {
                    Ok(Ok(true)) => mgr.on_fence_succeeded(&resource, &provider).await,
                    Ok(Ok(false)) => {
                        tracing::warn!(resource_id = %resource.id, "fence attempt failed");
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(resource_id = %resource.id, error = %e, "fence error");
                    }
                    Err(_) => {
                        tracing::debug!(
                            resource_id = %resource.id,
                            timeout = ?settings.fence_timeout,
                            "fence timed out, outcome discarded"
                        );
                    }
                }
            }))
            .await;
    }

    async fn on_fence_succeeded(&self, resource: &Resource, provider: &Arc<dyn HaProvider>) {
        let Some(config) = self
            .repo
            .find(resource.id, resource.resource_type())
            .await
        else {
            return;
        };
        if config.state == HaState::Fencing {
            self.apply_event(&config, HaEvent::FenceSucceeded, Some((resource, provider)))
                .await;
        }
    }

    async fn push_agent_flag(&self, resource_id: Uuid, enabled: bool) {
        if let Some(resource) = self.directory.find_host(resource_id).await {
            if let Err(e) = self.agent.push_ha_state(&resource, enabled).await {
                tracing::warn!(
                    resource_id = %resource_id,
                    error = %e,
                    "failed to push HA flag to host agent"
                );
            }
        }
    }
}
