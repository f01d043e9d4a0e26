//! Host agent command channel
//!
//! Carries the small set of commands the HA engine pushes to host agents:
//! a cheap connectivity probe, the per-host HA flag, and the local
//! fail-safe reboot the heartbeat monitor may request for its own host.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::types::Resource;

#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Cheap connectivity probe against the host's agent.
    async fn ping(&self, resource: &Resource) -> bool;

    /// Push the resource's HA enabled flag to its agent so the host-side
    /// monitor can honor it. Fire-and-forget from the caller's perspective.
    async fn push_ha_state(&self, resource: &Resource, enabled: bool) -> Result<()>;

    /// Request a reboot of the local host. This is the heartbeat monitor's
    /// fail-safe when it cannot write to any pool: the host takes itself
    /// out rather than risk writing with a stale view. Never a remote action.
    async fn request_local_reboot(&self) -> Result<()>;
}
