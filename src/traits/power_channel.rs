//! Out-of-band power channel
//!
//! Abstraction over a host's out-of-band management interface (IPMI or
//! equivalent). Recovery and fencing go through this channel; it must work
//! when the host's own network stack is gone.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::types::Resource;

/// Last observed power state of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    On,
    Off,
    Unknown,
}

/// Power operations the channel can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerOperation {
    On,
    Off,
    Reset,
}

#[async_trait]
pub trait PowerChannel: Send + Sync {
    /// Whether out-of-band management is configured and enabled for the host.
    async fn is_enabled(&self, resource: &Resource) -> bool;

    async fn power_state(&self, resource: &Resource) -> Result<PowerState>;

    /// Execute a power operation. Returns `Ok(true)` when the device
    /// acknowledged the operation.
    async fn execute(&self, resource: &Resource, op: PowerOperation) -> Result<bool>;
}
