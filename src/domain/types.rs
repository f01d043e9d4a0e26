// Shared type definitions for the HA subsystem
//
// This module contains pure data types with no I/O or side effects.
// All types are serializable for persistence and reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of resource that can be placed under HA management.
///
/// Hosts are the only kind this control plane drives today; the type exists
/// so per-resource bookkeeping is keyed by (id, type) rather than id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Host,
}

/// Hypervisor kind of a managed host.
///
/// Used to match a host against a provider's supported sub-type at
/// configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HypervisorKind {
    Kvm,
    Lxc,
    Unknown,
}

/// Administrative state of a host, as reported by the resource directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    Enabled,
    Maintenance,
    Disabled,
}

/// Snapshot of a managed host as seen by the resource directory.
///
/// The HA subsystem only reads these; cluster topology owns them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub name: String,
    /// Address the host tags its heartbeat records with.
    pub address: String,
    pub cluster_id: Option<Uuid>,
    pub zone_id: Option<Uuid>,
    pub hypervisor: HypervisorKind,
    pub state: ResourceState,
    /// Set once the host has been removed from the inventory.
    pub removed: bool,
}

impl Resource {
    pub fn resource_type(&self) -> ResourceType {
        ResourceType::Host
    }

    pub fn in_maintenance(&self) -> bool {
        self.state == ResourceState::Maintenance
    }

    pub fn admin_disabled(&self) -> bool {
        self.state == ResourceState::Disabled
    }
}

/// Host status derived purely from the current HA state, for external
/// health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostStatus {
    Up,
    Down,
    Disconnected,
    Unknown,
}

/// Verdict of a liveness or activity check.
///
/// `Undetermined` is the refusal case: the checker had no (or not enough)
/// storage evidence and will not certify death.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LivenessVerdict {
    Alive,
    Dead,
    Undetermined,
}

impl LivenessVerdict {
    pub fn is_alive(&self) -> bool {
        matches!(self, LivenessVerdict::Alive)
    }

    /// Only a definite `Dead` verdict may justify a destructive action.
    pub fn certifies_death(&self) -> bool {
        matches!(self, LivenessVerdict::Dead)
    }
}

/// Severity of an operator-visible alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Fire-and-forget notification handed to the alerting sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub resource_id: Option<Uuid>,
    pub subject: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        severity: AlertSeverity,
        resource_id: Option<Uuid>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            resource_id,
            subject: subject.into(),
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}
