//! Domain errors for the HA subsystem
//!
//! Typed errors replace generic `anyhow::Result` at the decision boundary:
//! the manager routes on these variants (inconclusive vs. failed vs. skip),
//! so they carry enough structure to act on, not just display.

use std::time::Duration;
use uuid::Uuid;

use crate::domain::types::ResourceType;

/// Result type for HA domain operations
pub type HaResult<T> = Result<T, HaError>;

/// Which probe a timeout or inconclusive verdict belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Health,
    Activity,
    Liveness,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckKind::Health => write!(f, "health"),
            CheckKind::Activity => write!(f, "activity"),
            CheckKind::Liveness => write!(f, "liveness"),
        }
    }
}

/// Error taxonomy of the HA engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HaError {
    /// Resource is not configured correctly for HA; not retryable until fixed.
    #[error("resource {resource_id} is not eligible for HA: {reason}")]
    Eligibility { resource_id: Uuid, reason: String },

    /// A check did not complete in time. Inconclusive, never a failure.
    #[error("{kind} check timed out after {timeout:?} for resource {resource_id}")]
    CheckTimeout {
        resource_id: Uuid,
        kind: CheckKind,
        timeout: Duration,
    },

    /// Remote recovery action failed or its channel was unavailable.
    #[error("recovery failed for resource {resource_id}: {reason}")]
    Recovery { resource_id: Uuid, reason: String },

    /// Remote fence action failed or its channel was unavailable.
    #[error("fence failed for resource {resource_id}: {reason}")]
    Fence { resource_id: Uuid, reason: String },

    /// Another controller owns this resource; skip, not an error condition.
    #[error("resource {resource_id} is owned by controller {owner}")]
    OwnershipConflict { resource_id: Uuid, owner: Uuid },

    /// A deadness verdict was requested with no heartbeat pools to consult.
    #[error("no heartbeat evidence for resource {resource_id}; refusing to certify death")]
    InsufficientEvidence { resource_id: Uuid },

    /// No HA configuration exists for the resource.
    #[error("no HA configuration for resource {resource_id} ({resource_type:?})")]
    UnknownResource {
        resource_id: Uuid,
        resource_type: ResourceType,
    },

    /// Provider name does not resolve in the registry.
    #[error("unknown HA provider: {name}")]
    UnknownProvider { name: String },

    /// Provider's hypervisor sub-type does not match the resource's.
    #[error("provider {provider} is incompatible with resource {resource_id}: {reason}")]
    IncompatibleProvider {
        provider: String,
        resource_id: Uuid,
        reason: String,
    },
}

impl HaError {
    /// Whether the same operation may legitimately succeed on a later attempt
    /// without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HaError::CheckTimeout { .. }
                | HaError::Recovery { .. }
                | HaError::Fence { .. }
                | HaError::InsufficientEvidence { .. }
        )
    }

    /// Whether the error means "no verdict", as opposed to a definite failure.
    /// Inconclusive outcomes must never advance the state machine.
    pub fn is_inconclusive(&self) -> bool {
        matches!(
            self,
            HaError::CheckTimeout { .. } | HaError::InsufficientEvidence { .. }
        )
    }
}
