//! Domain layer: pure HA business logic
//!
//! No I/O lives here. The transition table, the type vocabulary, and the
//! error taxonomy are all plain data and pure functions, which keeps the
//! riskiest logic (when is it legal to fence a host) unit-testable without
//! any runtime.

pub mod errors;
pub mod property_tests;
pub mod state_machine;
pub mod types;

pub use errors::{CheckKind, HaError, HaResult};
pub use state_machine::{HaEvent, HaState, HaStateMachine, InvalidTransition};
pub use types::{
    Alert, AlertSeverity, HostStatus, HypervisorKind, LivenessVerdict, Resource, ResourceState,
    ResourceType,
};
