// Library exports for warden
//
// The HA engine, heartbeat subsystem, and collaborator traits are all public
// so the surrounding system can embed the control plane and supply its own
// directory, power, agent, and alerting implementations.

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod providers;
pub mod repositories;
pub mod traits;

// Re-export the types most embedders need
pub use config::WardenConfig;
pub use domain::{
    Alert, AlertSeverity, HaError, HaEvent, HaState, HaStateMachine, HostStatus, HypervisorKind,
    LivenessVerdict, Resource, ResourceState, ResourceType,
};
pub use infrastructure::ha::{HaManager, HaManagerConfig, HaProvider, ProviderRegistry, ProviderSettings};
pub use infrastructure::heartbeat::{
    ActivityChecker, DirHeartbeatPool, HeartbeatMonitor, HeartbeatMonitorConfig, HeartbeatPool,
    LivenessChecker, MemoryHeartbeatPool, PoolKind,
};
pub use repositories::{HaConfig, HaConfigRepository, InMemoryHaConfigRepository};
