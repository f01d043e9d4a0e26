//! Storage-heartbeat subsystem
//!
//! The subsystem that backs the "is this host actually dead" decision:
//! - **pool**: one shared-storage backend a host writes liveness records to
//! - **monitor**: the per-host loop that keeps those records fresh
//! - **checker**: reads records back and renders liveness/activity verdicts

pub mod checker;
pub mod monitor;
pub mod pool;

pub use checker::{ActivityChecker, LivenessChecker};
pub use monitor::{HeartbeatMonitor, HeartbeatMonitorConfig};
pub use pool::{
    DirHeartbeatPool, HeartbeatPool, HeartbeatRecord, MemoryHeartbeatPool, PoolKind, PoolSnapshot,
};
