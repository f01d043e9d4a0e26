//! Repositories: persisted HA configuration records
//!
//! The trait boundary allows swapping the in-memory implementation for a
//! database-backed one without touching the manager; all state transitions
//! go through `compare_and_swap_state` regardless of backend.

pub mod ha_config;

pub use ha_config::{HaConfig, HaConfigRepository, InMemoryHaConfigRepository};
