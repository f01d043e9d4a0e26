//! Centralized application configuration
//!
//! Single source of truth for daemon configuration: serde structs with
//! defaulted fields, environment-variable overrides, and validation.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::infrastructure::ha::manager::HaManagerConfig;
use crate::infrastructure::ha::provider::ProviderSettings;
use crate::infrastructure::heartbeat::monitor::HeartbeatMonitorConfig;
use crate::infrastructure::task_pool::TaskPoolConfig;

/// Default values for configuration
mod defaults {
    pub fn poll_interval_secs() -> u64 {
        30
    }
    pub fn heartbeat_interval_secs() -> u64 {
        60
    }
    pub fn heartbeat_max_tries() -> u32 {
        5
    }
    pub fn heartbeat_retry_delay_secs() -> u64 {
        10
    }
    pub fn pool_workers_health() -> usize {
        8
    }
    pub fn pool_queue_health() -> usize {
        128
    }
    pub fn pool_workers_activity() -> usize {
        4
    }
    pub fn pool_queue_activity() -> usize {
        64
    }
    pub fn pool_workers_recovery() -> usize {
        2
    }
    pub fn pool_queue_recovery() -> usize {
        32
    }
    pub fn pool_workers_fence() -> usize {
        2
    }
    pub fn pool_queue_fence() -> usize {
        32
    }
}

/// Configuration errors surfaced synchronously at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Manager-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSection {
    /// Seconds between background poll ticks.
    #[serde(default = "defaults::poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "defaults::pool_workers_health")]
    pub health_workers: usize,
    #[serde(default = "defaults::pool_queue_health")]
    pub health_queue: usize,
    #[serde(default = "defaults::pool_workers_activity")]
    pub activity_workers: usize,
    #[serde(default = "defaults::pool_queue_activity")]
    pub activity_queue: usize,
    #[serde(default = "defaults::pool_workers_recovery")]
    pub recovery_workers: usize,
    #[serde(default = "defaults::pool_queue_recovery")]
    pub recovery_queue: usize,
    #[serde(default = "defaults::pool_workers_fence")]
    pub fence_workers: usize,
    #[serde(default = "defaults::pool_queue_fence")]
    pub fence_queue: usize,
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: defaults::poll_interval_secs(),
            health_workers: defaults::pool_workers_health(),
            health_queue: defaults::pool_queue_health(),
            activity_workers: defaults::pool_workers_activity(),
            activity_queue: defaults::pool_queue_activity(),
            recovery_workers: defaults::pool_workers_recovery(),
            recovery_queue: defaults::pool_queue_recovery(),
            fence_workers: defaults::pool_workers_fence(),
            fence_queue: defaults::pool_queue_fence(),
        }
    }
}

impl ManagerSection {
    pub fn to_manager_config(&self) -> HaManagerConfig {
        HaManagerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            health_pool: TaskPoolConfig {
                workers: self.health_workers,
                queue_size: self.health_queue,
            },
            activity_pool: TaskPoolConfig {
                workers: self.activity_workers,
                queue_size: self.activity_queue,
            },
            recovery_pool: TaskPoolConfig {
                workers: self.recovery_workers,
                queue_size: self.recovery_queue,
            },
            fence_pool: TaskPoolConfig {
                workers: self.fence_workers,
                queue_size: self.fence_queue,
            },
        }
    }
}

/// Heartbeat-monitor settings for the local host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSection {
    #[serde(default = "defaults::heartbeat_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "defaults::heartbeat_max_tries")]
    pub max_write_tries: u32,
    #[serde(default = "defaults::heartbeat_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default)]
    pub reboot_on_heartbeat_failure: bool,
    /// Shared mount points to register as heartbeat pools at startup.
    #[serde(default)]
    pub pool_paths: Vec<PathBuf>,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_secs: defaults::heartbeat_interval_secs(),
            max_write_tries: defaults::heartbeat_max_tries(),
            retry_delay_secs: defaults::heartbeat_retry_delay_secs(),
            reboot_on_heartbeat_failure: false,
            pool_paths: Vec::new(),
        }
    }
}

impl HeartbeatSection {
    pub fn to_monitor_config(&self) -> HeartbeatMonitorConfig {
        HeartbeatMonitorConfig {
            interval: Duration::from_secs(self.interval_secs),
            max_write_tries: self.max_write_tries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            reboot_on_heartbeat_failure: self.reboot_on_heartbeat_failure,
        }
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub manager: ManagerSection,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    #[serde(default)]
    pub provider: ProviderSettings,
}

impl WardenConfig {
    /// Load configuration from the environment on top of defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = read_env_u64("WARDEN_POLL_INTERVAL_SECS")? {
            config.manager.poll_interval_secs = value;
        }
        if let Some(value) = read_env_u64("WARDEN_HEARTBEAT_INTERVAL_SECS")? {
            config.heartbeat.interval_secs = value;
        }
        if let Some(value) = read_env_u64("WARDEN_HEARTBEAT_RETRY_DELAY_SECS")? {
            config.heartbeat.retry_delay_secs = value;
        }
        if let Some(value) = read_env_u64("WARDEN_HEARTBEAT_MAX_TRIES")? {
            config.heartbeat.max_write_tries = value as u32;
        }
        if let Ok(value) = std::env::var("WARDEN_REBOOT_ON_HEARTBEAT_FAILURE") {
            config.heartbeat.reboot_on_heartbeat_failure =
                matches!(value.as_str(), "1" | "true" | "yes");
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate ranges and internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manager.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "manager.poll_interval_secs".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "heartbeat.interval_secs".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.heartbeat.max_write_tries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "heartbeat.max_write_tries".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let retry_budget =
            self.heartbeat.max_write_tries as u64 * self.heartbeat.retry_delay_secs;
        if retry_budget >= self.heartbeat.interval_secs * 2 {
            return Err(ConfigError::InvalidValue {
                key: "heartbeat.retry_delay_secs".to_string(),
                value: self.heartbeat.retry_delay_secs.to_string(),
                reason: "retry budget must not dwarf the heartbeat interval".to_string(),
            });
        }
        if self.provider.activity_check_failure_ratio <= 0.0
            || self.provider.activity_check_failure_ratio > 1.0
        {
            return Err(ConfigError::InvalidValue {
                key: "provider.activity_check_failure_ratio".to_string(),
                value: self.provider.activity_check_failure_ratio.to_string(),
                reason: "must be within (0, 1]".to_string(),
            });
        }
        if self.provider.max_recovery_attempts == 0 || self.provider.max_fence_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "provider.max_recovery_attempts".to_string(),
                value: "0".to_string(),
                reason: "attempt ceilings must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn read_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = WardenConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut config = WardenConfig::default();
        config.manager.poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn runaway_retry_budget_is_rejected() {
        let mut config = WardenConfig::default();
        config.heartbeat.interval_secs = 10;
        config.heartbeat.max_write_tries = 10;
        config.heartbeat.retry_delay_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn ratio_bounds_are_enforced() {
        let mut config = WardenConfig::default();
        config.provider.activity_check_failure_ratio = 0.0;
        assert!(config.validate().is_err());
        config.provider.activity_check_failure_ratio = 1.5;
        assert!(config.validate().is_err());
        config.provider.activity_check_failure_ratio = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sections_convert_to_component_configs() {
        let config = WardenConfig::default();
        let manager = config.manager.to_manager_config();
        assert_eq!(manager.poll_interval, Duration::from_secs(30));
        assert_eq!(manager.health_pool.workers, 8);

        let monitor = config.heartbeat.to_monitor_config();
        assert_eq!(monitor.interval, Duration::from_secs(60));
        assert_eq!(monitor.max_write_tries, 5);
    }
}
