//! # Flow Core Configuration
//!
//! Configuration for the store connection, the health monitor and the lifecycle
//! service. Every field has a default so an empty (or absent) configuration file
//! yields a working setup; YAML files and `FLOW_CORE__*` environment variables layer
//! on top. See [`ConfigManager`] for the lookup order.
//!
//! ```rust,no_run
//! use flow_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let interval = manager.config().health_monitor.check_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/flow-core.yaml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowCoreConfig {
    /// Record store connection and pooling
    pub database: DatabaseConfig,

    /// Stuck-flow detection
    pub health_monitor: HealthMonitorConfig,

    /// Lifecycle operation settings
    pub lifecycle: LifecycleConfig,
}

impl FlowCoreConfig {
    /// Reject values that would make the monitor spin or the pool unusable
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "pool must allow at least one connection",
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigurationError::invalid_value(
                "database.min_connections",
                self.database.min_connections.to_string(),
                "must not exceed max_connections",
            ));
        }
        if self.health_monitor.check_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "health_monitor.check_interval_seconds",
                "0",
                "interval must be positive",
            ));
        }
        if self.health_monitor.stuck_threshold_minutes == 0 {
            return Err(ConfigurationError::invalid_value(
                "health_monitor.stuck_threshold_minutes",
                "0",
                "threshold must be positive",
            ));
        }
        if self.health_monitor.max_flows_per_tick == 0 {
            return Err(ConfigurationError::invalid_value(
                "health_monitor.max_flows_per_tick",
                "0",
                "tick batch must be positive",
            ));
        }
        Ok(())
    }
}

/// Database connection and pooling configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    /// Apply `migrations/` on startup
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/flow_core_development".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            run_migrations: false,
        }
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthMonitorConfig {
    pub enabled: bool,
    pub check_interval_seconds: u64,
    /// A non-terminal flow idle for longer than this is considered stuck
    pub stuck_threshold_minutes: u64,
    pub max_flows_per_tick: usize,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: 300,
            stuck_threshold_minutes: 10,
            max_flows_per_tick: 500,
        }
    }
}

impl HealthMonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn stuck_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stuck_threshold_minutes as i64)
    }
}

/// Lifecycle service configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Run the consistency check before resume/retry and refuse on hard issues
    pub require_consistency_for_resume: bool,
    /// Deletion type recorded in audit rows
    pub deletion_type: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            require_consistency_for_resume: true,
            deletion_type: crate::models::deletion_audit::SOFT_DELETE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FlowCoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.health_monitor.check_interval(), Duration::from_secs(300));
        assert_eq!(config.health_monitor.stuck_threshold(), chrono::Duration::minutes(10));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = FlowCoreConfig::default();
        config.health_monitor.check_interval_seconds = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("check_interval_seconds"));
    }

    #[test]
    fn test_min_connections_bounded_by_max() {
        let mut config = FlowCoreConfig::default();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_falls_back_to_defaults() {
        let config: FlowCoreConfig = serde_json::from_value(serde_json::json!({
            "health_monitor": { "stuck_threshold_minutes": 30 }
        }))
        .unwrap();
        assert_eq!(config.health_monitor.stuck_threshold_minutes, 30);
        assert_eq!(config.health_monitor.check_interval_seconds, 300);
        assert_eq!(config.database, DatabaseConfig::default());
    }
}
