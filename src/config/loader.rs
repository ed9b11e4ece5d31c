//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered in this order, later
//! sources winning:
//!
//! 1. built-in defaults
//! 2. `<config dir>/flow-core.yaml`
//! 3. `<config dir>/flow-core.<environment>.yaml`
//! 4. `FLOW_CORE__<SECTION>__<KEY>` environment variables
//!
//! Both files are optional.

use super::error::ConfigResult;
use super::FlowCoreConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const CONFIG_FILE_STEM: &str = "flow-core";
const ENV_PREFIX: &str = "FLOW_CORE";

/// Loaded configuration plus the context it was loaded from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: FlowCoreConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_sources(config_dir, environment, None)
    }

    /// Same as [`load_from_directory_with_env`](Self::load_from_directory_with_env) but
    /// reads overrides from `env_overrides` instead of the process environment
    pub fn load_with_sources(
        config_dir: Option<PathBuf>,
        environment: &str,
        env_overrides: Option<config::Map<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);
        if !config_directory.exists() {
            debug!(
                directory = %config_directory.display(),
                "Configuration directory missing, continuing with defaults and environment"
            );
        }

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::build(&config_directory, environment, env_overrides)?;
        config.validate()?;

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&Self::sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = environment,
            monitor_enabled = config.health_monitor.enabled,
            check_interval_seconds = config.health_monitor.check_interval_seconds,
            stuck_threshold_minutes = config.health_monitor.stuck_threshold_minutes,
            "🔧 CONFIG: Flow core configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration
    pub fn from_config(config: FlowCoreConfig, environment: impl Into<String>) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.into(),
            config_directory: PathBuf::from("config"),
        }))
    }

    fn build(
        config_directory: &Path,
        environment: &str,
        env_overrides: Option<config::Map<String, String>>,
    ) -> ConfigResult<FlowCoreConfig> {
        let base_file = config_directory.join(format!("{CONFIG_FILE_STEM}.yaml"));
        let environment_file = config_directory.join(format!("{CONFIG_FILE_STEM}.{environment}.yaml"));

        let environment_source = Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .source(env_overrides);

        let settings = Config::builder()
            .add_source(File::from(base_file.as_path()).required(false))
            .add_source(File::from(environment_file.as_path()).required(false))
            .add_source(environment_source)
            .build()?;

        Ok(settings.try_deserialize::<FlowCoreConfig>()?)
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &FlowCoreConfig {
        &self.config
    }

    /// Sanitized configuration for debugging output
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect current environment: FLOW_CORE_ENV || APP_ENV || 'development'
    pub fn detect_environment() -> String {
        env::var("FLOW_CORE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        if let Ok(dir) = env::var("FLOW_CORE_CONFIG_DIR") {
            return PathBuf::from(dir);
        }
        PathBuf::from("config")
    }

    fn sanitize_config_for_logging(config: &FlowCoreConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);
        let sensitive_patterns = ["password", "secret", "token", "key", "url"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns.iter().any(|pattern| key_lower.contains(pattern));

                    if is_sensitive {
                        let masked = match &*val {
                            serde_json::Value::String(s) if s.is_empty() => "[EMPTY]".to_string(),
                            serde_json::Value::String(s) if s.chars().count() > 4 => {
                                let head: String = s.chars().take(2).collect();
                                let mut tail: Vec<char> = s.chars().rev().take(2).collect();
                                tail.reverse();
                                format!("[MASKED: {head}***{}]", tail.into_iter().collect::<String>())
                            }
                            _ => "[MASKED]".to_string(),
                        };
                        *val = serde_json::Value::String(masked);
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}
