//! Configuration for the ingestion pipeline.
//!
//! Loaded in priority order: environment variables (prefixed `INLET_`),
//! then `inlet.toml`, then built-in defaults. The pipeline works
//! out-of-the-box with the defaults; embedders override per deployment.

use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, Result},
    pipeline::PipelineConfig,
    retry,
};

const CONFIG_FILE: &str = "inlet.toml";
const ENV_PREFIX: &str = "INLET_";

/// Deployment configuration with defaults, file, and environment overrides.
///
/// # Example
///
/// ```no_run
/// use inlet_pipeline::config::Config;
///
/// let config = Config::load().expect("load configuration");
/// println!("envelope store at {}", config.database_path);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path of the SQLite envelope store.
    ///
    /// Environment variable: `INLET_DATABASE_PATH`
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Maximum number of connections in the store's pool.
    ///
    /// Environment variable: `INLET_DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// Maximum retries per envelope after the initial attempt.
    ///
    /// Environment variable: `INLET_MAX_RETRIES`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Seconds between stalled-queue health checks.
    ///
    /// Environment variable: `INLET_HEALTH_INTERVAL_SECS`
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// Hours to keep completed envelopes before pruning.
    ///
    /// Environment variable: `INLET_RETENTION_HOURS`
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,

    /// Seconds to wait for an active drain pass during shutdown.
    ///
    /// Environment variable: `INLET_SHUTDOWN_TIMEOUT_SECS`
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Config {
    /// Loads configuration from defaults, `inlet.toml`, and `INLET_*`
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` if extraction or validation
    /// fails.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX));

        let config: Self =
            figment.extract().map_err(|e| PipelineError::configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Converts to the runtime pipeline configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_retries: self.max_retries,
            health_interval: Duration::from_secs(self.health_interval_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }

    /// Validates configuration values.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` on the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.is_empty() {
            return Err(PipelineError::configuration("database_path must not be empty"));
        }
        if self.database_max_connections == 0 {
            return Err(PipelineError::configuration(
                "database_max_connections must be greater than 0",
            ));
        }
        if self.health_interval_secs == 0 {
            return Err(PipelineError::configuration(
                "health_interval_secs must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            database_max_connections: default_database_max_connections(),
            max_retries: default_max_retries(),
            health_interval_secs: default_health_interval_secs(),
            retention_hours: default_retention_hours(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_database_path() -> String {
    "inlet.db".to_string()
}

fn default_database_max_connections() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    retry::DEFAULT_MAX_RETRIES
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_retention_hours() -> u32 {
    72
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, env, sync::Mutex};

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct TestEnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        originals: HashMap<String, Option<String>>,
    }

    impl TestEnvGuard {
        fn new() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self { _lock: lock, originals: HashMap::new() }
        }

        fn set_var(&mut self, key: &str, value: &str) {
            self.originals.entry(key.to_string()).or_insert_with(|| env::var(key).ok());
            env::set_var(key, value);
        }
    }

    impl Drop for TestEnvGuard {
        fn drop(&mut self) {
            for (key, original) in &self.originals {
                match original {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.health_interval_secs, 30);
    }

    #[test]
    fn env_overrides_take_priority() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("INLET_DATABASE_PATH", "/var/lib/inlet/events.db");
        guard.set_var("INLET_MAX_RETRIES", "8");
        guard.set_var("INLET_RETENTION_HOURS", "12");

        let config = Config::load().expect("load with env overrides");
        assert_eq!(config.database_path, "/var/lib/inlet/events.db");
        assert_eq!(config.max_retries, 8);
        assert_eq!(config.retention_hours, 12);
        // Untouched values fall back to defaults.
        assert_eq!(config.database_max_connections, 5);
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut config = Config::default();
        config.database_path = String::new();
        assert!(config.validate().is_err());

        config = Config::default();
        config.database_max_connections = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.health_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn pipeline_config_conversion() {
        let mut config = Config::default();
        config.max_retries = 3;
        config.health_interval_secs = 7;
        config.shutdown_timeout_secs = 11;

        let pipeline_config = config.pipeline_config();
        assert_eq!(pipeline_config.max_retries, 3);
        assert_eq!(pipeline_config.health_interval, Duration::from_secs(7));
        assert_eq!(pipeline_config.shutdown_timeout, Duration::from_secs(11));
    }
}
