//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered, later ones winning:
//!
//! 1. `<config_dir>/orderflow.toml`
//! 2. `<config_dir>/orderflow.<environment>.toml`
//! 3. `ORDERFLOW__<SECTION>__<FIELD>` environment variables
//! 4. `DATABASE_URL`, which replaces `database.url`
//!
//! Missing files are skipped; built-in defaults fill any field no source sets.

use super::error::{ConfigResult, ConfigurationError};
use super::OrderflowConfig;
use config::{Config, Environment, File};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "ORDERFLOW";
const ENV_SEPARATOR: &str = "__";
const BASE_FILE_STEM: &str = "orderflow";

/// Loaded configuration together with the environment it was resolved for
#[derive(Debug)]
pub struct ConfigManager {
    config: OrderflowConfig,
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
        let variables: HashMap<String, String> = std::env::vars().collect();
        Self::load_with_variables(config_dir, environment, variables)
    }

    /// Load configuration using an explicit variable map instead of the process environment.
    ///
    /// This is useful for testing without modifying global environment variables.
    pub fn load_with_variables(
        config_dir: Option<PathBuf>,
        environment: &str,
        variables: HashMap<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            config_directory = %config_directory.display(),
            "Loading configuration"
        );

        let mut config = Self::load_and_merge_config(&config_directory, environment, &variables)?;

        if let Some(url) = variables.get("DATABASE_URL").filter(|url| !url.is_empty()) {
            config.database.url = url.clone();
        }

        config.validate()?;

        info!(
            environment = %environment,
            database_url = %sanitize_database_url(&config.database.url),
            scheduler_enabled = config.scheduler.enabled,
            job_limit = config.scheduler.job_limit,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration
    pub fn from_config(config: OrderflowConfig, environment: &str) -> Arc<ConfigManager> {
        Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        })
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &OrderflowConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Current environment from `ORDERFLOW_ENV`, then `APP_ENV`, defaulting to development
    pub fn detect_environment() -> String {
        std::env::var("ORDERFLOW_ENV")
            .or_else(|_| std::env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        std::env::var("ORDERFLOW_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
        variables: &HashMap<String, String>,
    ) -> ConfigResult<OrderflowConfig> {
        let base_file = config_directory.join(format!("{BASE_FILE_STEM}.toml"));
        let environment_file =
            config_directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        let environment_variables: HashMap<String, String> = variables
            .iter()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let merged = Config::builder()
            .add_source(File::from(base_file.clone()).required(false))
            .add_source(File::from(environment_file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(Some(environment_variables)),
            )
            .build()
            .map_err(|e| ConfigurationError::load_error(base_file.display().to_string(), e))?;

        merged
            .try_deserialize::<OrderflowConfig>()
            .map_err(|e| ConfigurationError::load_error(config_directory.display().to_string(), e))
    }
}

/// Mask the password component of a connection URL for logging
pub fn sanitize_database_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, name: &str, contents: &str) {
        fs::write(dir.path().join(name), contents).expect("write config file");
    }

    #[test]
    fn test_empty_directory_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let manager =
            ConfigManager::load_with_variables(Some(dir.path().to_path_buf()), "test", HashMap::new())
                .unwrap();

        assert_eq!(manager.config(), &OrderflowConfig::default());
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_environment_file_overrides_base_file() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            "orderflow.toml",
            "[scheduler]\njob_limit = 25\nperiod_ms = 500\n",
        );
        write_config(&dir, "orderflow.test.toml", "[scheduler]\njob_limit = 5\n");

        let manager =
            ConfigManager::load_with_variables(Some(dir.path().to_path_buf()), "test", HashMap::new())
                .unwrap();

        assert_eq!(manager.config().scheduler.job_limit, 5);
        assert_eq!(manager.config().scheduler.period_ms, 500);
    }

    #[test]
    fn test_variables_override_files() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "orderflow.toml", "[dispatch]\nretries_max = 1\n");

        let variables = HashMap::from([
            ("ORDERFLOW__DISPATCH__RETRIES_MAX".to_string(), "7".to_string()),
            (
                "DATABASE_URL".to_string(),
                "postgresql://app:secret@db:5432/orders".to_string(),
            ),
            ("UNRELATED".to_string(), "ignored".to_string()),
        ]);
        let manager =
            ConfigManager::load_with_variables(Some(dir.path().to_path_buf()), "test", variables)
                .unwrap();

        assert_eq!(manager.config().dispatch.retries_max, 7);
        assert_eq!(
            manager.config().database.url,
            "postgresql://app:secret@db:5432/orders"
        );
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "orderflow.toml", "[scheduler]\njob_limit = -1\n");

        let result =
            ConfigManager::load_with_variables(Some(dir.path().to_path_buf()), "test", HashMap::new());
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }

    #[test]
    fn test_sanitize_database_url() {
        assert_eq!(
            sanitize_database_url("postgresql://app:secret@db:5432/orders"),
            "postgresql://app:***@db:5432/orders"
        );
        assert_eq!(
            sanitize_database_url("postgresql://db:5432/orders"),
            "postgresql://db:5432/orders"
        );
    }
}
