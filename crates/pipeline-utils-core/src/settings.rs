//! # Pipeline Configuration
//!
//! Explicit per-environment configuration. Values are read from
//! `<config_dir>/<environment>.yaml` and then overridden by environment
//! variables prefixed `PIPELINE__` with `__` between path segments, e.g.
//! `PIPELINE__STORAGE__CONTAINER_NAME=raw`.
//!
//! The file for the requested environment is required. A missing or
//! unreadable file is an error; no other environment's values are ever used
//! in its place.

use crate::blob_storage::{ContainerName, StorageAccountUrl};
use crate::credential::DEFAULT_DEV_VM_MARKER;
use crate::database::{DEFAULT_DRIVER, SUPPORTED_DRIVERS};
use crate::key_vault::{SecretName, DEFAULT_CACHE_TTL};
use crate::process_log::ProcedureName;
use crate::Environment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use url::Url;

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "PIPELINE";

/// Longest accepted lifetime for a cached account key
pub const MAX_CACHE_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Directory searched when none is given
pub const DEFAULT_CONFIG_DIR: &str = "config";

// ============================================================================
// Configuration Types
// ============================================================================

/// Complete configuration for one environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub key_vault: KeyVaultSettings,

    pub storage: StorageSettings,

    /// Absent when the pipeline does not touch SQL
    #[serde(default)]
    pub database: Option<DatabaseSettings>,

    #[serde(default)]
    pub credential: CredentialSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Vault holding every secret the pipeline reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyVaultSettings {
    /// e.g. `https://etl-kv.vault.azure.net/`
    pub url: String,

    /// Upper bound on a single secret request
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl KeyVaultSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn default_request_timeout_seconds() -> u64 {
    30
}

/// Storage account and default container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub account_url: StorageAccountUrl,

    pub container_name: ContainerName,

    /// Vault secret holding the storage account key
    pub access_key_secret_name: SecretName,

    /// Cache the account key for the run instead of fetching it per operation
    #[serde(default)]
    pub cache_access_keys: bool,

    /// Lifetime of a cached account key
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
}

impl StorageSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

fn default_cache_ttl_seconds() -> u64 {
    DEFAULT_CACHE_TTL.as_secs()
}

/// Azure SQL database and the process log procedure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Bare server name; `.database.windows.net` is appended
    pub server: String,

    pub database: String,

    pub username: String,

    /// Vault secret holding the SQL password
    pub password_secret_name: SecretName,

    #[serde(default = "default_driver")]
    pub driver: String,

    /// Stored procedure `log-process` calls when none is given
    #[serde(default)]
    pub log_procedure: Option<ProcedureName>,
}

fn default_driver() -> String {
    DEFAULT_DRIVER.to_string()
}

/// Credential selection tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSettings {
    /// Launch-path fragment identifying a development VM
    #[serde(default = "default_dev_vm_marker")]
    pub dev_vm_marker: String,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            dev_vm_marker: default_dev_vm_marker(),
        }
    }
}

fn default_dev_vm_marker() -> String {
    DEFAULT_DEV_VM_MARKER.to_string()
}

/// Log output settings used by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// Loading and Validation
// ============================================================================

impl PipelineConfig {
    /// Path of the file holding `environment`'s configuration
    pub fn file_path(config_dir: &Path, environment: Environment) -> PathBuf {
        config_dir.join(format!("{}.yaml", environment.as_str()))
    }

    /// Load and validate configuration for `environment`
    ///
    /// # Errors
    /// - `ConfigError::EnvironmentNotFound` if the environment's file is missing
    /// - `ConfigError::Load` if the file or an override cannot be parsed
    /// - `ConfigError::Invalid` if a value fails validation
    pub fn load(environment: Environment, config_dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::file_path(config_dir, environment);
        if !path.is_file() {
            return Err(ConfigError::EnvironmentNotFound {
                environment,
                path: path.display().to_string(),
            });
        }

        let config = config::Config::builder()
            .add_source(
                config::File::from(path.as_path())
                    .required(true)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::Load {
                message: e.to_string(),
            })?;

        let loaded: Self = config.try_deserialize().map_err(|e| ConfigError::Load {
            message: e.to_string(),
        })?;
        loaded.validate()?;

        info!(
            environment = %environment,
            path = %path.display(),
            "Loaded pipeline configuration"
        );
        Ok(loaded)
    }

    /// Check values the type system does not cover
    pub fn validate(&self) -> Result<(), ConfigError> {
        let vault = Url::parse(&self.key_vault.url).map_err(|e| invalid("key_vault.url", e))?;
        if vault.scheme() != "https" {
            return Err(invalid("key_vault.url", "must use https"));
        }
        let vault_host = vault.host_str().unwrap_or_default();
        if !vault_host.ends_with(".vault.azure.net") {
            return Err(invalid("key_vault.url", "host must end with .vault.azure.net"));
        }

        if self.key_vault.request_timeout_seconds == 0 {
            return Err(invalid("key_vault.request_timeout_seconds", "must be positive"));
        }

        if !self.storage.account_url.as_str().starts_with("https://") {
            return Err(invalid("storage.account_url", "must use https"));
        }

        if self.storage.cache_ttl_seconds > MAX_CACHE_TTL_SECONDS {
            return Err(invalid(
                "storage.cache_ttl_seconds",
                format!("must be at most {} seconds", MAX_CACHE_TTL_SECONDS),
            ));
        }

        if let Some(database) = &self.database {
            if !SUPPORTED_DRIVERS.contains(&database.driver.as_str()) {
                return Err(invalid(
                    "database.driver",
                    format!("unsupported driver '{}'", database.driver),
                ));
            }
            for (field, value) in [
                ("database.server", &database.server),
                ("database.database", &database.database),
                ("database.username", &database.username),
            ] {
                if value.trim().is_empty() {
                    return Err(invalid(field, "must not be empty"));
                }
            }
        }

        if self.credential.dev_vm_marker.is_empty() {
            return Err(invalid("credential.dev_vm_marker", "must not be empty"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No configuration for environment '{environment}' at {path}")]
    EnvironmentNotFound {
        environment: Environment,
        path: String,
    },

    #[error("Failed to load configuration: {message}")]
    Load { message: String },

    #[error("Invalid configuration value '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
