//! # Pipeline Utils Core
//!
//! Helpers that move data between Azure Key Vault, Azure Blob Storage and an
//! Azure SQL database for use inside ETL pipelines.
//!
//! ## Architecture
//!
//! The crate follows the same split as the rest of the workspace:
//! - Operations depend only on trait abstractions ([`key_vault::SecretStore`],
//!   [`blob_storage::BlobServiceConnector`], [`database::SqlConnector`])
//! - Infrastructure implementations are injected at runtime
//! - Azure and SQL Server adapters live behind the `azure` and `mssql` features,
//!   in-memory adapters are always available for tests and local runs
//!
//! ## Usage
//!
//! ```rust
//! use pipeline_utils_core::table::{CellValue, Table};
//!
//! let mut table = Table::new(vec!["id".to_string(), "name".to_string()]);
//! table.push_row(vec![CellValue::Int(1), CellValue::from("alpha")]).unwrap();
//! assert_eq!(table.to_delimited(',').unwrap(), "id,name\n1,alpha\n");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Standard result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wrap an existing UTC date-time
    pub fn from_datetime(value: DateTime<Utc>) -> Self {
        Self(value)
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Add seconds to timestamp
    ///
    /// Saturates at the latest representable time instead of overflowing.
    pub fn add_seconds(&self, seconds: u64) -> Self {
        let later = i64::try_from(seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|duration| self.0.checked_add_signed(duration));
        Self(later.unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> Duration {
        let chrono_duration = self.0.signed_duration_since(other.0);
        chrono_duration.to_std().unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Deployment environment enumeration
///
/// Selects which configuration set is loaded. There is no implicit fallback
/// between environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ParseError::InvalidFormat {
                expected: "development, staging, or production".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for string parsing failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

/// Coarse classification shared by every error in the crate
///
/// Callers use this to decide how to react without matching on each
/// module's error enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Secret, blob or other addressed resource does not exist
    NotFound,
    /// Credential is missing, invalid, or lacks access
    Authorization,
    /// Connect or request deadline exceeded
    Timeout,
    /// Database driver failure (bad SQL, procedure error, protocol error)
    Driver,
    /// Invalid or missing configuration
    Configuration,
    /// Local filesystem failure
    Io,
    /// Anything else
    Internal,
}

/// Top-level error type for pipeline operations
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Key Vault error: {0}")]
    KeyVault(#[from] key_vault::KeyVaultError),

    #[error("Blob storage error: {0}")]
    BlobStorage(#[from] blob_storage::BlobStorageError),

    #[error("Table error: {0}")]
    Table(#[from] table::TableError),

    #[error("Database error: {0}")]
    Database(#[from] database::DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] settings::ConfigError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

impl PipelineError {
    /// Map the error onto the shared taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyVault(e) => e.kind(),
            Self::BlobStorage(e) => e.kind(),
            Self::Table(_) => ErrorKind::Internal,
            Self::Database(e) => e.kind(),
            Self::Config(_) => ErrorKind::Configuration,
            Self::Parse(_) => ErrorKind::Configuration,
        }
    }

    /// Check if error is transient and a caller-side retry could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::KeyVault(e) => e.is_transient(),
            Self::BlobStorage(e) => e.is_transient(),
            Self::Database(e) => e.is_transient(),
            Self::Table(_) | Self::Config(_) | Self::Parse(_) => false,
        }
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Credential strategy selection
pub mod credential;

/// Secret retrieval and the per-run secret cache
pub mod key_vault;

/// Blob addressing, container abstraction and byte streams
pub mod blob_storage;

/// Blob download and upload operations
pub mod transfer;

/// In-memory tabular data and delimited text encoding
pub mod table;

/// Connection settings, engine handle and query execution
pub mod database;

/// Process log record and stored-procedure invocation
pub mod process_log;

/// Explicit per-environment configuration
pub mod settings;

/// Infrastructure implementations of the service traits
pub mod adapters;

/// Azure entry points taking an explicit credential
#[cfg(feature = "azure")]
pub mod azure;

pub use blob_storage::{
    BlobContainer, BlobName, BlobServiceConnector, BlobStorageError, BlobStream, BlobUrl,
    ContainerName, StorageAccountUrl, TransferSummary,
};
pub use settings::{ConfigError, PipelineConfig};
pub use credential::{CredentialKind, OsFamily, RuntimeEnvironment};
pub use database::{ConnectionSettings, DatabaseError, SqlConnection, SqlConnector, SqlEngine};
pub use key_vault::{
    CachingSecretStore, KeyVaultError, SecretCache, SecretName, SecretStore, SecretValue,
};
pub use process_log::{ProcessLogRecord, ProcedureName};
pub use table::{CellValue, Table, TableError, DEFAULT_SEPARATOR};
pub use transfer::BlobTransfer;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
