//! # Key Vault Module
//!
//! Secret retrieval from a vault scoped to one URL, plus an opt-in cache for
//! the lifetime of a single pipeline run.
//!
//! Without a cache every lookup is a vault round trip. Wrapping a store in
//! [`CachingSecretStore`] trades that cost for values that may be up to one
//! TTL stale; callers choose this explicitly.

use crate::{ErrorKind, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc, time::Duration};
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

// ============================================================================
// Core Types
// ============================================================================

/// Secret identifier with Azure Key Vault naming rules
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretName(String);

impl SecretName {
    /// Create new secret name with validation
    ///
    /// # Validation Rules
    /// - Must be 1-127 characters (Azure Key Vault limit)
    /// - Must contain only ASCII alphanumeric characters and hyphens
    pub fn new(name: impl Into<String>) -> Result<Self, KeyVaultError> {
        let name = name.into();

        if name.is_empty() {
            return Err(KeyVaultError::InvalidSecretName {
                name,
                reason: "Secret name cannot be empty".to_string(),
            });
        }

        if name.len() > 127 {
            return Err(KeyVaultError::InvalidSecretName {
                name,
                reason: "Secret name exceeds 127 character limit".to_string(),
            });
        }

        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(KeyVaultError::InvalidSecretName {
                name,
                reason: "Secret name must contain only alphanumeric characters and hyphens"
                    .to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SecretName {
    type Err = KeyVaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SecretName {
    type Error = KeyVaultError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SecretName> for String {
    fn from(value: SecretName) -> Self {
        value.0
    }
}

/// Secure container for secret values
///
/// Secret values are never included in Debug output or logs, and the
/// backing buffer is zeroed when the last copy is dropped.
#[derive(Clone)]
pub struct SecretValue {
    inner: Zeroizing<String>,
}

impl SecretValue {
    /// Create secret value from string
    pub fn from_string(value: String) -> Self {
        Self {
            inner: Zeroizing::new(value),
        }
    }

    /// Get secret as string (only for immediate use)
    ///
    /// # Security Warning
    /// The returned string contains the actual secret value.
    /// Use immediately and avoid storing in variables.
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }

    /// Check if secret is empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Get secret length without exposing content
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("length", &self.len())
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Cached secret with expiration metadata
#[derive(Debug, Clone)]
pub struct CachedSecret {
    /// Secret name for identification
    pub name: SecretName,

    /// Secret value (secure container)
    pub value: SecretValue,

    /// When secret was cached
    pub cached_at: Timestamp,

    /// Cache expiration time
    pub expires_at: Timestamp,
}

impl CachedSecret {
    /// Check if secret is expired
    pub fn is_expired(&self) -> bool {
        Timestamp::now() > self.expires_at
    }
}

/// Cache performance statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatistics {
    /// Total number of secrets currently cached
    pub cached_secrets_count: usize,

    /// Cache hit ratio (0.0 to 1.0)
    pub hit_ratio: f64,

    /// Total cache hits since start
    pub total_hits: u64,

    /// Total cache misses since start
    pub total_misses: u64,

    /// Timestamp when statistics were collected
    pub collected_at: Timestamp,
}

// ============================================================================
// Interface Traits
// ============================================================================

/// A secret vault scoped to a single vault URL
///
/// Implementations hold whatever client and credential they need; callers
/// only see names and values.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// URL of the vault this store reads from
    fn vault_url(&self) -> &str;

    /// Fetch a secret by name
    ///
    /// # Errors
    /// - `KeyVaultError::SecretNotFound` - Secret doesn't exist
    /// - `KeyVaultError::AccessDenied` - Credential lacks access
    /// - `KeyVaultError::ServiceUnavailable` - Vault unreachable
    async fn get_secret(&self, name: &SecretName) -> Result<SecretValue, KeyVaultError>;
}

/// Interface for secret caching
///
/// Separate from the store so cache behavior can be tested on its own.
#[async_trait]
pub trait SecretCache: Send + Sync {
    /// Get cached secret if available and not expired
    async fn get(&self, name: &SecretName) -> Option<CachedSecret>;

    /// Store secret in cache with expiration
    async fn put(
        &self,
        name: SecretName,
        value: SecretValue,
        ttl: Duration,
    ) -> Result<(), KeyVaultError>;

    /// Remove specific secret from cache
    async fn remove(&self, name: &SecretName) -> Result<(), KeyVaultError>;

    /// Clear all cached secrets
    async fn clear(&self) -> Result<(), KeyVaultError>;

    /// Get cache statistics
    async fn get_statistics(&self) -> Result<CacheStatistics, KeyVaultError>;
}

// ============================================================================
// Caching Store
// ============================================================================

/// Default lifetime of a cached secret: long enough for one pipeline run
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Secret store that consults a cache before the wrapped store
///
/// # Examples
///
/// ```
/// use pipeline_utils_core::adapters::{InMemorySecretCache, InMemorySecretStore};
/// use pipeline_utils_core::key_vault::{CachingSecretStore, DEFAULT_CACHE_TTL};
/// use pipeline_utils_core::{SecretName, SecretStore, SecretValue};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let vault = Arc::new(InMemorySecretStore::new("https://etl-kv.vault.azure.net/"));
/// let name = SecretName::new("storage-account-key").unwrap();
/// vault.add_secret(name.clone(), SecretValue::from_string("key".to_string()));
///
/// let store = CachingSecretStore::new(
///     vault.clone(),
///     Arc::new(InMemorySecretCache::new()),
///     DEFAULT_CACHE_TTL,
/// );
/// store.get_secret(&name).await.unwrap();
/// store.get_secret(&name).await.unwrap();
/// assert_eq!(vault.lookup_count(), 1);
/// # });
/// ```
pub struct CachingSecretStore {
    inner: Arc<dyn SecretStore>,
    cache: Arc<dyn SecretCache>,
    ttl: Duration,
}

impl CachingSecretStore {
    /// Wrap `inner` with `cache`, caching values for `ttl`
    pub fn new(inner: Arc<dyn SecretStore>, cache: Arc<dyn SecretCache>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }

    /// Access the underlying cache (statistics, manual invalidation)
    pub fn cache(&self) -> &Arc<dyn SecretCache> {
        &self.cache
    }
}

#[async_trait]
impl SecretStore for CachingSecretStore {
    fn vault_url(&self) -> &str {
        self.inner.vault_url()
    }

    #[instrument(skip(self), fields(vault_url = %self.inner.vault_url()))]
    async fn get_secret(&self, name: &SecretName) -> Result<SecretValue, KeyVaultError> {
        if let Some(cached) = self.cache.get(name).await {
            if !cached.is_expired() {
                debug!(secret_name = %name, "Cache hit for secret");
                return Ok(cached.value);
            }
            debug!(secret_name = %name, "Cache expired for secret");
        } else {
            debug!(secret_name = %name, "Cache miss for secret");
        }

        let value = self.inner.get_secret(name).await?;

        if let Err(e) = self.cache.put(name.clone(), value.clone(), self.ttl).await {
            // A failed cache write only costs a future round trip
            warn!(secret_name = %name, error = %e, "Failed to cache secret");
        }

        Ok(value)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during Key Vault operations
#[derive(Debug, thiserror::Error)]
pub enum KeyVaultError {
    #[error("Secret not found: {name}")]
    SecretNotFound { name: SecretName },

    #[error("Access denied to secret: {name} - {reason}")]
    AccessDenied { name: SecretName, reason: String },

    #[error("Key Vault service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Invalid secret name: {name} - {reason}")]
    InvalidSecretName { name: String, reason: String },

    #[error("Cache operation failed: {operation} - {message}")]
    CacheError { operation: String, message: String },

    #[error("Request timeout after {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },

    #[error("Rate limit exceeded: {retry_after_seconds} seconds")]
    RateLimitExceeded { retry_after_seconds: u64 },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl KeyVaultError {
    /// Check if error is transient and a caller-side retry could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KeyVaultError::ServiceUnavailable { .. }
                | KeyVaultError::Timeout { .. }
                | KeyVaultError::RateLimitExceeded { .. }
        )
    }

    /// Check if error indicates permission problems
    pub fn is_permission_error(&self) -> bool {
        matches!(
            self,
            KeyVaultError::AccessDenied { .. } | KeyVaultError::AuthenticationFailed { .. }
        )
    }

    /// Map onto the crate-wide taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SecretNotFound { .. } => ErrorKind::NotFound,
            Self::AccessDenied { .. } | Self::AuthenticationFailed { .. } => {
                ErrorKind::Authorization
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidSecretName { .. } | Self::Configuration { .. } => {
                ErrorKind::Configuration
            }
            Self::ServiceUnavailable { .. }
            | Self::RateLimitExceeded { .. }
            | Self::CacheError { .. }
            | Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
#[path = "key_vault_tests.rs"]
mod tests;
