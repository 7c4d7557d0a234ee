//! # In-Memory Key Vault Implementation
//!
//! Thread-safe in-memory secret store and secret cache for testing and
//! local development.

use crate::key_vault::{
    CacheStatistics, CachedSecret, KeyVaultError, SecretCache, SecretName, SecretStore,
    SecretValue,
};
use crate::Timestamp;
use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};

fn lock_poisoned(operation: &str) -> KeyVaultError {
    KeyVaultError::CacheError {
        operation: operation.to_string(),
        message: "lock poisoned".to_string(),
    }
}

// ============================================================================
// Secret Cache
// ============================================================================

/// Thread-safe in-memory secret cache
///
/// Uses RwLock for concurrent access with minimal contention.
#[derive(Clone)]
pub struct InMemorySecretCache {
    secrets: Arc<RwLock<HashMap<SecretName, CachedSecret>>>,
    stats: Arc<RwLock<CacheStats>>,
}

#[derive(Debug, Clone, Default)]
struct CacheStats {
    hits: u64,
    misses: u64,
}

impl InMemorySecretCache {
    /// Create new empty cache
    pub fn new() -> Self {
        Self {
            secrets: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }
}

impl Default for InMemorySecretCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretCache for InMemorySecretCache {
    async fn get(&self, name: &SecretName) -> Option<CachedSecret> {
        let mut secrets = self.secrets.write().ok()?;
        let mut stats = self.stats.write().ok()?;

        let cached = secrets.get(name).cloned();
        match cached {
            Some(cached) if cached.is_expired() => {
                secrets.remove(name);
                stats.misses += 1;
                None
            }
            Some(cached) => {
                stats.hits += 1;
                Some(cached)
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    async fn put(
        &self,
        name: SecretName,
        value: SecretValue,
        ttl: Duration,
    ) -> Result<(), KeyVaultError> {
        let now = Timestamp::now();
        let cached = CachedSecret {
            name: name.clone(),
            value,
            cached_at: now,
            expires_at: now.add_seconds(ttl.as_secs()),
        };

        self.secrets
            .write()
            .map_err(|_| lock_poisoned("put"))?
            .insert(name, cached);
        Ok(())
    }

    async fn remove(&self, name: &SecretName) -> Result<(), KeyVaultError> {
        self.secrets
            .write()
            .map_err(|_| lock_poisoned("remove"))?
            .remove(name);
        Ok(())
    }

    async fn clear(&self) -> Result<(), KeyVaultError> {
        self.secrets
            .write()
            .map_err(|_| lock_poisoned("clear"))?
            .clear();
        Ok(())
    }

    async fn get_statistics(&self) -> Result<CacheStatistics, KeyVaultError> {
        let secrets = self.secrets.read().map_err(|_| lock_poisoned("stats"))?;
        let stats = self.stats.read().map_err(|_| lock_poisoned("stats"))?;

        let total = stats.hits + stats.misses;
        let hit_ratio = if total > 0 {
            stats.hits as f64 / total as f64
        } else {
            0.0
        };

        Ok(CacheStatistics {
            cached_secrets_count: secrets.len(),
            hit_ratio,
            total_hits: stats.hits,
            total_misses: stats.misses,
            collected_at: Timestamp::now(),
        })
    }
}

// ============================================================================
// Secret Store
// ============================================================================

/// In-memory vault for testing
///
/// Counts lookups so tests can observe how many vault round trips an
/// operation costs. Secrets can be marked forbidden to simulate a credential
/// without access.
#[derive(Clone)]
pub struct InMemorySecretStore {
    vault_url: String,
    secrets: Arc<RwLock<HashMap<SecretName, SecretValue>>>,
    forbidden: Arc<RwLock<HashSet<SecretName>>>,
    lookups: Arc<AtomicU64>,
}

impl InMemorySecretStore {
    /// Create an empty vault at `vault_url`
    pub fn new(vault_url: impl Into<String>) -> Self {
        Self {
            vault_url: vault_url.into(),
            secrets: Arc::new(RwLock::new(HashMap::new())),
            forbidden: Arc::new(RwLock::new(HashSet::new())),
            lookups: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Add or replace a secret
    pub fn add_secret(&self, name: SecretName, value: SecretValue) {
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.insert(name, value);
        }
    }

    /// Make lookups of `name` fail with `AccessDenied`
    pub fn deny_access(&self, name: SecretName) {
        if let Ok(mut forbidden) = self.forbidden.write() {
            forbidden.insert(name);
        }
    }

    /// Number of `get_secret` calls served so far
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    fn vault_url(&self) -> &str {
        &self.vault_url
    }

    async fn get_secret(&self, name: &SecretName) -> Result<SecretValue, KeyVaultError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let denied = self
            .forbidden
            .read()
            .map_err(|_| lock_poisoned("get_secret"))?
            .contains(name);
        if denied {
            return Err(KeyVaultError::AccessDenied {
                name: name.clone(),
                reason: "credential lacks get permission".to_string(),
            });
        }

        self.secrets
            .read()
            .map_err(|_| lock_poisoned("get_secret"))?
            .get(name)
            .cloned()
            .ok_or_else(|| KeyVaultError::SecretNotFound { name: name.clone() })
    }
}

#[cfg(test)]
#[path = "memory_key_vault_tests.rs"]
mod tests;
