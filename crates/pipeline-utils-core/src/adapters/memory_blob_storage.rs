//! # In-Memory Blob Storage Implementation
//!
//! Blob service held in process memory for tests and dry runs. Containers
//! must be created before they can be connected to, matching the behavior of
//! a real storage account.

use crate::blob_storage::{
    BlobContainer, BlobName, BlobServiceConnector, BlobStorageError, BlobStream, ContainerName,
    StorageAccountUrl,
};
use crate::key_vault::SecretValue;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::StreamExt;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

type ContainerKey = (String, String);
type BlobMap = HashMap<String, Bytes>;

/// Default download chunk size
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Default)]
struct ServiceState {
    containers: RwLock<HashMap<ContainerKey, BlobMap>>,
    account_keys: RwLock<HashMap<String, String>>,
    connects: AtomicU64,
    uploads: AtomicU64,
}

fn lock_poisoned() -> BlobStorageError {
    BlobStorageError::InternalError {
        message: "in-memory blob store lock poisoned".to_string(),
    }
}

/// In-memory blob service
///
/// Clones share the same underlying storage.
#[derive(Clone)]
pub struct InMemoryBlobService {
    state: Arc<ServiceState>,
    chunk_size: usize,
}

impl InMemoryBlobService {
    /// Create an empty service with no containers
    pub fn new() -> Self {
        Self {
            state: Arc::new(ServiceState::default()),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Split downloads into chunks of `chunk_size` bytes
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Create a container (no-op if it exists)
    pub fn create_container(&self, account: &StorageAccountUrl, container: &ContainerName) {
        if let Ok(mut containers) = self.state.containers.write() {
            containers
                .entry(container_key(account, container))
                .or_default();
        }
    }

    /// Require `key` when connecting to `account`
    ///
    /// Accounts without a registered key accept any non-empty key.
    pub fn set_account_key(&self, account: &StorageAccountUrl, key: impl Into<String>) {
        if let Ok(mut keys) = self.state.account_keys.write() {
            keys.insert(account.as_str().to_string(), key.into());
        }
    }

    /// Seed a blob directly, creating the container if needed
    pub fn put_blob(
        &self,
        account: &StorageAccountUrl,
        container: &ContainerName,
        blob: &BlobName,
        data: impl Into<Bytes>,
    ) {
        if let Ok(mut containers) = self.state.containers.write() {
            containers
                .entry(container_key(account, container))
                .or_default()
                .insert(blob.as_str().to_string(), data.into());
        }
    }

    /// Read a blob directly
    pub fn get_blob(
        &self,
        account: &StorageAccountUrl,
        container: &ContainerName,
        blob: &BlobName,
    ) -> Option<Bytes> {
        self.state
            .containers
            .read()
            .ok()?
            .get(&container_key(account, container))?
            .get(blob.as_str())
            .cloned()
    }

    /// Number of blobs in a container
    pub fn blob_count(&self, account: &StorageAccountUrl, container: &ContainerName) -> usize {
        self.state
            .containers
            .read()
            .ok()
            .and_then(|c| c.get(&container_key(account, container)).map(|b| b.len()))
            .unwrap_or(0)
    }

    /// Number of successful `connect` calls
    pub fn connect_count(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of completed uploads
    pub fn upload_count(&self) -> u64 {
        self.state.uploads.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryBlobService {
    fn default() -> Self {
        Self::new()
    }
}

fn container_key(account: &StorageAccountUrl, container: &ContainerName) -> ContainerKey {
    (account.as_str().to_string(), container.as_str().to_string())
}

#[async_trait]
impl BlobServiceConnector for InMemoryBlobService {
    async fn connect(
        &self,
        account: &StorageAccountUrl,
        container: &ContainerName,
        access_key: &SecretValue,
    ) -> Result<Arc<dyn BlobContainer>, BlobStorageError> {
        if access_key.is_empty() {
            return Err(BlobStorageError::AuthenticationFailed {
                message: "empty account key".to_string(),
            });
        }

        let expected = self
            .state
            .account_keys
            .read()
            .map_err(|_| lock_poisoned())?
            .get(account.as_str())
            .cloned();
        if let Some(expected) = expected {
            if expected != access_key.expose_secret() {
                return Err(BlobStorageError::AuthenticationFailed {
                    message: format!("account key rejected by {}", account),
                });
            }
        }

        let key = container_key(account, container);
        let exists = self
            .state
            .containers
            .read()
            .map_err(|_| lock_poisoned())?
            .contains_key(&key);
        if !exists {
            return Err(BlobStorageError::ContainerNotFound {
                container: container.to_string(),
            });
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemoryContainer {
            state: self.state.clone(),
            key,
            name: container.clone(),
            chunk_size: self.chunk_size,
        }))
    }
}

/// Container handle returned by [`InMemoryBlobService`]
pub struct InMemoryContainer {
    state: Arc<ServiceState>,
    key: ContainerKey,
    name: ContainerName,
    chunk_size: usize,
}

#[async_trait]
impl BlobContainer for InMemoryContainer {
    fn container_name(&self) -> &ContainerName {
        &self.name
    }

    async fn download(&self, blob: &BlobName) -> Result<BlobStream, BlobStorageError> {
        let data = self
            .state
            .containers
            .read()
            .map_err(|_| lock_poisoned())?
            .get(&self.key)
            .and_then(|blobs| blobs.get(blob.as_str()).cloned())
            .ok_or_else(|| BlobStorageError::BlobNotFound {
                container: self.name.to_string(),
                blob: blob.to_string(),
            })?;

        let chunks: Vec<Result<Bytes, BlobStorageError>> = (0..data.len())
            .step_by(self.chunk_size)
            .map(|start| Ok(data.slice(start..(start + self.chunk_size).min(data.len()))))
            .collect();

        Ok(BlobStream::new(
            blob.clone(),
            futures::stream::iter(chunks).boxed(),
        ))
    }

    async fn upload(&self, blob: &BlobName, data: Bytes) -> Result<(), BlobStorageError> {
        self.state
            .containers
            .write()
            .map_err(|_| lock_poisoned())?
            .entry(self.key.clone())
            .or_default()
            .insert(blob.as_str().to_string(), data);
        self.state.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_blob_storage_tests.rs"]
mod tests;
