//! # Blob Transfer Operations
//!
//! Download and upload of single blobs. Every operation resolves the storage
//! account key from the secret store first, so without an access-key cache
//! each call costs one vault round trip.

use crate::blob_storage::{
    compute_checksum, BlobContainer, BlobName, BlobServiceConnector, BlobStorageError,
    BlobStream, BlobUrl, ContainerName, StorageAccountUrl, TransferSummary,
};
use crate::key_vault::{CachingSecretStore, SecretCache, SecretName, SecretStore};
use crate::table::Table;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// Blob transfer service
///
/// Holds the secret store used to resolve account keys and the connector used
/// to open containers.
#[derive(Clone)]
pub struct BlobTransfer {
    secrets: Arc<dyn SecretStore>,
    connector: Arc<dyn BlobServiceConnector>,
}

impl BlobTransfer {
    /// Create a transfer service that looks up the account key on every call
    pub fn new(secrets: Arc<dyn SecretStore>, connector: Arc<dyn BlobServiceConnector>) -> Self {
        Self { secrets, connector }
    }

    /// Cache resolved account keys in `cache` for `ttl`
    ///
    /// Repeated operations against the same account then reuse one vault
    /// lookup. Keys rotated in the vault are picked up after at most `ttl`.
    pub fn with_access_key_cache(self, cache: Arc<dyn SecretCache>, ttl: Duration) -> Self {
        Self {
            secrets: Arc::new(CachingSecretStore::new(self.secrets, cache, ttl)),
            connector: self.connector,
        }
    }

    /// Open a container client using the account key stored under `access_key_secret`
    ///
    /// # Errors
    /// - `BlobStorageError::AccessKey` if the key cannot be read from the vault
    /// - `BlobStorageError::ContainerNotFound` if the container does not exist
    #[instrument(skip_all, fields(account = %account, container = %container))]
    pub async fn connect_container(
        &self,
        account: &StorageAccountUrl,
        container: &ContainerName,
        access_key_secret: &SecretName,
    ) -> Result<Arc<dyn BlobContainer>, BlobStorageError> {
        let access_key = self.secrets.get_secret(access_key_secret).await?;
        let handle = self.connector.connect(account, container, &access_key).await?;
        debug!("Connected to blob container");
        Ok(handle)
    }

    /// Open a blob for streaming reads
    ///
    /// # Errors
    /// - `BlobStorageError::BlobNotFound` if the blob does not exist
    #[instrument(skip_all, fields(account = %account, container = %container, blob = %blob))]
    pub async fn download_to_stream(
        &self,
        account: &StorageAccountUrl,
        container: &ContainerName,
        access_key_secret: &SecretName,
        blob: &BlobName,
    ) -> Result<BlobStream, BlobStorageError> {
        let handle = self
            .connect_container(account, container, access_key_secret)
            .await?;
        handle.download(blob).await
    }

    /// Download a blob into a local file, creating or truncating it
    ///
    /// The file is closed before this returns, whether or not the download
    /// succeeded. On failure the file may hold a partial download.
    #[instrument(skip_all, fields(account = %account, container = %container, blob = %blob, path = %local_path.display()))]
    pub async fn download_to_file(
        &self,
        account: &StorageAccountUrl,
        container: &ContainerName,
        access_key_secret: &SecretName,
        blob: &BlobName,
        local_path: &Path,
    ) -> Result<TransferSummary, BlobStorageError> {
        let mut stream = self
            .download_to_stream(account, container, access_key_secret, blob)
            .await?;

        let local_io = |source: std::io::Error| BlobStorageError::LocalIo {
            path: local_path.display().to_string(),
            source,
        };

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(local_io)?;
        let mut hasher = Sha256::new();
        let mut size_bytes = 0u64;

        while let Some(chunk) = stream.next_chunk().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            size_bytes += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(local_io)?;
        }
        file.flush().await.map_err(local_io)?;
        file.sync_all().await.map_err(local_io)?;

        let summary = TransferSummary {
            blob_name: blob.to_string(),
            size_bytes,
            checksum_sha256: hex::encode(hasher.finalize()),
        };
        info!(
            size_bytes = summary.size_bytes,
            checksum = %summary.checksum_sha256,
            "Downloaded blob to file"
        );
        Ok(summary)
    }

    /// Upload raw bytes, replacing any existing blob at `blob_url`
    #[instrument(skip_all, fields(blob_url = %blob_url, size = data.len()))]
    pub async fn upload_object(
        &self,
        data: Bytes,
        blob_url: &BlobUrl,
        access_key_secret: &SecretName,
    ) -> Result<TransferSummary, BlobStorageError> {
        let handle = self
            .connect_container(&blob_url.account, &blob_url.container, access_key_secret)
            .await?;

        let summary = TransferSummary {
            blob_name: blob_url.blob.to_string(),
            size_bytes: data.len() as u64,
            checksum_sha256: compute_checksum(&data),
        };

        handle.upload(&blob_url.blob, data).await?;

        info!(
            size_bytes = summary.size_bytes,
            checksum = %summary.checksum_sha256,
            "Uploaded blob"
        );
        Ok(summary)
    }

    /// Serialize `table` as delimited text and upload it with [`Self::upload_object`]
    #[instrument(skip_all, fields(blob_url = %blob_url, rows = table.len()))]
    pub async fn upload_table(
        &self,
        table: &Table,
        blob_url: &BlobUrl,
        access_key_secret: &SecretName,
        separator: char,
    ) -> Result<TransferSummary, BlobStorageError> {
        let text = table
            .to_delimited(separator)
            .map_err(|e| BlobStorageError::SerializationFailed {
                message: e.to_string(),
            })?;

        self.upload_object(Bytes::from(text), blob_url, access_key_secret)
            .await
    }
}

#[cfg(test)]
#[path = "transfer_tests.rs"]
mod tests;
