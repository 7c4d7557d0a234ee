//! # Filesystem Blob Storage Adapter
//!
//! Local filesystem implementation of the blob service for development.
//! Blobs live at `<base>/<account>/<container>/<blob name>`; a container is
//! a directory that must already exist.

use crate::blob_storage::{
    BlobContainer, BlobName, BlobServiceConnector, BlobStorageError, BlobStream, ContainerName,
    StorageAccountUrl,
};
use crate::key_vault::SecretValue;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::StreamExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Filesystem-backed blob service
///
/// # Examples
///
/// ```no_run
/// use pipeline_utils_core::adapters::FilesystemBlobService;
/// use std::path::PathBuf;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = FilesystemBlobService::new(PathBuf::from("./data/blobs")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FilesystemBlobService {
    base_path: PathBuf,
}

impl FilesystemBlobService {
    /// Create new filesystem blob service rooted at `base_path`
    ///
    /// # Errors
    ///
    /// Returns error if base path cannot be created or accessed.
    pub async fn new(base_path: PathBuf) -> Result<Self, BlobStorageError> {
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| BlobStorageError::InternalError {
                message: format!("Failed to create base directory: {}", e),
            })?;

        Ok(Self { base_path })
    }

    /// Directory backing a container
    pub fn container_path(&self, account: &StorageAccountUrl, container: &ContainerName) -> PathBuf {
        self.base_path
            .join(account.account_name())
            .join(container.as_str())
    }
}

#[async_trait]
impl BlobServiceConnector for FilesystemBlobService {
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

        let root = self.container_path(account, container);
        if !fs::try_exists(&root).await.unwrap_or(false) {
            return Err(BlobStorageError::ContainerNotFound {
                container: container.to_string(),
            });
        }

        debug!(path = %root.display(), "Opened filesystem container");
        Ok(Arc::new(FilesystemContainer {
            root,
            name: container.clone(),
        }))
    }
}

/// Container handle returned by [`FilesystemBlobService`]
#[derive(Debug)]
pub struct FilesystemContainer {
    root: PathBuf,
    name: ContainerName,
}

impl FilesystemContainer {
    /// Resolve a blob name to a path inside the container
    ///
    /// Names that would escape the container directory are rejected.
    fn blob_path(&self, blob: &BlobName) -> Result<PathBuf, BlobStorageError> {
        let relative = Path::new(blob.as_str());
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(BlobStorageError::InvalidPath {
                path: blob.to_string(),
                reason: "blob name must not contain '.', '..' or root components".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobContainer for FilesystemContainer {
    fn container_name(&self) -> &ContainerName {
        &self.name
    }

    async fn download(&self, blob: &BlobName) -> Result<BlobStream, BlobStorageError> {
        let path = self.blob_path(blob)?;
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobStorageError::BlobNotFound {
                    container: self.name.to_string(),
                    blob: blob.to_string(),
                })
            }
            Err(e) => {
                return Err(BlobStorageError::InternalError {
                    message: format!("Failed to open blob file: {}", e),
                })
            }
        };

        let chunks = futures::stream::unfold(Some(file), |state| async move {
            let mut file = state?;
            let mut buffer = vec![0u8; READ_CHUNK_SIZE];
            match file.read(&mut buffer).await {
                Ok(0) => None,
                Ok(n) => {
                    buffer.truncate(n);
                    Some((Ok(Bytes::from(buffer)), Some(file)))
                }
                Err(e) => Some((
                    Err(BlobStorageError::InternalError {
                        message: format!("Failed to read blob file: {}", e),
                    }),
                    None,
                )),
            }
        });

        Ok(BlobStream::new(blob.clone(), chunks.boxed()))
    }

    async fn upload(&self, blob: &BlobName, data: Bytes) -> Result<(), BlobStorageError> {
        let path = self.blob_path(blob)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobStorageError::InternalError {
                    message: format!("Failed to create directory structure: {}", e),
                })?;
        }

        // Write to a sibling temp file and rename so readers never see a partial blob
        let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let mut file =
            fs::File::create(&temp_path)
                .await
                .map_err(|e| BlobStorageError::InternalError {
                    message: format!("Failed to create temp file: {}", e),
                })?;
        file.write_all(&data)
            .await
            .map_err(|e| BlobStorageError::InternalError {
                message: format!("Failed to write blob: {}", e),
            })?;
        file.sync_all()
            .await
            .map_err(|e| BlobStorageError::InternalError {
                message: format!("Failed to sync blob: {}", e),
            })?;
        drop(file);

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| BlobStorageError::InternalError {
                message: format!("Failed to move blob into place: {}", e),
            })?;

        debug!(path = %path.display(), size = data.len(), "Wrote filesystem blob");
        Ok(())
    }
}

#[cfg(test)]
#[path = "filesystem_blob_storage_tests.rs"]
mod tests;
