//! # Azure Blob Storage Implementation
//!
//! Container clients authenticated with a storage account key.

use crate::blob_storage::{
    BlobContainer, BlobName, BlobServiceConnector, BlobStorageError, BlobStream, ContainerName,
    StorageAccountUrl,
};
use crate::key_vault::SecretValue;
use async_trait::async_trait;
use azure_core::auth::Secret;
use azure_core::{Body, StatusCode};
use azure_storage::{CloudLocation, StorageCredentials};
use azure_storage_blobs::prelude::*;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Opens containers on Azure storage accounts
#[derive(Debug, Clone, Default)]
pub struct AzureBlobServiceConnector;

impl AzureBlobServiceConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BlobServiceConnector for AzureBlobServiceConnector {
    #[instrument(skip_all, fields(account = %account, container = %container))]
    async fn connect(
        &self,
        account: &StorageAccountUrl,
        container: &ContainerName,
        access_key: &SecretValue,
    ) -> Result<Arc<dyn BlobContainer>, BlobStorageError> {
        if access_key.is_empty() {
            return Err(BlobStorageError::AuthenticationFailed {
                message: "storage account key is empty".to_string(),
            });
        }

        let credentials = StorageCredentials::access_key(
            account.account_name().to_string(),
            Secret::new(access_key.expose_secret().to_string()),
        );
        let client = ClientBuilder::with_location(cloud_location(account), credentials)
            .container_client(container.as_str());

        // Fails fast on a wrong key or missing container instead of on first use
        client
            .get_properties()
            .await
            .map_err(|e| map_azure_error(&e, container, None))?;

        info!("Connected to Azure blob container");

        Ok(Arc::new(AzureBlobContainer {
            client,
            container: container.clone(),
        }))
    }
}

/// SDK location for an account URL
///
/// Public and China endpoints map to their named clouds; any other host
/// (sovereign clouds, custom domains, emulators) is used verbatim.
pub(crate) fn cloud_location(account: &StorageAccountUrl) -> CloudLocation {
    let name = account.account_name().to_string();
    let host = account.host();
    if host == format!("{}.blob.core.windows.net", name) {
        CloudLocation::Public { account: name }
    } else if host == format!("{}.blob.core.chinacloudapi.cn", name) {
        CloudLocation::China { account: name }
    } else {
        CloudLocation::Custom {
            account: name,
            uri: account.as_str().to_string(),
        }
    }
}

/// One authenticated container
pub struct AzureBlobContainer {
    client: ContainerClient,
    container: ContainerName,
}

#[async_trait]
impl BlobContainer for AzureBlobContainer {
    fn container_name(&self) -> &ContainerName {
        &self.container
    }

    #[instrument(skip_all, fields(container = %self.container, blob = %blob))]
    async fn download(&self, blob: &BlobName) -> Result<BlobStream, BlobStorageError> {
        let blob_client = self.client.blob_client(blob.as_str());
        let mut pages = blob_client.get().into_stream();

        // The first page surfaces not-found and permission failures before
        // any bytes are handed to the caller.
        let first = match pages.next().await {
            Some(Ok(response)) => response
                .data
                .collect()
                .await
                .map_err(|e| map_azure_error(&e, &self.container, Some(blob)))?,
            Some(Err(e)) => return Err(map_azure_error(&e, &self.container, Some(blob))),
            None => Bytes::new(),
        };
        debug!(first_chunk_bytes = first.len(), "Opened blob stream");

        let container = self.container.clone();
        let name = blob.clone();
        let rest = pages.then(move |page| {
            let container = container.clone();
            let name = name.clone();
            async move {
                match page {
                    Ok(response) => response
                        .data
                        .collect()
                        .await
                        .map_err(|e| map_azure_error(&e, &container, Some(&name))),
                    Err(e) => Err(map_azure_error(&e, &container, Some(&name))),
                }
            }
        });

        let chunks = stream::once(async move { Ok(first) }).chain(rest);
        Ok(BlobStream::new(blob.clone(), chunks.boxed()))
    }

    #[instrument(skip_all, fields(container = %self.container, blob = %blob, size_bytes = data.len()))]
    async fn upload(&self, blob: &BlobName, data: Bytes) -> Result<(), BlobStorageError> {
        self.client
            .blob_client(blob.as_str())
            .put_block_blob(Body::from(data))
            .content_type("application/octet-stream")
            .await
            .map(|_| ())
            .map_err(|e| map_azure_error(&e, &self.container, Some(blob)))?;

        info!("Uploaded blob");
        Ok(())
    }
}

fn map_azure_error(
    error: &azure_core::Error,
    container: &ContainerName,
    blob: Option<&BlobName>,
) -> BlobStorageError {
    let status = error.as_http_error().map(|e| e.status());
    let message = error.to_string();
    warn!(status = ?status, error = %message, "Azure blob request failed");
    classify_status(status, message, container, blob)
}

/// Map an HTTP status (if any) onto `BlobStorageError`
pub(crate) fn classify_status(
    status: Option<StatusCode>,
    message: String,
    container: &ContainerName,
    blob: Option<&BlobName>,
) -> BlobStorageError {
    match status {
        Some(StatusCode::NotFound) => match blob {
            Some(blob) if !message.contains("ContainerNotFound") => {
                BlobStorageError::BlobNotFound {
                    container: container.to_string(),
                    blob: blob.to_string(),
                }
            }
            _ => BlobStorageError::ContainerNotFound {
                container: container.to_string(),
            },
        },
        Some(StatusCode::Unauthorized) => BlobStorageError::AuthenticationFailed { message },
        Some(StatusCode::Forbidden) => {
            if message.contains("AuthenticationFailed") {
                BlobStorageError::AuthenticationFailed { message }
            } else {
                BlobStorageError::PermissionDenied { operation: message }
            }
        }
        Some(StatusCode::RequestTimeout) | Some(StatusCode::GatewayTimeout) => {
            BlobStorageError::Timeout { timeout_ms: 0 }
        }
        Some(_) => BlobStorageError::InternalError { message },
        None => BlobStorageError::ConnectionFailed { message },
    }
}

#[cfg(test)]
#[path = "azure_blob_storage_tests.rs"]
mod tests;
