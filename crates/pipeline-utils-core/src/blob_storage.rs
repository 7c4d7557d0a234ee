//! # Blob Storage Interface
//!
//! Addressing types for storage accounts, containers and blobs, the
//! container abstraction the transfer operations run against, and the byte
//! stream returned by downloads.

use crate::key_vault::SecretValue;
use crate::ErrorKind;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

// ============================================================================
// Utility Functions
// ============================================================================

/// Compute SHA-256 checksum of data
///
/// Returns hex-encoded checksum string.
///
/// # Examples
///
/// ```
/// use pipeline_utils_core::blob_storage::compute_checksum;
///
/// let checksum = compute_checksum(b"test data");
/// assert_eq!(checksum.len(), 64); // SHA-256 hex is 64 characters
/// ```
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ============================================================================
// Addressing Types
// ============================================================================

/// Base URL of a storage account's blob endpoint
///
/// e.g. `https://etlstorage.blob.core.windows.net`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageAccountUrl(Url);

impl StorageAccountUrl {
    /// Parse and validate an account URL
    ///
    /// The URL must be absolute, use `http` or `https`, and carry no path
    /// beyond `/`.
    pub fn parse(value: &str) -> Result<Self, BlobStorageError> {
        let url = Url::parse(value).map_err(|e| BlobStorageError::InvalidUrl {
            url: value.to_string(),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "https" | "http") {
            return Err(BlobStorageError::InvalidUrl {
                url: value.to_string(),
                reason: "scheme must be https or http".to_string(),
            });
        }

        if url.host_str().is_none() {
            return Err(BlobStorageError::InvalidUrl {
                url: value.to_string(),
                reason: "missing host".to_string(),
            });
        }

        if !url.path().trim_matches('/').is_empty() {
            return Err(BlobStorageError::InvalidUrl {
                url: value.to_string(),
                reason: "account URL must not contain a path".to_string(),
            });
        }

        Ok(Self(url))
    }

    /// Storage account name (first label of the host)
    pub fn account_name(&self) -> &str {
        self.0
            .host_str()
            .and_then(|host| host.split('.').next())
            .unwrap_or_default()
    }

    /// Host name, without scheme or port
    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }

    /// URL without trailing slash
    pub fn as_str(&self) -> &str {
        self.0.as_str().trim_end_matches('/')
    }
}

impl fmt::Display for StorageAccountUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for StorageAccountUrl {
    type Error = BlobStorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StorageAccountUrl> for String {
    fn from(value: StorageAccountUrl) -> Self {
        value.as_str().to_string()
    }
}

/// Blob container name following Azure naming rules
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerName(String);

impl ContainerName {
    /// Create new container name with validation
    ///
    /// # Validation Rules
    /// - 3-63 characters
    /// - Lowercase letters, digits and hyphens only
    /// - Must start and end with a letter or digit, no consecutive hyphens
    pub fn new(name: impl Into<String>) -> Result<Self, BlobStorageError> {
        let name = name.into();
        let invalid = |reason: &str| BlobStorageError::InvalidContainerName {
            name: name.clone(),
            reason: reason.to_string(),
        };

        if name.len() < 3 || name.len() > 63 {
            return Err(invalid("container name must be 3-63 characters"));
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(invalid(
                "container name must contain only lowercase letters, digits and hyphens",
            ));
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(invalid(
                "container name cannot start or end with a hyphen or contain consecutive hyphens",
            ));
        }

        Ok(Self(name))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContainerName {
    type Error = BlobStorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContainerName> for String {
    fn from(value: ContainerName) -> Self {
        value.0
    }
}

/// Blob name (path inside a container)
///
/// e.g. `Raw/Sources/XLS/OPS/In/Project Overview.xlsm`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobName(String);

impl BlobName {
    /// Create new blob name with validation
    ///
    /// # Validation Rules
    /// - 1-1024 characters
    /// - Must not start with `/`
    pub fn new(name: impl Into<String>) -> Result<Self, BlobStorageError> {
        let name = name.into();

        if name.is_empty() || name.len() > 1024 {
            return Err(BlobStorageError::InvalidPath {
                path: name,
                reason: "blob name must be 1-1024 characters".to_string(),
            });
        }

        if name.starts_with('/') {
            return Err(BlobStorageError::InvalidPath {
                path: name,
                reason: "blob name must not start with '/'".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully qualified blob address
///
/// Parsed from `https://{account}.blob.core.windows.net/{container}/{blob}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobUrl {
    pub account: StorageAccountUrl,
    pub container: ContainerName,
    pub blob: BlobName,
}

impl BlobUrl {
    /// Build from parts
    pub fn new(account: StorageAccountUrl, container: ContainerName, blob: BlobName) -> Self {
        Self {
            account,
            container,
            blob,
        }
    }

    /// Parse a full blob URL
    ///
    /// The first path segment is the container; the rest (percent-decoded)
    /// is the blob name. Query strings are ignored.
    pub fn parse(value: &str) -> Result<Self, BlobStorageError> {
        let url = Url::parse(value).map_err(|e| BlobStorageError::InvalidUrl {
            url: value.to_string(),
            reason: e.to_string(),
        })?;

        let host = url.host_str().ok_or_else(|| BlobStorageError::InvalidUrl {
            url: value.to_string(),
            reason: "missing host".to_string(),
        })?;
        let origin = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        };
        let account = StorageAccountUrl::parse(&origin)?;

        let path = url.path().trim_start_matches('/');
        let (container, blob) = path.split_once('/').ok_or_else(|| BlobStorageError::InvalidUrl {
            url: value.to_string(),
            reason: "URL must contain a container and a blob name".to_string(),
        })?;

        let blob = urlencoding::decode(blob).map_err(|_| BlobStorageError::InvalidUrl {
            url: value.to_string(),
            reason: "blob name is not valid UTF-8".to_string(),
        })?;

        Ok(Self {
            account,
            container: ContainerName::new(container)?,
            blob: BlobName::new(blob.into_owned())?,
        })
    }
}

impl fmt::Display for BlobUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/", self.account, self.container)?;
        for (i, segment) in self.blob.as_str().split('/').enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(&urlencoding::encode(segment))?;
        }
        Ok(())
    }
}

// ============================================================================
// Streams and Summaries
// ============================================================================

/// Readable stream of blob content chunks
pub struct BlobStream {
    blob: BlobName,
    inner: BoxStream<'static, Result<Bytes, BlobStorageError>>,
}

impl BlobStream {
    /// Wrap a chunk stream for `blob`
    pub fn new(blob: BlobName, inner: BoxStream<'static, Result<Bytes, BlobStorageError>>) -> Self {
        Self { blob, inner }
    }

    /// Stream over an already buffered payload
    pub fn from_bytes(blob: BlobName, data: Bytes) -> Self {
        Self::new(blob, futures::stream::once(async move { Ok(data) }).boxed())
    }

    /// Name of the blob being read
    pub fn blob_name(&self) -> &BlobName {
        &self.blob
    }

    /// Next chunk, or `None` at end of blob
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, BlobStorageError>> {
        self.inner.next().await
    }

    /// Read the remaining content into memory
    pub async fn collect_bytes(mut self) -> Result<Bytes, BlobStorageError> {
        let mut buffer = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buffer))
    }
}

impl fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStream")
            .field("blob", &self.blob)
            .finish_non_exhaustive()
    }
}

/// Outcome of a completed upload or file download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    /// Blob the bytes were read from or written to
    pub blob_name: String,

    /// Number of bytes transferred
    pub size_bytes: u64,

    /// SHA-256 checksum of the transferred bytes (hex-encoded)
    pub checksum_sha256: String,
}

// ============================================================================
// Core Traits
// ============================================================================

/// A connected blob container
#[async_trait]
pub trait BlobContainer: Send + Sync {
    /// Name of this container
    fn container_name(&self) -> &ContainerName;

    /// Open a blob for reading
    ///
    /// # Errors
    /// - `BlobStorageError::BlobNotFound` if the blob does not exist
    async fn download(&self, blob: &BlobName) -> Result<BlobStream, BlobStorageError>;

    /// Write a blob, replacing any existing content unconditionally
    async fn upload(&self, blob: &BlobName, data: Bytes) -> Result<(), BlobStorageError>;
}

/// Factory for container clients authenticated with an account key
#[async_trait]
pub trait BlobServiceConnector: Send + Sync {
    /// Open a container-scoped client
    async fn connect(
        &self,
        account: &StorageAccountUrl,
        container: &ContainerName,
        access_key: &SecretValue,
    ) -> Result<Arc<dyn BlobContainer>, BlobStorageError>;
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during blob storage operations
#[derive(Debug, Error)]
pub enum BlobStorageError {
    /// Connection to storage service failed
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    /// Authentication with storage service failed
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Blob does not exist
    #[error("Blob not found: {container}/{blob}")]
    BlobNotFound { container: String, blob: String },

    /// Container does not exist
    #[error("Container not found: {container}")]
    ContainerNotFound { container: String },

    /// Permission denied for operation
    #[error("Permission denied: {operation}")]
    PermissionDenied { operation: String },

    /// Malformed account or blob URL
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Invalid container name
    #[error("Invalid container name {name}: {reason}")]
    InvalidContainerName { name: String, reason: String },

    /// Invalid blob path
    #[error("Invalid blob path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Access key could not be resolved from the vault
    #[error("Access key lookup failed: {0}")]
    AccessKey(#[from] crate::key_vault::KeyVaultError),

    /// Table serialization for upload failed
    #[error("Serialization failed: {message}")]
    SerializationFailed { message: String },

    /// Network timeout
    #[error("Network timeout: {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Local file could not be written
    #[error("Local file error at {path}: {source}")]
    LocalIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Internal storage error
    #[error("Internal storage error: {message}")]
    InternalError { message: String },
}

impl BlobStorageError {
    /// Check if error is transient and a caller-side retry could succeed
    ///
    /// Not-found, permission and validation errors are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::InternalError { .. } => {
                true
            }
            Self::AccessKey(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Map onto the crate-wide taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BlobNotFound { .. } | Self::ContainerNotFound { .. } => ErrorKind::NotFound,
            Self::AuthenticationFailed { .. } | Self::PermissionDenied { .. } => {
                ErrorKind::Authorization
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidUrl { .. }
            | Self::InvalidContainerName { .. }
            | Self::InvalidPath { .. } => ErrorKind::Configuration,
            Self::AccessKey(e) => e.kind(),
            Self::LocalIo { .. } => ErrorKind::Io,
            Self::ConnectionFailed { .. }
            | Self::SerializationFailed { .. }
            | Self::InternalError { .. } => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
#[path = "blob_storage_tests.rs"]
mod tests;
