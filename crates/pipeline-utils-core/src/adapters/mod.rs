//! # Infrastructure Adapters
//!
//! Infrastructure implementations of the key vault, blob storage and
//! database interfaces.

pub mod filesystem_blob_storage;
pub mod memory_blob_storage;
pub mod memory_database;
pub mod memory_key_vault;

#[cfg(feature = "azure")]
pub mod azure_blob_storage;
#[cfg(feature = "azure")]
pub mod azure_key_vault;
#[cfg(feature = "mssql")]
pub mod mssql;

pub use filesystem_blob_storage::FilesystemBlobService;
pub use memory_blob_storage::InMemoryBlobService;
pub use memory_database::InMemoryDatabase;
pub use memory_key_vault::{InMemorySecretCache, InMemorySecretStore};

#[cfg(feature = "azure")]
pub use azure_blob_storage::AzureBlobServiceConnector;
#[cfg(feature = "azure")]
pub use azure_key_vault::AzureKeyVault;
#[cfg(feature = "mssql")]
pub use mssql::MssqlConnector;
