//! Common fixtures for pipeline-utils integration tests
//!
//! Provides a vault holding one storage account key and blob backends that
//! accept it, plus sample tables and process-log records.

use chrono::NaiveDate;
use pipeline_utils_core::adapters::{FilesystemBlobService, InMemoryBlobService, InMemorySecretStore};
use pipeline_utils_core::{
    BlobName, BlobUrl, CellValue, ContainerName, ProcessLogRecord, SecretName, SecretValue,
    StorageAccountUrl, Table,
};
use std::path::Path;
use std::sync::Arc;

pub const ACCOUNT_URL: &str = "https://etlstorage.blob.core.windows.net";
pub const ACCOUNT_KEY: &str = "c3RvcmFnZS1hY2NvdW50LWtleQ==";

/// Vault, account and container shared by the blob tests
#[allow(dead_code)]
pub struct StorageFixture {
    pub vault: Arc<InMemorySecretStore>,
    pub account: StorageAccountUrl,
    pub container: ContainerName,
    pub key_name: SecretName,
}

#[allow(dead_code)]
impl StorageFixture {
    pub fn new() -> Self {
        let vault = Arc::new(InMemorySecretStore::new("https://etl-kv.vault.azure.net/"));
        let key_name = SecretName::new("storage-account-key").unwrap();
        vault.add_secret(
            key_name.clone(),
            SecretValue::from_string(ACCOUNT_KEY.to_string()),
        );

        Self {
            vault,
            account: StorageAccountUrl::parse(ACCOUNT_URL).unwrap(),
            container: ContainerName::new("raw").unwrap(),
            key_name,
        }
    }

    /// In-memory blob service with the container created; small chunks force
    /// multi-chunk streams
    pub fn memory_blobs(&self) -> InMemoryBlobService {
        let blobs = InMemoryBlobService::new().with_chunk_size(7);
        blobs.create_container(&self.account, &self.container);
        blobs.set_account_key(&self.account, ACCOUNT_KEY);
        blobs
    }

    /// Filesystem blob service rooted at `dir` with the container directory created
    pub async fn filesystem_blobs(&self, dir: &Path) -> FilesystemBlobService {
        let blobs = FilesystemBlobService::new(dir.to_path_buf()).await.unwrap();
        std::fs::create_dir_all(blobs.container_path(&self.account, &self.container)).unwrap();
        blobs
    }

    pub fn blob(&self, name: &str) -> BlobName {
        BlobName::new(name).unwrap()
    }

    pub fn blob_url(&self, name: &str) -> BlobUrl {
        BlobUrl::new(self.account.clone(), self.container.clone(), self.blob(name))
    }
}

/// Three-row product table with mixed cell types
#[allow(dead_code)]
pub fn products() -> Table {
    let mut table = Table::new(vec![
        "id".to_string(),
        "name".to_string(),
        "price".to_string(),
        "active".to_string(),
    ]);
    let rows = [
        (1, "alpha", 9.5, true),
        (2, "beta, boxed", 12.25, false),
        (3, "gamma \"g\"", 7.0, true),
    ];
    for (id, name, price, active) in rows {
        table
            .push_row(vec![
                CellValue::Int(id),
                CellValue::from(name),
                CellValue::Float(price),
                CellValue::Bool(active),
            ])
            .unwrap();
    }
    table
}

/// Process log record for a completed load
#[allow(dead_code)]
pub fn process_record(error_message: Option<&str>) -> ProcessLogRecord {
    ProcessLogRecord {
        process_start_time: NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(7, 30, 0)
            .unwrap(),
        business_area: "Operations".to_string(),
        process_name: "Load Project Overview".to_string(),
        process_status: if error_message.is_some() {
            "Failed".to_string()
        } else {
            "Succeeded".to_string()
        },
        source_type: "Blob".to_string(),
        source: "Project Overview.xlsm".to_string(),
        source_location: "raw/Sources/XLS/OPS/In".to_string(),
        target_type: "Table".to_string(),
        target: "stg.ProjectOverview".to_string(),
        target_location: "etl".to_string(),
        object_type: "File".to_string(),
        object_name: "Project Overview.xlsm".to_string(),
        rows_processed: 120,
        process_message: "Loaded".to_string(),
        rows_skipped: 3,
        error_message: error_message.map(str::to_string),
    }
}
