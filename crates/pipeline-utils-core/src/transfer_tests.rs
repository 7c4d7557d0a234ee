//! Tests for blob transfer operations.

use super::*;
use crate::adapters::memory_blob_storage::InMemoryBlobService;
use crate::adapters::memory_key_vault::{InMemorySecretCache, InMemorySecretStore};
use crate::key_vault::{KeyVaultError, SecretValue, DEFAULT_CACHE_TTL};
use crate::table::CellValue;
use tempfile::TempDir;

const ACCOUNT: &str = "https://etlstorage.blob.core.windows.net";

struct Fixture {
    vault: Arc<InMemorySecretStore>,
    blobs: InMemoryBlobService,
    account: StorageAccountUrl,
    container: ContainerName,
    key_name: SecretName,
}

impl Fixture {
    fn new() -> Self {
        let vault = Arc::new(InMemorySecretStore::new("https://etl.vault.azure.net/"));
        let key_name = SecretName::new("storage-account-key").unwrap();
        vault.add_secret(
            key_name.clone(),
            SecretValue::from_string("account-key".to_string()),
        );

        let blobs = InMemoryBlobService::new().with_chunk_size(4);
        let account = StorageAccountUrl::parse(ACCOUNT).unwrap();
        let container = ContainerName::new("raw").unwrap();
        blobs.create_container(&account, &container);
        blobs.set_account_key(&account, "account-key");

        Self {
            vault,
            blobs,
            account,
            container,
            key_name,
        }
    }

    fn transfer(&self) -> BlobTransfer {
        BlobTransfer::new(self.vault.clone(), Arc::new(self.blobs.clone()))
    }

    fn blob_url(&self, blob: &str) -> BlobUrl {
        BlobUrl::new(
            self.account.clone(),
            self.container.clone(),
            BlobName::new(blob).unwrap(),
        )
    }
}

// ============================================================================
// Connect Tests
// ============================================================================

#[tokio::test]
async fn test_connect_container_looks_up_key_each_call() {
    let fixture = Fixture::new();
    let transfer = fixture.transfer();

    for _ in 0..3 {
        transfer
            .connect_container(&fixture.account, &fixture.container, &fixture.key_name)
            .await
            .unwrap();
    }

    assert_eq!(fixture.vault.lookup_count(), 3);
    assert_eq!(fixture.blobs.connect_count(), 3);
}

#[tokio::test]
async fn test_connect_container_with_cache_looks_up_key_once() {
    let fixture = Fixture::new();
    let transfer = fixture
        .transfer()
        .with_access_key_cache(Arc::new(InMemorySecretCache::new()), DEFAULT_CACHE_TTL);

    for _ in 0..3 {
        transfer
            .connect_container(&fixture.account, &fixture.container, &fixture.key_name)
            .await
            .unwrap();
    }

    assert_eq!(fixture.vault.lookup_count(), 1);
    assert_eq!(fixture.blobs.connect_count(), 3);
}

#[tokio::test]
async fn test_connect_container_missing_secret() {
    let fixture = Fixture::new();
    let missing = SecretName::new("no-such-key").unwrap();

    let result = fixture
        .transfer()
        .connect_container(&fixture.account, &fixture.container, &missing)
        .await;

    match result {
        Err(BlobStorageError::AccessKey(KeyVaultError::SecretNotFound { name })) => {
            assert_eq!(name, missing);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected missing secret to fail"),
    }
}

#[tokio::test]
async fn test_connect_container_denied_secret_is_authorization() {
    let fixture = Fixture::new();
    fixture.vault.deny_access(fixture.key_name.clone());

    let err = fixture
        .transfer()
        .connect_container(&fixture.account, &fixture.container, &fixture.key_name)
        .await
        .err()
        .unwrap();

    assert_eq!(err.kind(), crate::ErrorKind::Authorization);
}

// ============================================================================
// Download Tests
// ============================================================================

#[tokio::test]
async fn test_download_to_stream_and_file_match() {
    let fixture = Fixture::new();
    let blob = BlobName::new("Sources/OPS/overview.xlsm").unwrap();
    let content = b"binary workbook content \x00\x01\x02".to_vec();
    fixture
        .blobs
        .put_blob(&fixture.account, &fixture.container, &blob, content.clone());
    let transfer = fixture.transfer();

    let streamed = transfer
        .download_to_stream(&fixture.account, &fixture.container, &fixture.key_name, &blob)
        .await
        .unwrap()
        .collect_bytes()
        .await
        .unwrap();

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("overview.xlsm");
    let summary = transfer
        .download_to_file(
            &fixture.account,
            &fixture.container,
            &fixture.key_name,
            &blob,
            &path,
        )
        .await
        .unwrap();

    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(streamed.as_ref(), content.as_slice());
    assert_eq!(on_disk, content);
    assert_eq!(summary.size_bytes, content.len() as u64);
    assert_eq!(summary.checksum_sha256, compute_checksum(&content));
    assert_eq!(summary.blob_name, "Sources/OPS/overview.xlsm");
}

#[tokio::test]
async fn test_download_to_file_overwrites_existing_file() {
    let fixture = Fixture::new();
    let blob = BlobName::new("small.txt").unwrap();
    fixture
        .blobs
        .put_blob(&fixture.account, &fixture.container, &blob, &b"new"[..]);

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("small.txt");
    std::fs::write(&path, b"much longer old content").unwrap();

    fixture
        .transfer()
        .download_to_file(
            &fixture.account,
            &fixture.container,
            &fixture.key_name,
            &blob,
            &path,
        )
        .await
        .unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), b"new");
}

#[tokio::test]
async fn test_download_missing_blob_does_not_create_file() {
    let fixture = Fixture::new();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("missing.csv");

    let result = fixture
        .transfer()
        .download_to_file(
            &fixture.account,
            &fixture.container,
            &fixture.key_name,
            &BlobName::new("missing.csv").unwrap(),
            &path,
        )
        .await;

    assert!(matches!(result, Err(BlobStorageError::BlobNotFound { .. })));
    assert!(!path.exists());
}

#[tokio::test]
async fn test_download_to_file_bad_local_path() {
    let fixture = Fixture::new();
    let blob = BlobName::new("small.txt").unwrap();
    fixture
        .blobs
        .put_blob(&fixture.account, &fixture.container, &blob, &b"data"[..]);

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("no-such-dir").join("small.txt");

    let err = fixture
        .transfer()
        .download_to_file(
            &fixture.account,
            &fixture.container,
            &fixture.key_name,
            &blob,
            &path,
        )
        .await
        .err()
        .unwrap();

    assert!(matches!(err, BlobStorageError::LocalIo { .. }));
    assert_eq!(err.kind(), crate::ErrorKind::Io);
}

// ============================================================================
// Upload Tests
// ============================================================================

#[tokio::test]
async fn test_upload_object_overwrites() {
    let fixture = Fixture::new();
    let url = fixture.blob_url("out/data.bin");
    let transfer = fixture.transfer();

    transfer
        .upload_object(Bytes::from_static(b"v1"), &url, &fixture.key_name)
        .await
        .unwrap();
    let summary = transfer
        .upload_object(Bytes::from_static(b"v2"), &url, &fixture.key_name)
        .await
        .unwrap();

    assert_eq!(summary.size_bytes, 2);
    assert_eq!(
        fixture
            .blobs
            .get_blob(&fixture.account, &fixture.container, &url.blob)
            .unwrap(),
        Bytes::from_static(b"v2")
    );
}

#[tokio::test]
async fn test_upload_table_writes_delimited_text() {
    let fixture = Fixture::new();
    let url = fixture.blob_url("out/products.csv");

    let mut table = Table::new(vec!["id".to_string(), "name".to_string()]);
    table
        .push_row(vec![CellValue::Int(1), CellValue::from("alpha")])
        .unwrap();
    table
        .push_row(vec![CellValue::Int(2), CellValue::Null])
        .unwrap();

    fixture
        .transfer()
        .upload_table(&table, &url, &fixture.key_name, ';')
        .await
        .unwrap();

    let stored = fixture
        .blobs
        .get_blob(&fixture.account, &fixture.container, &url.blob)
        .unwrap();
    assert_eq!(stored, Bytes::from_static(b"id;name\n1;alpha\n2;\n"));
}

#[tokio::test]
async fn test_upload_table_invalid_separator() {
    let fixture = Fixture::new();
    let table = Table::new(vec!["id".to_string()]);

    let result = fixture
        .transfer()
        .upload_table(&table, &fixture.blob_url("out.csv"), &fixture.key_name, '\n')
        .await;

    assert!(matches!(
        result,
        Err(BlobStorageError::SerializationFailed { .. })
    ));
    assert_eq!(fixture.vault.lookup_count(), 0);
}
