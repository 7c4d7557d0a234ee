//! Integration tests for blob transfer operations
//!
//! These tests verify:
//! - Stream and file downloads return identical bytes
//! - Table uploads read back with the same columns and values for any separator
//! - Repeated uploads to one URL overwrite cleanly
//! - The access-key cache bounds vault lookups

mod common;

use bytes::Bytes;
use common::{products, StorageFixture};
use pipeline_utils_core::adapters::{InMemorySecretCache, InMemorySecretStore};
use pipeline_utils_core::blob_storage::compute_checksum;
use pipeline_utils_core::key_vault::DEFAULT_CACHE_TTL;
use pipeline_utils_core::{BlobStorageError, BlobTransfer, SecretStore, Table};
use std::sync::Arc;
use tempfile::TempDir;

fn payload() -> Bytes {
    Bytes::from((0..10_000u32).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

/// Verify that stream and file downloads of the same blob are byte-identical
#[tokio::test]
async fn test_stream_and_file_downloads_match() {
    let fixture = StorageFixture::new();
    let blobs = fixture.memory_blobs();
    let blob = fixture.blob("Sources/XLS/OPS/In/overview.bin");
    blobs.put_blob(&fixture.account, &fixture.container, &blob, payload());
    let transfer = BlobTransfer::new(fixture.vault.clone(), Arc::new(blobs));

    let streamed = transfer
        .download_to_stream(&fixture.account, &fixture.container, &fixture.key_name, &blob)
        .await
        .expect("stream download")
        .collect_bytes()
        .await
        .expect("stream collect");

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("overview.bin");
    let summary = transfer
        .download_to_file(
            &fixture.account,
            &fixture.container,
            &fixture.key_name,
            &blob,
            &path,
        )
        .await
        .expect("file download");

    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(streamed.as_ref(), on_disk.as_slice());
    assert_eq!(summary.size_bytes, on_disk.len() as u64);
    assert_eq!(summary.checksum_sha256, compute_checksum(&on_disk));
}

/// Verify the same property against the filesystem backend
#[tokio::test]
async fn test_filesystem_backend_downloads_match() {
    let fixture = StorageFixture::new();
    let dir = TempDir::new().unwrap();
    let blobs = fixture.filesystem_blobs(&dir.path().join("blobs")).await;
    let transfer = BlobTransfer::new(fixture.vault.clone(), Arc::new(blobs));
    let url = fixture.blob_url("exports/large.bin");

    transfer
        .upload_object(payload(), &url, &fixture.key_name)
        .await
        .unwrap();

    let streamed = transfer
        .download_to_stream(&url.account, &url.container, &fixture.key_name, &url.blob)
        .await
        .unwrap()
        .collect_bytes()
        .await
        .unwrap();

    let target = dir.path().join("large.bin");
    transfer
        .download_to_file(
            &url.account,
            &url.container,
            &fixture.key_name,
            &url.blob,
            &target,
        )
        .await
        .unwrap();

    assert_eq!(streamed, payload());
    assert_eq!(std::fs::read(&target).unwrap(), payload().to_vec());
}

/// Verify table round trips keep column order and values for several separators
#[tokio::test]
async fn test_table_round_trip_for_each_separator() {
    let fixture = StorageFixture::new();
    let blobs = fixture.memory_blobs();
    let transfer = BlobTransfer::new(fixture.vault.clone(), Arc::new(blobs.clone()));
    let table = products();

    for (index, separator) in [',', ';', '|', '\t'].into_iter().enumerate() {
        let url = fixture.blob_url(&format!("tables/products-{index}.csv"));
        transfer
            .upload_table(&table, &url, &fixture.key_name, separator)
            .await
            .unwrap();

        let stored = blobs
            .get_blob(&url.account, &url.container, &url.blob)
            .expect("uploaded blob");
        let read_back = Table::from_delimited(&stored, separator).unwrap();

        assert_eq!(read_back.columns(), table.columns(), "separator {separator:?}");
        assert_eq!(read_back.rows(), table.rows(), "separator {separator:?}");
    }
}

/// Verify that uploading the same object twice succeeds and leaves it unchanged
#[tokio::test]
async fn test_repeated_upload_is_idempotent() {
    let fixture = StorageFixture::new();
    let blobs = fixture.memory_blobs();
    let transfer = BlobTransfer::new(fixture.vault.clone(), Arc::new(blobs.clone()));
    let url = fixture.blob_url("curated/summary.json");
    let data = Bytes::from_static(br#"{"rows":120}"#);

    let first = transfer
        .upload_object(data.clone(), &url, &fixture.key_name)
        .await
        .unwrap();
    let second = transfer
        .upload_object(data.clone(), &url, &fixture.key_name)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(blobs.blob_count(&url.account, &url.container), 1);
    assert_eq!(
        blobs.get_blob(&url.account, &url.container, &url.blob),
        Some(data)
    );
}

/// Verify that a missing blob is reported as not found by both download paths
#[tokio::test]
async fn test_missing_blob_is_not_found() {
    let fixture = StorageFixture::new();
    let transfer = BlobTransfer::new(fixture.vault.clone(), Arc::new(fixture.memory_blobs()));
    let blob = fixture.blob("missing.csv");
    let dir = TempDir::new().unwrap();

    let stream = transfer
        .download_to_stream(&fixture.account, &fixture.container, &fixture.key_name, &blob)
        .await;
    assert!(matches!(stream, Err(BlobStorageError::BlobNotFound { .. })));

    let file = transfer
        .download_to_file(
            &fixture.account,
            &fixture.container,
            &fixture.key_name,
            &blob,
            &dir.path().join("missing.csv"),
        )
        .await;
    assert!(matches!(file, Err(BlobStorageError::BlobNotFound { .. })));
}

/// Verify vault lookups with and without the access-key cache
#[tokio::test]
async fn test_access_key_cache_bounds_vault_lookups() {
    const CONNECTIONS: u64 = 5;

    let fixture = StorageFixture::new();
    let blobs = fixture.memory_blobs();

    let uncached = BlobTransfer::new(fixture.vault.clone(), Arc::new(blobs.clone()));
    for _ in 0..CONNECTIONS {
        uncached
            .connect_container(&fixture.account, &fixture.container, &fixture.key_name)
            .await
            .unwrap();
    }
    assert_eq!(fixture.vault.lookup_count(), CONNECTIONS);

    let vault = Arc::new(InMemorySecretStore::new(fixture.vault.vault_url()));
    vault.add_secret(
        fixture.key_name.clone(),
        fixture.vault.get_secret(&fixture.key_name).await.unwrap(),
    );
    let cached = BlobTransfer::new(vault.clone(), Arc::new(blobs))
        .with_access_key_cache(Arc::new(InMemorySecretCache::new()), DEFAULT_CACHE_TTL);
    for _ in 0..CONNECTIONS {
        cached
            .connect_container(&fixture.account, &fixture.container, &fixture.key_name)
            .await
            .unwrap();
    }
    assert_eq!(vault.lookup_count(), 1);
}
