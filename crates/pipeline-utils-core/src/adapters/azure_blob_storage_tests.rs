//! Tests for Azure blob status classification.

use super::*;
use crate::ErrorKind;

fn container() -> ContainerName {
    ContainerName::new("raw").unwrap()
}

fn blob() -> BlobName {
    BlobName::new("Sources/XLS/OPS/In/file.xlsm").unwrap()
}

#[test]
fn test_not_found_on_blob_is_blob_not_found() {
    let err = classify_status(
        Some(StatusCode::NotFound),
        "BlobNotFound".to_string(),
        &container(),
        Some(&blob()),
    );
    assert!(matches!(err, BlobStorageError::BlobNotFound { ref blob, .. } if blob == "Sources/XLS/OPS/In/file.xlsm"));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_missing_container_wins_over_blob() {
    let err = classify_status(
        Some(StatusCode::NotFound),
        "ContainerNotFound".to_string(),
        &container(),
        Some(&blob()),
    );
    assert!(matches!(err, BlobStorageError::ContainerNotFound { .. }));

    let err = classify_status(Some(StatusCode::NotFound), String::new(), &container(), None);
    assert!(matches!(err, BlobStorageError::ContainerNotFound { .. }));
}

#[test]
fn test_bad_key_is_authentication_failure() {
    let err = classify_status(
        Some(StatusCode::Forbidden),
        "AuthenticationFailed: signature mismatch".to_string(),
        &container(),
        None,
    );
    assert!(matches!(err, BlobStorageError::AuthenticationFailed { .. }));
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let err = classify_status(
        Some(StatusCode::Forbidden),
        "AuthorizationPermissionMismatch".to_string(),
        &container(),
        Some(&blob()),
    );
    assert!(matches!(err, BlobStorageError::PermissionDenied { .. }));
}

#[test]
fn test_transport_failure_is_transient() {
    let err = classify_status(None, "connection refused".to_string(), &container(), None);
    assert!(matches!(err, BlobStorageError::ConnectionFailed { .. }));
    assert!(err.is_transient());
}

fn location(url: &str) -> CloudLocation {
    cloud_location(&StorageAccountUrl::parse(url).unwrap())
}

#[test]
fn test_public_account_url_maps_to_public_cloud() {
    let location = location("https://etlstorage.blob.core.windows.net");
    assert!(matches!(location, CloudLocation::Public { ref account } if account == "etlstorage"));
}

#[test]
fn test_china_account_url_maps_to_china_cloud() {
    let location = location("https://etlstorage.blob.core.chinacloudapi.cn");
    assert!(matches!(location, CloudLocation::China { ref account } if account == "etlstorage"));
}

#[test]
fn test_other_hosts_keep_their_endpoint() {
    let gov = location("https://etlstorage.blob.core.usgovcloudapi.net");
    assert!(matches!(
        gov,
        CloudLocation::Custom { ref account, ref uri }
            if account == "etlstorage" && uri == "https://etlstorage.blob.core.usgovcloudapi.net"
    ));

    let local = location("http://localhost:10000");
    let url = local
        .url(azure_storage::clients::ServiceType::Blob)
        .unwrap();
    assert_eq!(url.host_str(), Some("localhost"));
    assert_eq!(url.port(), Some(10000));
}
