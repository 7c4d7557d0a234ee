//! Tests for Azure Key Vault error classification.

use super::*;
use crate::ErrorKind;

fn name() -> SecretName {
    SecretName::new("storage-account-key").unwrap()
}

#[test]
fn test_not_found_maps_to_secret_not_found() {
    let err = classify_vault_error(&name(), "HTTP error status 404 (SecretNotFound)".into(), 30);
    assert!(matches!(err, KeyVaultError::SecretNotFound { ref name } if name.as_str() == "storage-account-key"));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_forbidden_maps_to_access_denied() {
    let err = classify_vault_error(&name(), "server returned 403 Forbidden".into(), 30);
    assert!(err.is_permission_error());
    assert!(!err.is_transient());
}

#[test]
fn test_timeout_carries_configured_seconds() {
    let err = classify_vault_error(&name(), "operation timeout".into(), 12);
    assert!(matches!(err, KeyVaultError::Timeout { timeout_seconds: 12 }));
}

#[test]
fn test_throttling_and_outage_are_transient() {
    let throttled = classify_vault_error(&name(), "429 TooManyRequests".into(), 30);
    assert!(matches!(throttled, KeyVaultError::RateLimitExceeded { .. }));
    assert!(throttled.is_transient());

    let outage = classify_vault_error(&name(), "503 ServiceUnavailable".into(), 30);
    assert!(matches!(outage, KeyVaultError::ServiceUnavailable { .. }));
    assert!(outage.is_transient());
}

#[test]
fn test_unrecognised_message_is_internal() {
    let err = classify_vault_error(&name(), "connection reset by peer".into(), 30);
    assert!(matches!(err, KeyVaultError::Internal { .. }));
}
