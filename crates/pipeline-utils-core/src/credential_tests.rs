//! Tests for credential selection.

use super::*;

#[test]
fn test_linux_uses_default_chain() {
    let env = RuntimeEnvironment::new(OsFamily::Linux, "/opt/pipelines");
    assert_eq!(
        select_credential_kind(&env, DEFAULT_DEV_VM_MARKER),
        CredentialKind::Default
    );
}

#[test]
fn test_windows_dev_vm_uses_default_chain() {
    let env = RuntimeEnvironment::new(
        OsFamily::Windows,
        r"C:\Users\etl\DeveloperCDH\pipelines",
    );
    assert_eq!(
        select_credential_kind(&env, DEFAULT_DEV_VM_MARKER),
        CredentialKind::Default
    );
}

#[test]
fn test_windows_workstation_uses_cli_login() {
    let env = RuntimeEnvironment::new(OsFamily::Windows, r"C:\src\pipelines");
    assert_eq!(
        select_credential_kind(&env, DEFAULT_DEV_VM_MARKER),
        CredentialKind::AzureCli
    );
}

#[test]
fn test_macos_uses_cli_login() {
    let env = RuntimeEnvironment::new(OsFamily::MacOs, "/Users/dev/DeveloperCDH");
    assert_eq!(
        select_credential_kind(&env, DEFAULT_DEV_VM_MARKER),
        CredentialKind::AzureCli
    );
}

#[test]
fn test_empty_marker_never_matches() {
    let env = RuntimeEnvironment::new(OsFamily::Windows, r"C:\anything");
    assert!(!env.is_dev_vm(""));
    assert_eq!(select_credential_kind(&env, ""), CredentialKind::AzureCli);
}

#[test]
fn test_detect_reports_current_platform() {
    let env = RuntimeEnvironment::detect();
    assert_eq!(env.os, OsFamily::current());
}
