//! # Credential Selection
//!
//! Decides which Azure credential strategy applies to the current process.
//!
//! Hosts running Linux (pipeline agents, containers) and the shared Windows
//! development VMs use the managed-identity-aware default chain. Any other
//! workstation falls back to the Azure CLI login (`az login`).
//!
//! The decision is a pure function over [`RuntimeEnvironment`] so it can be
//! tested without touching Azure. Building the actual credential object lives
//! in `crate::azure` behind the `azure` feature.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Path fragment identifying the shared Windows development VMs
pub const DEFAULT_DEV_VM_MARKER: &str = "DeveloperCDH";

/// Operating system family of the running process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsFamily {
    Linux,
    Windows,
    MacOs,
    Other,
}

impl OsFamily {
    /// Family of the platform this binary was compiled for
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Self::Linux
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Other
        }
    }
}

/// Facts about the running process used to pick a credential strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnvironment {
    /// Operating system family
    pub os: OsFamily,

    /// Directory the process was launched from (executable directory)
    pub launch_dir: PathBuf,
}

impl RuntimeEnvironment {
    /// Create environment description from explicit parts
    pub fn new(os: OsFamily, launch_dir: impl Into<PathBuf>) -> Self {
        Self {
            os,
            launch_dir: launch_dir.into(),
        }
    }

    /// Detect the environment of the current process
    ///
    /// Uses the directory of the running executable, falling back to the
    /// working directory when the executable path is unavailable.
    pub fn detect() -> Self {
        let launch_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();

        Self {
            os: OsFamily::current(),
            launch_dir,
        }
    }

    /// Check whether the launch directory carries the dev-VM marker
    pub fn is_dev_vm(&self, marker: &str) -> bool {
        !marker.is_empty() && self.launch_dir.to_string_lossy().contains(marker)
    }
}

/// Credential strategy to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialKind {
    /// Default chain: environment, managed identity, then developer tools
    Default,
    /// Token from the locally logged-in Azure CLI
    AzureCli,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::AzureCli => f.write_str("azure-cli"),
        }
    }
}

/// Select the credential strategy for an environment
///
/// - Linux hosts → [`CredentialKind::Default`]
/// - Windows hosts launched from a path containing `dev_vm_marker` →
///   [`CredentialKind::Default`]
/// - Everything else → [`CredentialKind::AzureCli`]
pub fn select_credential_kind(env: &RuntimeEnvironment, dev_vm_marker: &str) -> CredentialKind {
    let kind = match env.os {
        OsFamily::Linux => CredentialKind::Default,
        OsFamily::Windows if env.is_dev_vm(dev_vm_marker) => CredentialKind::Default,
        _ => CredentialKind::AzureCli,
    };

    debug!(
        os = ?env.os,
        launch_dir = %env.launch_dir.display(),
        credential = %kind,
        "Selected credential strategy"
    );

    kind
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
