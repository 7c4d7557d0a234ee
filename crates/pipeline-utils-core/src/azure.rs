//! # Azure Entry Points
//!
//! Credential construction and the one-call helpers that wire the Azure
//! adapters together. Everything here needs the `azure` feature.

use crate::adapters::AzureKeyVault;
use crate::credential::{
    select_credential_kind, CredentialKind, RuntimeEnvironment, DEFAULT_DEV_VM_MARKER,
};
use crate::key_vault::{KeyVaultError, SecretName, SecretStore, SecretValue};
use azure_core::auth::TokenCredential;
use azure_identity::{AzureCliCredential, DefaultAzureCredential, TokenCredentialOptions};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

/// Token provider chosen for the running process
#[derive(Clone)]
pub struct Credential {
    kind: CredentialKind,
    inner: Arc<dyn TokenCredential>,
}

impl Credential {
    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    /// The SDK credential, for building other Azure clients
    pub fn token_credential(&self) -> Arc<dyn TokenCredential> {
        Arc::clone(&self.inner)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Build the credential for the current process
///
/// # Errors
/// Returns `KeyVaultError::AuthenticationFailed` with the provider's message
/// if the credential cannot be constructed.
pub fn get_credential() -> Result<Credential, KeyVaultError> {
    get_credential_for(&RuntimeEnvironment::detect(), DEFAULT_DEV_VM_MARKER)
}

/// Build the credential for an explicit environment and dev-VM marker
#[instrument(skip_all, fields(os = ?env.os))]
pub fn get_credential_for(
    env: &RuntimeEnvironment,
    dev_vm_marker: &str,
) -> Result<Credential, KeyVaultError> {
    let kind = select_credential_kind(env, dev_vm_marker);

    let inner: Arc<dyn TokenCredential> = match kind {
        CredentialKind::Default => Arc::new(
            DefaultAzureCredential::create(TokenCredentialOptions::default()).map_err(|e| {
                KeyVaultError::AuthenticationFailed {
                    message: e.to_string(),
                }
            })?,
        ),
        CredentialKind::AzureCli => Arc::new(AzureCliCredential::new()),
    };

    info!(credential = %kind, "Created Azure credential");
    Ok(Credential { kind, inner })
}

/// Fetch one secret from `vault_url`
///
/// Opens a fresh vault client per call; nothing is cached.
pub async fn get_secret(
    vault_url: &str,
    secret_name: &SecretName,
    credential: &Credential,
) -> Result<SecretValue, KeyVaultError> {
    let vault = AzureKeyVault::new(vault_url, credential.token_credential())?;
    vault.get_secret(secret_name).await
}
