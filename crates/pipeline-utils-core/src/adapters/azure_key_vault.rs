//! # Azure Key Vault Implementation
//!
//! Secret lookups against a real vault using the Azure SDK. The credential is
//! supplied by the caller so the same vault client works with
//! `DefaultAzureCredential` in Azure and the Azure CLI on a development VM.

use crate::key_vault::{KeyVaultError, SecretName, SecretStore, SecretValue};
use async_trait::async_trait;
use azure_core::auth::TokenCredential;
use azure_security_keyvault::SecretClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Upper bound on a single secret request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Seconds a throttled caller is told to wait; Key Vault usually asks for 60
const THROTTLE_RETRY_AFTER_SECONDS: u64 = 60;

/// Secret store backed by one Azure Key Vault
pub struct AzureKeyVault {
    client: SecretClient,
    vault_url: String,
    request_timeout: Duration,
}

impl AzureKeyVault {
    /// Create a vault client for `vault_url`
    ///
    /// # Errors
    /// Returns `KeyVaultError::Configuration` if the URL is empty or the SDK
    /// rejects it.
    #[instrument(skip_all, fields(vault_url = %vault_url))]
    pub fn new(
        vault_url: &str,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, KeyVaultError> {
        if vault_url.is_empty() {
            return Err(KeyVaultError::Configuration {
                message: "vault_url is required".to_string(),
            });
        }

        let client = SecretClient::new(vault_url, credential).map_err(|e| {
            KeyVaultError::Configuration {
                message: format!("Failed to create Key Vault client: {}", e),
            }
        })?;

        info!("Initialized Azure Key Vault client");

        Ok(Self {
            client,
            vault_url: vault_url.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Override the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl SecretStore for AzureKeyVault {
    fn vault_url(&self) -> &str {
        &self.vault_url
    }

    #[instrument(skip_all, fields(vault_url = %self.vault_url, secret_name = %name))]
    async fn get_secret(&self, name: &SecretName) -> Result<SecretValue, KeyVaultError> {
        debug!("Fetching secret from Azure Key Vault");

        let timeout_seconds = self.request_timeout.as_secs();
        let response = tokio::time::timeout(self.request_timeout, self.client.get(name.as_str()))
            .await
            .map_err(|_| KeyVaultError::Timeout { timeout_seconds })?;

        match response {
            Ok(secret) => {
                info!("Retrieved secret from Key Vault");
                Ok(SecretValue::from_string(secret.value.to_string()))
            }
            Err(e) => {
                let message = e.to_string();
                error!(error = %message, "Failed to retrieve secret from Key Vault");
                Err(classify_vault_error(name, message, timeout_seconds))
            }
        }
    }
}

/// Map an SDK error message onto `KeyVaultError`
///
/// The SDK surfaces HTTP failures as formatted strings, so status codes and
/// reason phrases are matched textually.
pub(crate) fn classify_vault_error(
    name: &SecretName,
    message: String,
    timeout_seconds: u64,
) -> KeyVaultError {
    if message.contains("404") || message.contains("NotFound") || message.contains("SecretNotFound")
    {
        KeyVaultError::SecretNotFound { name: name.clone() }
    } else if message.contains("403")
        || message.contains("Forbidden")
        || message.contains("Unauthorized")
        || message.contains("401")
    {
        KeyVaultError::AccessDenied {
            name: name.clone(),
            reason: message,
        }
    } else if message.contains("timeout")
        || message.contains("Timeout")
        || message.contains("deadline")
    {
        KeyVaultError::Timeout { timeout_seconds }
    } else if message.contains("429")
        || message.contains("TooManyRequests")
        || message.contains("throttl")
    {
        KeyVaultError::RateLimitExceeded {
            retry_after_seconds: THROTTLE_RETRY_AFTER_SECONDS,
        }
    } else if message.contains("503")
        || message.contains("ServiceUnavailable")
        || message.contains("unavailable")
    {
        KeyVaultError::ServiceUnavailable { message }
    } else if message.contains("credential") || message.contains("token") {
        KeyVaultError::AuthenticationFailed { message }
    } else {
        KeyVaultError::Internal { message }
    }
}

#[cfg(test)]
#[path = "azure_key_vault_tests.rs"]
mod tests;
