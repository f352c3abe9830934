//! Plaintext recovery through the sealed-secrets controller
//!
//! The controller is the only holder of private keys. The relay hands it the
//! stored SealedSecret and receives the unsealed core/v1 Secret back; nothing
//! here decrypts locally or reads Secret objects from the API server.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::Client;
use tracing::debug;
use zeroize::Zeroizing;

#[cfg(test)]
use mockall::automock;

use crate::cluster::{proxy_post_json, ControllerEndpoint, StoredSealedSecret};
use crate::error::ItemError;
use crate::model::{PlaintextSecret, SealedSecretRef};

/// Recovers plaintext for a stored SealedSecret
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DecryptRelay: Send + Sync {
    /// Ask the controller to unseal `stored`
    async fn recover_plaintext(
        &self,
        endpoint: &ControllerEndpoint,
        stored: &StoredSealedSecret,
    ) -> Result<PlaintextSecret, ItemError>;
}

/// Posts SealedSecrets to the controller's decrypt path via the service proxy
#[derive(Clone)]
pub struct ControllerDecryptRelay {
    client: Client,
    decrypt_path: String,
}

impl ControllerDecryptRelay {
    /// Create a relay posting to `decrypt_path` on the controller
    pub fn new(client: Client, decrypt_path: impl Into<String>) -> Self {
        Self {
            client,
            decrypt_path: decrypt_path.into(),
        }
    }
}

#[async_trait]
impl DecryptRelay for ControllerDecryptRelay {
    async fn recover_plaintext(
        &self,
        endpoint: &ControllerEndpoint,
        stored: &StoredSealedSecret,
    ) -> Result<PlaintextSecret, ItemError> {
        let target = stored.target();
        let body = serde_json::to_vec(stored.object())
            .map_err(|e| ItemError::recover(target.clone(), format!("encode request: {e}")))?;

        let response = proxy_post_json(&self.client, endpoint, &self.decrypt_path, body)
            .await
            .map(Zeroizing::new)
            .map_err(|e| ItemError::recover(target.clone(), e.to_string()))?;

        let plaintext = plaintext_from_response(target, &response)?;
        debug!(item = %target, fields = plaintext.len(), "Recovered plaintext");
        Ok(plaintext)
    }
}

/// Turn the controller's unsealed Secret into a [`PlaintextSecret`] for `target`
pub fn plaintext_from_response(
    target: &SealedSecretRef,
    response: &str,
) -> Result<PlaintextSecret, ItemError> {
    // Position only: serde_json messages may quote the input
    let secret: Secret = serde_json::from_str(response).map_err(|e| {
        ItemError::recover(
            target.clone(),
            format!(
                "controller response is not a Secret (line {}, column {})",
                e.line(),
                e.column()
            ),
        )
    })?;

    let meta = &secret.metadata;
    let name_matches = meta.name.as_deref().map_or(true, |n| n == target.name());
    let namespace_matches = meta
        .namespace
        .as_deref()
        .map_or(true, |ns| ns == target.namespace());
    if !name_matches || !namespace_matches {
        return Err(ItemError::recover(
            target.clone(),
            format!(
                "controller returned {}/{}",
                meta.namespace.as_deref().unwrap_or_default(),
                meta.name.as_deref().unwrap_or_default()
            ),
        ));
    }

    let mut plaintext = PlaintextSecret::new(target.clone());
    for (field, value) in secret.data.unwrap_or_default() {
        plaintext.insert(field, value.0);
    }
    for (field, value) in secret.string_data.unwrap_or_default() {
        plaintext.insert(field, value.into_bytes());
    }
    Ok(plaintext)
}
