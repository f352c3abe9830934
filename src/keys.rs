//! Fetching and fingerprinting the controller's current public certificate

use std::path::Path;

use async_trait::async_trait;
use aws_lc_rs::digest::{digest, SHA256};
use chrono::{DateTime, Utc};
use kube::Client;
use tracing::{info, warn};
use x509_parser::prelude::*;

#[cfg(test)]
use mockall::automock;

use crate::cluster::{proxy_get, ControllerEndpoint};
use crate::model::{KeyFingerprint, PublicKeyMaterial};
use crate::{Error, Result};

/// Source of the controller's current public key
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    /// Fetch the certificate new ciphertext should be sealed against
    async fn fetch_current_public_key(
        &self,
        endpoint: &ControllerEndpoint,
    ) -> Result<PublicKeyMaterial>;
}

/// Fetches `/v1/cert.pem` from the controller through the API server proxy
#[derive(Clone)]
pub struct ControllerKeyFetcher {
    client: Client,
}

impl ControllerKeyFetcher {
    /// Create a fetcher using the given kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeyFetcher for ControllerKeyFetcher {
    async fn fetch_current_public_key(
        &self,
        endpoint: &ControllerEndpoint,
    ) -> Result<PublicKeyMaterial> {
        let body = proxy_get(&self.client, endpoint, crate::CERT_PATH)
            .await
            .map_err(|e| Error::key_fetch(endpoint.to_string(), e.to_string()))?;

        let key = parse_certificate(&body)
            .map_err(|msg| Error::key_fetch(endpoint.to_string(), msg))?;

        match key.not_after() {
            Some(not_after) if not_after <= Utc::now() => warn!(
                key = key.fingerprint().short(),
                not_after = %not_after,
                "Controller certificate has expired"
            ),
            _ => info!(
                key = key.fingerprint().short(),
                not_after = ?key.not_after(),
                "Fetched controller certificate"
            ),
        }
        Ok(key)
    }
}

/// Validate a PEM certificate and fingerprint it
pub fn parse_certificate(pem_text: &str) -> std::result::Result<PublicKeyMaterial, String> {
    let block = ::pem::parse(pem_text.trim().as_bytes())
        .map_err(|e| format!("failed to parse PEM: {e}"))?;
    if block.tag() != "CERTIFICATE" {
        return Err(format!("expected CERTIFICATE PEM block, got {}", block.tag()));
    }

    let der = block.contents();
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| format!("invalid X.509 certificate: {e}"))?;
    let not_after = DateTime::<Utc>::from_timestamp(cert.validity().not_after.timestamp(), 0);

    let normalized = ::pem::encode_config(
        &block,
        ::pem::EncodeConfig::new().set_line_ending(::pem::LineEnding::LF),
    );
    Ok(PublicKeyMaterial::new(
        normalized,
        fingerprint(der),
        not_after,
    ))
}

/// Lower-hex SHA-256 of DER bytes
pub fn fingerprint(der: &[u8]) -> KeyFingerprint {
    let hash = digest(&SHA256, der);
    let hex: String = hash
        .as_ref()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    KeyFingerprint::new(hex)
}

/// Write the certificate PEM to `path` for later offline sealing
pub async fn save_certificate(key: &PublicKeyMaterial, path: &Path) -> Result<()> {
    tokio::fs::write(path, key.pem())
        .await
        .map_err(|e| Error::io(format!("save certificate to {}", path.display()), e))
}
