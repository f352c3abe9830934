//! Re-encryption of recovered plaintext under the current public key
//!
//! [`Resealer`] owns the binding rules: every plaintext field must come back
//! sealed, and the resulting [`SealedPayload`] is tied to the object it was
//! derived from and the run's key fingerprint. The actual encryption is
//! delegated to a [`SealingPrimitive`], which may be randomized.

mod kubeseal;

pub use kubeseal::KubesealPrimitive;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::ItemError;
use crate::model::{PlaintextSecret, PublicKeyMaterial, SealedPayload, SealedSecretRef};

/// Annotation marking a SealedSecret as decryptable under any name in its namespace
pub const NAMESPACE_WIDE_ANNOTATION: &str = "sealedsecrets.bitnami.com/namespace-wide";

/// Annotation marking a SealedSecret as decryptable under any namespace and name
pub const CLUSTER_WIDE_ANNOTATION: &str = "sealedsecrets.bitnami.com/cluster-wide";

/// Which identity the ciphertext is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SealingScope {
    /// Bound to namespace and name
    #[default]
    Strict,
    /// Bound to namespace only
    NamespaceWide,
    /// Not bound to an identity
    ClusterWide,
}

impl SealingScope {
    /// Scope recorded in a SealedSecret's annotations. Cluster-wide wins when
    /// both annotations are set.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        let set = |key: &str| annotations.get(key).is_some_and(|v| v == "true");
        if set(CLUSTER_WIDE_ANNOTATION) {
            SealingScope::ClusterWide
        } else if set(NAMESPACE_WIDE_ANNOTATION) {
            SealingScope::NamespaceWide
        } else {
            SealingScope::Strict
        }
    }

    /// Value for `kubeseal --scope`
    pub fn as_arg(self) -> &'static str {
        match self {
            SealingScope::Strict => "strict",
            SealingScope::NamespaceWide => "namespace-wide",
            SealingScope::ClusterWide => "cluster-wide",
        }
    }
}

/// Why a sealing primitive failed
#[derive(Debug, Error)]
pub enum SealError {
    /// Scratch storage could not be prepared
    #[error("scratch storage: {0}")]
    Scratch(#[source] std::io::Error),

    /// The sealer could not be started
    #[error("failed to run {binary}: {source}")]
    Spawn {
        /// Program that was started
        binary: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The sealer exited unsuccessfully
    #[error("{binary} exited with {status}: {stderr}")]
    Exit {
        /// Program that was started
        binary: String,
        /// Exit status description
        status: String,
        /// Trimmed standard error
        stderr: String,
    },

    /// The sealer did not finish in time
    #[error("{binary} timed out after {seconds}s")]
    Timeout {
        /// Program that was started
        binary: String,
        /// Timeout that elapsed
        seconds: u64,
    },

    /// The sealer produced unusable output
    #[error("unusable output: {0}")]
    Output(String),
}

/// Encrypts plaintext fields for one object under a public key
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SealingPrimitive: Send + Sync {
    /// Seal every field of `plaintext`, returning field name to base64 ciphertext
    async fn seal_secret(
        &self,
        target: &SealedSecretRef,
        scope: SealingScope,
        key: &PublicKeyMaterial,
        plaintext: &PlaintextSecret,
    ) -> Result<BTreeMap<String, String>, SealError>;
}

/// Produces [`SealedPayload`]s bound to one object and one key
#[derive(Clone)]
pub struct Resealer {
    primitive: Arc<dyn SealingPrimitive>,
}

impl Resealer {
    /// Create a resealer over a sealing primitive
    pub fn new(primitive: Arc<dyn SealingPrimitive>) -> Self {
        Self { primitive }
    }

    /// Seal `plaintext` for `target` under `key`
    pub async fn reseal(
        &self,
        target: &SealedSecretRef,
        scope: SealingScope,
        plaintext: &PlaintextSecret,
        key: &PublicKeyMaterial,
    ) -> Result<SealedPayload, ItemError> {
        if plaintext.target() != target {
            return Err(ItemError::binding(
                target.clone(),
                format!("plaintext was recovered for {}", plaintext.target()),
            ));
        }

        let sealed = self
            .primitive
            .seal_secret(target, scope, key, plaintext)
            .await
            .map_err(|e| ItemError::reseal(target.clone(), e.to_string()))?;

        if let Some((missing, _)) = plaintext.fields().find(|(f, _)| !sealed.contains_key(*f)) {
            return Err(ItemError::reseal(
                target.clone(),
                format!("field '{missing}' was not sealed"),
            ));
        }
        if let Some(extra) = sealed.keys().find(|f| plaintext.get(f).is_none()) {
            return Err(ItemError::reseal(
                target.clone(),
                format!("sealer returned unknown field '{extra}'"),
            ));
        }

        debug!(
            item = %target,
            scope = scope.as_arg(),
            fields = sealed.len(),
            "Resealed"
        );
        Ok(SealedPayload::new(
            target.clone(),
            key.fingerprint().clone(),
            sealed,
        ))
    }
}
