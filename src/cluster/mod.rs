//! Kubernetes access for SealedSecrets and the sealed-secrets controller
//!
//! [`ClusterClient`] is the seam the reconciliation engine depends on. The
//! production implementation is [`KubeClusterClient`]; tests substitute mocks or
//! in-memory fakes.

mod client;

pub use client::{create_client, sealed_secret_api_resource, KubeClusterClient};
pub(crate) use client::{proxy_get, proxy_post_json};

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

#[cfg(test)]
use mockall::automock;

use crate::config::{ControllerSelector, NamespaceScope};
use crate::error::ItemError;
use crate::model::{KeyFingerprint, SealedPayload, SealedSecretRef};
use crate::reseal::SealingScope;
use crate::Result;

/// Operations against the cluster the engine needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List every SealedSecret in scope as raw `namespace/name` keys.
    ///
    /// Keys are returned unvalidated; malformed ones are skipped by the caller.
    async fn list_sealed_secrets(&self, scope: &NamespaceScope) -> Result<Vec<String>>;

    /// Read the current state of one SealedSecret
    async fn get_sealed_secret(
        &self,
        target: &SealedSecretRef,
    ) -> std::result::Result<StoredSealedSecret, ItemError>;

    /// Replace `current` with `payload`, guarded by `current`'s resourceVersion.
    ///
    /// Returns [`ItemError::Conflict`] if the object changed since it was read.
    async fn apply_sealed_secret(
        &self,
        current: &StoredSealedSecret,
        payload: &SealedPayload,
    ) -> std::result::Result<(), ItemError>;

    /// Find the controller Service and confirm a controller pod is running
    async fn discover_controller_endpoint(
        &self,
        selector: &ControllerSelector,
    ) -> Result<ControllerEndpoint>;
}

/// A SealedSecret as last read from the API server
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSealedSecret {
    target: SealedSecretRef,
    resource_version: Option<String>,
    encrypted_data: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    object: Value,
}

impl StoredSealedSecret {
    /// Build from the object's JSON representation
    pub fn from_object(target: SealedSecretRef, object: Value) -> Self {
        let resource_version = object
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_string);
        let encrypted_data = string_map(object.pointer("/spec/encryptedData"));
        let annotations = string_map(object.pointer("/metadata/annotations"));

        Self {
            target,
            resource_version,
            encrypted_data,
            annotations,
            object,
        }
    }

    /// Object identity
    pub fn target(&self) -> &SealedSecretRef {
        &self.target
    }

    /// Version the object was read at
    pub fn resource_version(&self) -> Option<&str> {
        self.resource_version.as_deref()
    }

    /// Current `spec.encryptedData`
    pub fn encrypted_data(&self) -> &BTreeMap<String, String> {
        &self.encrypted_data
    }

    /// Object annotations
    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    /// Full object as read
    pub fn object(&self) -> &Value {
        &self.object
    }

    /// Sealing scope the object was created with
    pub fn scope(&self) -> SealingScope {
        SealingScope::from_annotations(&self.annotations)
    }

    /// Fingerprint recorded by the last successful re-encryption
    pub fn key_fingerprint(&self) -> Option<KeyFingerprint> {
        self.annotations
            .get(crate::KEY_FINGERPRINT_ANNOTATION)
            .map(KeyFingerprint::new)
    }

    /// The object with `payload` applied and the run's annotations set,
    /// ready to be sent as a replace guarded by the read resourceVersion.
    pub fn with_payload(&self, payload: &SealedPayload, reencrypted_at: &str) -> Value {
        let mut object = self.object.clone();

        let encrypted: serde_json::Map<String, Value> = payload
            .encrypted_data()
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        set_path(&mut object, &["spec", "encryptedData"], Value::Object(encrypted));

        set_path(
            &mut object,
            &["metadata", "annotations", crate::KEY_FINGERPRINT_ANNOTATION],
            Value::String(payload.key().as_str().to_string()),
        );
        set_path(
            &mut object,
            &["metadata", "annotations", crate::REENCRYPTED_AT_ANNOTATION],
            Value::String(reencrypted_at.to_string()),
        );

        if let Some(rv) = &self.resource_version {
            set_path(
                &mut object,
                &["metadata", "resourceVersion"],
                Value::String(rv.clone()),
            );
        }
        object
    }
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn set_path(root: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cur = root;
    for key in parents {
        if !cur.get(*key).is_some_and(Value::is_object) {
            if let Some(map) = cur.as_object_mut() {
                map.insert((*key).to_string(), Value::Object(Default::default()));
            }
        }
        match cur.get_mut(*key) {
            Some(next) => cur = next,
            None => return,
        }
    }
    if let Some(map) = cur.as_object_mut() {
        map.insert((*last).to_string(), value);
    }
}

/// Where the controller's HTTP API can be reached through the API server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerEndpoint {
    /// Namespace of the controller Service
    pub namespace: String,
    /// Name of the controller Service
    pub service: String,
    /// Service port name or number
    pub port: String,
}

impl ControllerEndpoint {
    /// Create an endpoint
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            port: port.into(),
        }
    }

    /// API server service-proxy path for a controller path such as `/v1/cert.pem`
    pub fn proxy_path(&self, path: &str) -> String {
        format!(
            "/api/v1/namespaces/{}/services/{}:{}/proxy{}",
            self.namespace, self.service, self.port, path
        )
    }
}

impl fmt::Display for ControllerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.service, self.port)
    }
}
