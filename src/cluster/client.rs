//! kube-rs backed [`ClusterClient`]

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, ApiResource, DynamicObject, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

use super::{ClusterClient, ControllerEndpoint, StoredSealedSecret};
use crate::config::{ControllerSelector, NamespaceScope};
use crate::error::ItemError;
use crate::model::{SealedPayload, SealedSecretRef};
use crate::{Error, Result};

/// SealedSecret API group
pub const SEALED_SECRET_GROUP: &str = "bitnami.com";
/// SealedSecret API version
pub const SEALED_SECRET_VERSION: &str = "v1alpha1";
/// SealedSecret kind
pub const SEALED_SECRET_KIND: &str = "SealedSecret";

/// Connection timeout for the API server
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for API server requests, including proxied controller calls
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size for SealedSecret listing
const LIST_PAGE_SIZE: u32 = 500;

/// `ApiResource` for `bitnami.com/v1alpha1` SealedSecrets
pub fn sealed_secret_api_resource() -> ApiResource {
    ApiResource {
        group: SEALED_SECRET_GROUP.to_string(),
        version: SEALED_SECRET_VERSION.to_string(),
        api_version: format!("{SEALED_SECRET_GROUP}/{SEALED_SECRET_VERSION}"),
        kind: SEALED_SECRET_KIND.to_string(),
        plural: "sealedsecrets".to_string(),
    }
}

/// Create a kube client from an optional kubeconfig path
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| Error::client(format!("failed to read kubeconfig: {e}")))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::client(format!("failed to load kubeconfig: {e}")))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::client(format!("failed to infer config: {e}")))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| Error::client(format!("failed to create client: {e}")))
}

/// [`ClusterClient`] talking to a real API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    resource: ApiResource,
}

impl KubeClusterClient {
    /// Wrap an existing kube client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resource: sealed_secret_api_resource(),
        }
    }

    /// Underlying kube client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn sealed_secrets(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }

    async fn find_service(&self, selector: &ControllerSelector) -> Result<Service> {
        let not_found = |msg: String| {
            Error::controller_not_found(&selector.namespace, &selector.name, msg)
        };

        let named: Api<Service> = Api::namespaced(self.client.clone(), &selector.namespace);
        if let Some(svc) = named
            .get_opt(&selector.name)
            .await
            .map_err(|e| not_found(e.to_string()))?
        {
            return Ok(svc);
        }

        debug!(
            namespace = %selector.namespace,
            name = %selector.name,
            selector = crate::CONTROLLER_LABEL_SELECTOR,
            "Named controller service missing, searching all namespaces by label"
        );
        let all: Api<Service> = Api::all(self.client.clone());
        let labelled = all
            .list(&ListParams::default().labels(crate::CONTROLLER_LABEL_SELECTOR))
            .await
            .map_err(|e| not_found(e.to_string()))?;

        labelled.items.into_iter().next().ok_or_else(|| {
            not_found(format!(
                "no service named {} or labelled {} in any namespace",
                selector.name,
                crate::CONTROLLER_LABEL_SELECTOR
            ))
        })
    }

    async fn ensure_running_pod(
        &self,
        selector: &ControllerSelector,
        service: &Service,
        endpoint: &ControllerEndpoint,
    ) -> Result<()> {
        let not_found = |msg: String| {
            Error::controller_not_found(&selector.namespace, &selector.name, msg)
        };

        let labels = service
            .spec
            .as_ref()
            .and_then(|s| s.selector.as_ref())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .ok_or_else(|| not_found("controller service has no pod selector".to_string()))?;

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &endpoint.namespace);
        let list = pods
            .list(&ListParams::default().labels(&labels))
            .await
            .map_err(|e| not_found(e.to_string()))?;

        let running = list.items.iter().any(|pod| {
            pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
        });
        if !running {
            return Err(not_found(format!(
                "no running controller pod matches {labels} in {}",
                endpoint.namespace
            )));
        }
        Ok(())
    }
}

/// Endpoint for a controller Service found by name or by label.
///
/// Addressed in the Service's own namespace, falling back to the selector's.
/// The first port is used, by name when it has one.
pub(crate) fn endpoint_for_service(
    selector: &ControllerSelector,
    service: &Service,
) -> Result<ControllerEndpoint> {
    let namespace = service
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| selector.namespace.clone());
    let name = service
        .metadata
        .name
        .clone()
        .unwrap_or_else(|| selector.name.clone());
    let port = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.first())
        .map(|p| p.name.clone().unwrap_or_else(|| p.port.to_string()))
        .ok_or_else(|| {
            Error::controller_not_found(
                &selector.namespace,
                &selector.name,
                format!("controller service {namespace}/{name} exposes no ports"),
            )
        })?;
    Ok(ControllerEndpoint::new(namespace, name, port))
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_sealed_secrets(&self, scope: &NamespaceScope) -> Result<Vec<String>> {
        let api: Api<DynamicObject> = match scope {
            NamespaceScope::AllNamespaces => Api::all_with(self.client.clone(), &self.resource),
            NamespaceScope::Namespace(ns) => self.sealed_secrets(ns),
        };

        let mut keys = Vec::new();
        let mut params = ListParams::default().limit(LIST_PAGE_SIZE);
        loop {
            let page = api
                .list(&params)
                .await
                .map_err(|e| Error::discovery(scope.to_string(), e.to_string()))?;

            keys.extend(page.items.iter().map(|obj| {
                format!(
                    "{}/{}",
                    obj.metadata.namespace.as_deref().unwrap_or_default(),
                    obj.metadata.name.as_deref().unwrap_or_default()
                )
            }));

            match page.metadata.continue_.filter(|c| !c.is_empty()) {
                Some(token) => params = params.continue_token(&token),
                None => break,
            }
        }

        info!(scope = %scope, count = keys.len(), "Discovered SealedSecrets");
        Ok(keys)
    }

    async fn get_sealed_secret(
        &self,
        target: &SealedSecretRef,
    ) -> std::result::Result<StoredSealedSecret, ItemError> {
        let obj = self
            .sealed_secrets(target.namespace())
            .get(target.name())
            .await
            .map_err(|e| ItemError::from_read(target.clone(), e))?;

        let value = serde_json::to_value(&obj)
            .map_err(|e| ItemError::read(target.clone(), format!("unreadable object: {e}")))?;
        Ok(StoredSealedSecret::from_object(target.clone(), value))
    }

    async fn apply_sealed_secret(
        &self,
        current: &StoredSealedSecret,
        payload: &SealedPayload,
    ) -> std::result::Result<(), ItemError> {
        let target = current.target();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let next: DynamicObject = serde_json::from_value(current.with_payload(payload, &now))
            .map_err(|e| ItemError::apply(target.clone(), format!("invalid object: {e}")))?;

        self.sealed_secrets(target.namespace())
            .replace(target.name(), &PostParams::default(), &next)
            .await
            .map_err(|e| ItemError::from_write(target.clone(), e))?;

        debug!(item = %target, key = payload.key().short(), "Replaced SealedSecret");
        Ok(())
    }

    async fn discover_controller_endpoint(
        &self,
        selector: &ControllerSelector,
    ) -> Result<ControllerEndpoint> {
        let service = self.find_service(selector).await?;
        let endpoint = endpoint_for_service(selector, &service)?;
        self.ensure_running_pod(selector, &service, &endpoint).await?;

        info!(endpoint = %endpoint, "Found sealed-secrets controller");
        Ok(endpoint)
    }
}

/// GET a controller path through the API server's service proxy
pub(crate) async fn proxy_get(
    client: &Client,
    endpoint: &ControllerEndpoint,
    path: &str,
) -> std::result::Result<String, kube::Error> {
    let request = http::Request::get(endpoint.proxy_path(path))
        .body(Vec::new())
        .map_err(kube::Error::HttpError)?;
    client.request_text(request).await
}

/// POST a JSON body to a controller path through the API server's service proxy
pub(crate) async fn proxy_post_json(
    client: &Client,
    endpoint: &ControllerEndpoint,
    path: &str,
    body: Vec<u8>,
) -> std::result::Result<String, kube::Error> {
    let request = http::Request::post(endpoint.proxy_path(path))
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body)
        .map_err(kube::Error::HttpError)?;
    client.request_text(request).await
}
