//! Kubernetes API server backend over HTTPS.
//!
//! Talks to the REST endpoints directly with a bearer token. Status codes are
//! mapped onto [`MegalosError`] so the idempotent create and delete paths of
//! the orchestrator behave the same as against the mock.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{MegalosError, Result};
use crate::resources::*;
use crate::traits::{BackendCapabilities, ClusterApi};

/// Size ceiling the API server enforces on a single ConfigMap.
pub const CONFIG_MAP_LIMIT: usize = 1024 * 1024;

/// Connection settings for [`RestBackend`].
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// API server base URL, e.g. `https://10.0.0.1:6443`
    pub url: String,
    /// Bearer token; requests are anonymous without one
    pub token: Option<String>,
    /// Skip TLS certificate verification (self-signed lab clusters)
    pub insecure_skip_tls_verify: bool,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl RestConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            insecure_skip_tls_verify: false,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// `DeleteOptions` sent with every delete.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteOptions {
    api_version: &'static str,
    kind: &'static str,
    propagation_policy: &'static str,
    grace_period_seconds: i64,
}

const DELETE_OPTIONS: DeleteOptions = DeleteOptions {
    api_version: "v1",
    kind: "DeleteOptions",
    propagation_policy: "Foreground",
    grace_period_seconds: 0,
};

/// The `Status` object returned with API errors.
#[derive(Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    git_version: String,
}

/// Kubernetes API server backend.
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RestBackend {
    /// Build the HTTP client for `config`.
    pub fn new(config: RestConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()
            .map_err(|e| MegalosError::BackendUnavailable(format!("HTTP client: {}", e)))?;

        info!(
            url = %config.url,
            authenticated = config.token.is_some(),
            "Creating Kubernetes API backend"
        );

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder, what: &str, sent_bytes: usize) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| MegalosError::BackendUnavailable(format!("{}: {}", what, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, what, &body, sent_bytes))
    }

    async fn send_object<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        object: &T,
        what: &str,
    ) -> Result<()> {
        let body = serde_json::to_vec(object)?;
        let sent_bytes = body.len();
        let request = self
            .request(method, path)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        self.execute(request, what, sent_bytes).await?;
        debug!(path, bytes = sent_bytes, "Object sent");
        Ok(())
    }

    async fn delete(&self, path: &str, what: &str) -> Result<()> {
        self.send_object(Method::DELETE, path, &DELETE_OPTIONS, what).await
    }

    async fn list<T: DeserializeOwned>(&self, path: &str, label_selector: &str, what: &str) -> Result<Vec<T>> {
        let mut request = self.request(Method::GET, path);
        if !label_selector.is_empty() {
            request = request.query(&[("labelSelector", label_selector)]);
        }
        let response = self.execute(request, what, 0).await?;
        let list: ResourceList<T> = response
            .json()
            .await
            .map_err(|e| MegalosError::Internal(format!("{}: invalid response: {}", what, e)))?;
        Ok(list.items)
    }
}

fn namespaces_path() -> String {
    "/api/v1/namespaces".to_string()
}

fn config_maps_path(namespace: &str) -> String {
    format!("/api/v1/namespaces/{}/configmaps", namespace)
}

fn attachments_path(namespace: &str) -> String {
    format!(
        "/apis/k8s.cni.cncf.io/v1/namespaces/{}/network-attachment-definitions",
        namespace
    )
}

fn deployments_path(namespace: &str) -> String {
    format!("/apis/apps/v1/namespaces/{}/deployments", namespace)
}

fn pods_path(namespace: &str) -> String {
    format!("/api/v1/namespaces/{}/pods", namespace)
}

/// Map a non-success status to the error taxonomy.
fn status_error(status: StatusCode, what: &str, body: &str, sent_bytes: usize) -> MegalosError {
    let detail = serde_json::from_str::<ApiStatus>(body)
        .map(|s| s.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());
    let message = format!("{} ({}): {}", what, status.as_u16(), detail);

    match status {
        StatusCode::CONFLICT => MegalosError::AlreadyExists(message),
        StatusCode::NOT_FOUND => MegalosError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => MegalosError::PermissionDenied(message),
        StatusCode::PAYLOAD_TOO_LARGE => MegalosError::PayloadTooLarge {
            size: sent_bytes,
            limit: CONFIG_MAP_LIMIT,
        },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => MegalosError::InvalidConfig(message),
        _ => MegalosError::BackendUnavailable(message),
    }
}

#[async_trait]
impl ClusterApi for RestBackend {
    async fn capabilities(&self) -> Result<BackendCapabilities> {
        Ok(BackendCapabilities {
            name: "kubernetes".to_string(),
            supports_machine_selection: false,
            supports_user_scoped_wipe: false,
            max_object_bytes: CONFIG_MAP_LIMIT,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let request = self.request(Method::GET, "/readyz");
        match self.execute(request, "health check", 0).await {
            Ok(_) => Ok(true),
            Err(MegalosError::BackendUnavailable(reason)) => {
                debug!(reason = %reason, "API server not ready");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn server_version(&self) -> Result<String> {
        let request = self.request(Method::GET, "/version");
        let response = self.execute(request, "server version", 0).await?;
        let version: VersionInfo = response
            .json()
            .await
            .map_err(|e| MegalosError::Internal(format!("server version: invalid response: {}", e)))?;
        Ok(version.git_version)
    }

    #[instrument(skip(self, namespace), fields(name = %namespace.metadata.name))]
    async fn create_namespace(&self, namespace: &Namespace) -> Result<()> {
        self.send_object(Method::POST, &namespaces_path(), namespace, "create namespace")
            .await
    }

    #[instrument(skip(self))]
    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.delete(&format!("{}/{}", namespaces_path(), name), "delete namespace")
            .await
    }

    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>> {
        self.list(&namespaces_path(), label_selector, "list namespaces")
            .await
    }

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        self.send_object(
            Method::POST,
            &config_maps_path(namespace),
            config_map,
            "create configmap",
        )
        .await
    }

    async fn replace_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        let path = format!("{}/{}", config_maps_path(namespace), config_map.metadata.name);
        self.send_object(Method::PUT, &path, config_map, "replace configmap")
            .await
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete(&format!("{}/{}", config_maps_path(namespace), name), "delete configmap")
            .await
    }

    async fn create_network_attachment(
        &self,
        namespace: &str,
        attachment: &NetworkAttachmentDefinition,
    ) -> Result<()> {
        self.send_object(
            Method::POST,
            &attachments_path(namespace),
            attachment,
            "create network attachment",
        )
        .await
    }

    async fn delete_network_attachment(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete(
            &format!("{}/{}", attachments_path(namespace), name),
            "delete network attachment",
        )
        .await
    }

    async fn list_network_attachments(
        &self,
        namespace: &str,
    ) -> Result<Vec<NetworkAttachmentDefinition>> {
        self.list(&attachments_path(namespace), "", "list network attachments")
            .await
    }

    #[instrument(skip(self, deployment), fields(name = %deployment.metadata.name))]
    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()> {
        self.send_object(
            Method::POST,
            &deployments_path(namespace),
            deployment,
            "create deployment",
        )
        .await
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete(&format!("{}/{}", deployments_path(namespace), name), "delete deployment")
            .await
    }

    async fn list_deployments(&self, namespace: &str, label_selector: &str) -> Result<Vec<Deployment>> {
        self.list(&deployments_path(namespace), label_selector, "list deployments")
            .await
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        self.list(&pods_path(namespace), label_selector, "list pods")
            .await
    }
}
