//! Node reads and label patches against the Kubernetes API
//!
//! Patches are sent as JSON merge patches that include the resource version
//! the diff was computed from. The API server rejects them with 409 Conflict
//! when the node moved on in between.

use async_trait::async_trait;
use nudl_core::{LabelPatch, Labels, NodeRecord, NodeRegistry, RegistryError};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, trace};

use crate::cluster::{ClusterConfig, KubeError};

const MERGE_PATCH: &str = "application/merge-patch+json";

#[derive(Deserialize)]
struct Node {
    metadata: ObjectMeta,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    resource_version: Option<String>,
    #[serde(default)]
    labels: Option<Labels>,
}

impl From<Node> for NodeRecord {
    fn from(node: Node) -> Self {
        NodeRecord {
            name: node.metadata.name,
            resource_version: node.metadata.resource_version,
            labels: node.metadata.labels.unwrap_or_default(),
        }
    }
}

/// Kubernetes client limited to the two calls the labeler needs
pub struct KubeClient {
    client: reqwest::Client,
    server: String,
    token_file: Option<PathBuf>,
}

impl KubeClient {
    pub fn new(config: ClusterConfig) -> Result<Self, KubeError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);

        if let Some(path) = &config.ca_file {
            let pem = std::fs::read(path).map_err(|source| KubeError::Io {
                path: path.clone(),
                source,
            })?;
            for cert in reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                KubeError::InvalidCertificate {
                    path: path.clone(),
                    message: e.to_string(),
                }
            })? {
                builder = builder.add_root_certificate(cert);
            }
        }

        Ok(Self {
            client: builder.build()?,
            server: config.server.trim_end_matches('/').to_string(),
            token_file: config.token_file,
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    fn node_url(&self, name: &str) -> String {
        format!("{}/api/v1/nodes/{}", self.server, name)
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, RegistryError> {
        let Some(path) = &self.token_file else {
            return Ok(request);
        };

        let token = tokio::fs::read_to_string(path).await.map_err(|e| {
            RegistryError::Transport(format!("failed to read token {}: {}", path.display(), e))
        })?;
        Ok(request.header(AUTHORIZATION, format!("Bearer {}", token.trim())))
    }

    async fn send(&self, name: &str, request: RequestBuilder) -> Result<NodeRecord, RegistryError> {
        let request = self.authorize(request).await?.header(ACCEPT, "application/json");
        let response = request
            .send()
            .await
            .map_err(|e| RegistryError::Transport(e.to_string()))?;

        let response = check_status(name, response).await?;
        let node: Node = response
            .json()
            .await
            .map_err(|e| RegistryError::Transport(format!("invalid node object: {}", e)))?;
        Ok(node.into())
    }
}

async fn check_status(name: &str, response: Response) -> Result<Response, RegistryError> {
    let status = response.status();
    trace!(node = %name, status = %status, "API server responded");

    match status {
        s if s.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(RegistryError::NotFound(name.to_string())),
        StatusCode::CONFLICT => Err(RegistryError::Conflict(name.to_string())),
        s => {
            let body = response.text().await.unwrap_or_default();
            Err(RegistryError::Transport(format!("{}: {}", s, body.trim())))
        }
    }
}

#[async_trait]
impl NodeRegistry for KubeClient {
    async fn get_node(&self, name: &str) -> Result<NodeRecord, RegistryError> {
        debug!(node = %name, "Fetching node");
        self.send(name, self.client.get(self.node_url(name))).await
    }

    async fn patch_node(&self, name: &str, patch: &LabelPatch) -> Result<NodeRecord, RegistryError> {
        debug!(node = %name, changes = patch.len(), "Patching node labels");
        let body = serde_json::to_vec(&patch.to_merge_patch())
            .map_err(|e| RegistryError::Transport(e.to_string()))?;

        let request = self
            .client
            .patch(self.node_url(name))
            .header(CONTENT_TYPE, MERGE_PATCH)
            .body(body);
        self.send(name, request).await
    }
}
