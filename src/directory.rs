//! Node directory: the registry relays publish their public keys to, and the
//! client side circuit builders read it through.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{debug, info};

use crate::error::{OnionError, Result};
use crate::relay_protocol::{NodeRecord, NodeRegistryBody, RegisterNodeBody};

/// Append-only registry, unique on node id.
#[derive(Debug, Default)]
pub struct Directory {
    nodes: RwLock<Vec<NodeRecord>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the id was already present; the stored key is
    /// left untouched in that case.
    pub fn register(&self, record: NodeRecord) -> bool {
        let mut nodes = match self.nodes.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if nodes.iter().any(|n| n.node_id == record.node_id) {
            debug!(node_id = record.node_id, "ignoring duplicate registration");
            return false;
        }
        info!(node_id = record.node_id, "registered relay");
        nodes.push(record);
        true
    }

    pub fn nodes(&self) -> Vec<NodeRecord> {
        match self.nodes.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

pub fn router(directory: Arc<Directory>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/registerNode", post(register_node))
        .route("/getNodeRegistry", get(get_node_registry))
        .with_state(directory)
}

async fn status() -> &'static str {
    "live"
}

async fn register_node(
    State(directory): State<Arc<Directory>>,
    Json(body): Json<RegisterNodeBody>,
) -> StatusCode {
    directory.register(body);
    StatusCode::OK
}

async fn get_node_registry(State(directory): State<Arc<Directory>>) -> Json<NodeRegistryBody> {
    Json(NodeRegistryBody {
        nodes: directory.nodes(),
    })
}

/// Read/register access to a directory, local or remote.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn fetch_nodes(&self) -> Result<Vec<NodeRecord>>;
    async fn register(&self, record: NodeRecord) -> Result<()>;
}

#[async_trait]
impl DirectoryClient for Directory {
    async fn fetch_nodes(&self) -> Result<Vec<NodeRecord>> {
        Ok(self.nodes())
    }

    async fn register(&self, record: NodeRecord) -> Result<()> {
        Directory::register(self, record);
        Ok(())
    }
}

/// Talks to a directory over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDirectoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpDirectoryClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn fetch_nodes(&self) -> Result<Vec<NodeRecord>> {
        let url = format!("{}/getNodeRegistry", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| OnionError::DirectoryUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OnionError::DirectoryUnavailable(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        let body: NodeRegistryBody = response
            .json()
            .await
            .map_err(|e| OnionError::DirectoryUnavailable(format!("malformed registry: {}", e)))?;
        Ok(body.nodes)
    }

    async fn register(&self, record: NodeRecord) -> Result<()> {
        let url = format!("{}/registerNode", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&record)
            .send()
            .await
            .map_err(|e| OnionError::DirectoryUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OnionError::DirectoryUnavailable(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u16, key: &str) -> NodeRecord {
        NodeRecord {
            node_id: id,
            pub_key: key.to_string(),
        }
    }

    #[test]
    fn duplicate_registration_keeps_first_key() {
        let directory = Directory::new();
        assert!(directory.register(record(1, "first")));
        assert!(!directory.register(record(1, "second")));
        assert!(directory.register(record(2, "other")));

        let nodes = directory.nodes();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0], record(1, "first"));
    }

    #[tokio::test]
    async fn local_client_sees_registrations_in_order() {
        let directory = Directory::new();
        DirectoryClient::register(&directory, record(5, "k5")).await.unwrap();
        DirectoryClient::register(&directory, record(3, "k3")).await.unwrap();

        let ids: Vec<_> = directory
            .fetch_nodes()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.node_id)
            .collect();
        assert_eq!(ids, vec![5, 3]);
    }

    #[tokio::test]
    async fn unreachable_directory_is_reported() {
        // Nothing listens on port 1.
        let client = HttpDirectoryClient::new(reqwest::Client::new(), "http://127.0.0.1:1");
        assert!(matches!(
            client.fetch_nodes().await,
            Err(OnionError::DirectoryUnavailable(_))
        ));
    }
}
