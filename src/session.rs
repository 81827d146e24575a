//! Runs a whole overlay (directory, relays, users) inside one process.

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::anonymity::{PathSelector, RandomPathSelector};
use crate::circuit::CircuitBuilder;
use crate::config::NetworkConfig;
use crate::directory::{self, Directory, DirectoryClient, HttpDirectoryClient};
use crate::error::{OnionError, Result};
use crate::key_management::AsymmetricKeyPair;
use crate::relay::{self, RelayNode};
use crate::relay_protocol::NodeId;
use crate::transport::{HopTransport, HttpHopTransport};
use crate::user::{self, UserNode};

/// Which participants to start and how users pick their circuits.
#[derive(Clone)]
pub struct NetworkLayout {
    pub relay_ids: Vec<NodeId>,
    pub user_ids: Vec<NodeId>,
    pub selector: Arc<dyn PathSelector>,
}

impl NetworkLayout {
    /// Relays `0..relays` and users `0..users` with random path selection.
    pub fn new(relays: NodeId, users: NodeId) -> Self {
        Self {
            relay_ids: (0..relays).collect(),
            user_ids: (0..users).collect(),
            selector: Arc::new(RandomPathSelector::new()),
        }
    }

    pub fn with_relay_ids(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.relay_ids = ids.into_iter().collect();
        self
    }

    pub fn with_user_ids(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.user_ids = ids.into_iter().collect();
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn PathSelector>) -> Self {
        self.selector = selector;
        self
    }
}

pub struct LocalNetwork {
    config: NetworkConfig,
    directory: Arc<Directory>,
    relays: Vec<Arc<RelayNode>>,
    users: Vec<Arc<UserNode>>,
    servers: Vec<JoinHandle<()>>,
}

impl LocalNetwork {
    /// Starts the directory, then every relay (each registers itself over
    /// HTTP once its own endpoint is listening), then every user.
    pub async fn launch(config: NetworkConfig, layout: NetworkLayout) -> Result<Self> {
        config.validate()?;

        let transport = Arc::new(HttpHopTransport::new(config.clone())?);
        let directory = Arc::new(Directory::new());
        let directory_client: Arc<dyn DirectoryClient> = Arc::new(HttpDirectoryClient::new(
            transport.client().clone(),
            config.directory_url(),
        ));

        let mut network = Self {
            config: config.clone(),
            directory: directory.clone(),
            relays: Vec::new(),
            users: Vec::new(),
            servers: Vec::new(),
        };

        network.servers.push(
            spawn_service(&config.host, config.directory_port, directory::router(directory)).await?,
        );
        info!(port = config.directory_port, "directory listening");

        for node_id in &layout.relay_ids {
            let relay = Arc::new(
                start_relay(&config, *node_id, transport.clone()).await?,
            );
            let handle = spawn_service(&config.host, relay.port(), relay::router(relay.clone())).await?;
            network.servers.push(handle);
            directory_client.register(relay.record()?).await?;
            info!(node_id, port = relay.port(), "relay online");
            network.relays.push(relay);
        }

        for user_id in &layout.user_ids {
            let port = config.user_port(*user_id)?;
            let builder = CircuitBuilder::new(
                config.clone(),
                directory_client.clone(),
                layout.selector.clone(),
                transport.clone(),
            );
            let user = Arc::new(UserNode::new(*user_id, port, builder));
            network
                .servers
                .push(spawn_service(&config.host, port, user::router(user.clone())).await?);
            info!(user_id, port, "user online");
            network.users.push(user);
        }

        Ok(network)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn relay(&self, node_id: NodeId) -> Option<&Arc<RelayNode>> {
        self.relays.iter().find(|r| r.node_id() == node_id)
    }

    pub fn relays(&self) -> &[Arc<RelayNode>] {
        &self.relays
    }

    pub fn user(&self, user_id: NodeId) -> Option<&Arc<UserNode>> {
        self.users.iter().find(|u| u.user_id() == user_id)
    }

    pub fn shutdown(mut self) {
        self.stop_servers();
        info!("local network stopped");
    }

    fn stop_servers(&mut self) {
        for handle in self.servers.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for LocalNetwork {
    fn drop(&mut self) {
        self.stop_servers();
    }
}

/// Generates the relay's key pair off the async workers; RSA key generation
/// is CPU bound.
async fn start_relay(
    config: &NetworkConfig,
    node_id: NodeId,
    transport: Arc<dyn HopTransport>,
) -> Result<RelayNode> {
    let port = config.relay_port(node_id)?;
    let bits = config.rsa_key_bits;
    let keys = tokio::task::spawn_blocking(move || AsymmetricKeyPair::generate(bits))
        .await
        .map_err(|e| OnionError::InvalidKey(format!("key generation task failed: {}", e)))??;
    Ok(RelayNode::new(node_id, port, keys, transport))
}

/// Binds `host:port` and serves `router` on a background task.
pub async fn spawn_service(host: &str, port: u16, router: Router) -> Result<JoinHandle<()>> {
    let listener = TcpListener::bind((host, port)).await?;
    let addr = listener.local_addr()?;
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(%addr, "service stopped: {}", e);
        }
    }))
}
