//! Sender side of the protocol: pick relays, wrap the message once per hop,
//! hand the onion to the entry relay.

use std::sync::Arc;

use tracing::{debug, info};

use crate::anonymity::PathSelector;
use crate::config::NetworkConfig;
use crate::directory::DirectoryClient;
use crate::error::{OnionError, Result};
use crate::key_management::{import_public_key, seal};
use crate::relay_protocol::{HopAddress, Layer, NodeId, NodeRecord, TerminalPayload};
use crate::transport::HopTransport;

/// Relays a single message travels through, entry first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Circuit {
    hops: Vec<NodeRecord>,
}

impl Circuit {
    pub fn new(hops: Vec<NodeRecord>) -> Result<Self> {
        if hops.is_empty() {
            return Err(OnionError::InsufficientNodes {
                required: 1,
                available: 0,
            });
        }
        Ok(Self { hops })
    }

    pub fn hops(&self) -> &[NodeRecord] {
        &self.hops
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.hops.iter().map(|n| n.node_id).collect()
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn entry(&self) -> &NodeRecord {
        &self.hops[0]
    }
}

pub struct CircuitBuilder {
    config: NetworkConfig,
    directory: Arc<dyn DirectoryClient>,
    selector: Arc<dyn PathSelector>,
    transport: Arc<dyn HopTransport>,
}

impl CircuitBuilder {
    pub fn new(
        config: NetworkConfig,
        directory: Arc<dyn DirectoryClient>,
        selector: Arc<dyn PathSelector>,
        transport: Arc<dyn HopTransport>,
    ) -> Self {
        Self {
            config,
            directory,
            selector,
            transport,
        }
    }

    pub async fn select_circuit(&self) -> Result<Circuit> {
        let nodes = self.directory.fetch_nodes().await?;
        let hops = self.selector.select(&nodes, self.config.circuit_length)?;
        Circuit::new(hops)
    }

    /// Wraps `message` for `circuit`, innermost layer first.
    ///
    /// The last hop's layer points at the destination inbox and carries the
    /// terminal payload; every earlier layer points at the next relay.
    pub fn build_onion(&self, circuit: &Circuit, destination_port: u16, message: &str) -> Result<Vec<u8>> {
        let hops = circuit.hops();
        let mut payload = TerminalPayload {
            destination_port,
            message: message.to_string(),
        }
        .to_bytes()?;

        for (i, hop) in hops.iter().enumerate().rev() {
            let next_hop = match hops.get(i + 1) {
                Some(next) => HopAddress::Relay(self.config.relay_port(next.node_id)?),
                None => HopAddress::Inbox(destination_port),
            };
            let layer = Layer::wrap(next_hop, &payload).to_bytes()?;
            let public_key = import_public_key(&hop.pub_key)?;
            payload = seal(&layer, &public_key)?;
            debug!(hop = i, node_id = hop.node_id, size = payload.len(), "layer sealed");
        }

        Ok(payload)
    }

    /// Sends `message` to user `destination_user_id` over a fresh circuit.
    ///
    /// Resolves once every hop has acknowledged. Nothing is submitted when
    /// selection or encryption fails.
    pub async fn send(&self, destination_user_id: NodeId, message: &str) -> Result<Circuit> {
        let destination_port = self.config.user_port(destination_user_id)?;
        let circuit = self.select_circuit().await?;
        let onion = self.build_onion(&circuit, destination_port, message)?;
        let entry_port = self.config.relay_port(circuit.entry().node_id)?;

        info!(hops = circuit.len(), entry = circuit.entry().node_id, "submitting onion");
        self.transport.forward(entry_port, &onion).await?;
        Ok(circuit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anonymity::{FixedPathSelector, RandomPathSelector};
    use crate::directory::Directory;
    use crate::key_management::{export_public_key, open, AsymmetricKeyPair};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        forwarded: Mutex<Vec<(u16, Vec<u8>)>>,
        fail: bool,
    }

    #[async_trait]
    impl HopTransport for RecordingTransport {
        async fn forward(&self, relay_port: u16, payload: &[u8]) -> Result<()> {
            if self.fail {
                return Err(OnionError::ForwardUnreachable("entry down".to_string()));
            }
            self.forwarded.lock().unwrap().push((relay_port, payload.to_vec()));
            Ok(())
        }

        async fn deliver(&self, _relay_port: u16, _payload: &[u8]) -> Result<()> {
            unreachable!("senders never call deliver")
        }

        async fn deliver_message(&self, _inbox_port: u16, _message: &str) -> Result<()> {
            unreachable!("senders never call deliver_message")
        }
    }

    struct UnreachableDirectory;

    #[async_trait]
    impl DirectoryClient for UnreachableDirectory {
        async fn fetch_nodes(&self) -> Result<Vec<NodeRecord>> {
            Err(OnionError::DirectoryUnavailable("connection refused".to_string()))
        }

        async fn register(&self, _record: NodeRecord) -> Result<()> {
            Err(OnionError::DirectoryUnavailable("connection refused".to_string()))
        }
    }

    fn network(ids: &[NodeId]) -> (Arc<Directory>, HashMap<NodeId, AsymmetricKeyPair>) {
        let directory = Arc::new(Directory::new());
        let mut keys = HashMap::new();
        for id in ids {
            let pair = AsymmetricKeyPair::generate(1024).unwrap();
            directory.register(NodeRecord {
                node_id: *id,
                pub_key: export_public_key(&pair.public_key).unwrap(),
            });
            keys.insert(*id, pair);
        }
        (directory, keys)
    }

    fn builder(
        directory: Arc<dyn DirectoryClient>,
        selector: Arc<dyn PathSelector>,
        transport: Arc<RecordingTransport>,
    ) -> CircuitBuilder {
        CircuitBuilder::new(NetworkConfig::default(), directory, selector, transport)
    }

    #[test]
    fn circuit_needs_at_least_one_hop() {
        assert!(matches!(
            Circuit::new(Vec::new()),
            Err(OnionError::InsufficientNodes { required: 1, available: 0 })
        ));

        let circuit = Circuit::new(vec![NodeRecord {
            node_id: 7,
            pub_key: "k7".to_string(),
        }])
        .unwrap();
        assert!(!circuit.is_empty());
        assert_eq!(circuit.entry().node_id, 7);
    }

    #[tokio::test]
    async fn each_layer_reveals_only_the_next_hop() {
        let (directory, keys) = network(&[1, 2, 3, 4, 5]);
        let transport = Arc::new(RecordingTransport::default());
        let builder = builder(
            directory,
            Arc::new(FixedPathSelector::new(vec![2, 4, 1])),
            transport.clone(),
        );

        let circuit = builder.select_circuit().await.unwrap();
        let mut onion = builder.build_onion(&circuit, 3020, "hello").unwrap();

        let expected: [(NodeId, HopAddress); 3] = [
            (2, HopAddress::Relay(4004)),
            (4, HopAddress::Relay(4001)),
            (1, HopAddress::Inbox(3020)),
        ];
        for (node_id, next_hop) in expected {
            let plaintext = open(&onion, &keys[&node_id].private_key).unwrap();
            let layer = Layer::from_bytes(&plaintext).unwrap();
            assert_eq!(layer.next_hop, next_hop);
            if let HopAddress::Relay(_) = next_hop {
                assert!(!String::from_utf8_lossy(&plaintext).contains("hello"));
            }
            onion = layer.inner_payload().unwrap();
        }

        let terminal = TerminalPayload::from_bytes(&onion).unwrap();
        assert_eq!(terminal.destination_port, 3020);
        assert_eq!(terminal.message, "hello");
    }

    #[tokio::test]
    async fn outer_layer_is_not_readable_by_inner_relays() {
        let (directory, keys) = network(&[1, 2, 3]);
        let builder = builder(
            directory,
            Arc::new(FixedPathSelector::new(vec![1, 2, 3])),
            Arc::new(RecordingTransport::default()),
        );
        let circuit = builder.select_circuit().await.unwrap();
        let onion = builder.build_onion(&circuit, 3001, "secret").unwrap();

        assert!(matches!(
            open(&onion, &keys[&2u16].private_key),
            Err(OnionError::DecryptionFailed)
        ));
        assert!(matches!(
            open(&onion, &keys[&3u16].private_key),
            Err(OnionError::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn send_submits_to_entry_relay() {
        let (directory, _keys) = network(&[1, 2, 3, 4, 5]);
        let transport = Arc::new(RecordingTransport::default());
        let builder = builder(
            directory,
            Arc::new(RandomPathSelector::new()),
            transport.clone(),
        );

        let circuit = builder.send(20, "hi").await.unwrap();
        assert_eq!(circuit.len(), 3);

        let forwarded = transport.forwarded.lock().unwrap();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].0, 4000 + circuit.entry().node_id);
    }

    #[tokio::test]
    async fn directory_failure_aborts_send() {
        let transport = Arc::new(RecordingTransport::default());
        let builder = builder(
            Arc::new(UnreachableDirectory),
            Arc::new(RandomPathSelector::new()),
            transport.clone(),
        );

        let err = builder.send(20, "hi").await.unwrap_err();
        assert!(matches!(err, OnionError::DirectoryUnavailable(_)));
        assert!(transport.forwarded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn small_network_is_rejected() {
        let (directory, _keys) = network(&[1, 2]);
        let transport = Arc::new(RecordingTransport::default());
        let builder = builder(directory, Arc::new(RandomPathSelector::new()), transport.clone());

        let err = builder.send(20, "hi").await.unwrap_err();
        assert!(matches!(
            err,
            OnionError::InsufficientNodes {
                required: 3,
                available: 2
            }
        ));
        assert!(transport.forwarded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_relay_key_aborts_without_submission() {
        let (directory, _keys) = network(&[1, 2]);
        directory.register(NodeRecord {
            node_id: 3,
            pub_key: "bm90IGEga2V5".to_string(),
        });
        let transport = Arc::new(RecordingTransport::default());
        let builder = builder(
            directory,
            Arc::new(FixedPathSelector::new(vec![1, 2, 3])),
            transport.clone(),
        );

        let err = builder.send(20, "hi").await.unwrap_err();
        assert!(matches!(err, OnionError::InvalidKey(_)));
        assert!(transport.forwarded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn entry_failure_is_reported() {
        let (directory, _keys) = network(&[1, 2, 3]);
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let builder = builder(directory, Arc::new(RandomPathSelector::new()), transport);

        assert!(matches!(
            builder.send(20, "hi").await,
            Err(OnionError::ForwardUnreachable(_))
        ));
    }
}
