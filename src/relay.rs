//! Relay side of the protocol: peel exactly one layer per request and pass the
//! remainder on, or hand the plaintext to the destination inbox at the exit.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{OnionError, Result};
use crate::key_management::{export_private_key, export_public_key, open, AsymmetricKeyPair};
use crate::relay_protocol::{
    DiagnosticBody, ForwardBody, HopAddress, Layer, NodeId, NodeRecord, TerminalPayload,
};
use crate::transport::HopTransport;

/// Oldest participation entries are dropped past this many.
pub const CIRCUIT_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HopStatus {
    /// Layer decrypted, downstream call not yet answered.
    Pending,
    Forwarded,
    Delivered,
    Failed,
}

/// One "this relay took part in a circuit" record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitEntry {
    pub request_id: u64,
    pub relay_port: u16,
    pub next_hop: HopAddress,
    pub status: HopStatus,
}

/// Diagnostic view of recent traffic. Not consulted by the forwarding path.
///
/// The scalar fields are last-writer-wins: concurrent circuits through the
/// same relay overwrite each other. Use the circuit log, keyed by request id,
/// to tell them apart.
#[derive(Debug, Default)]
struct Observed {
    last_encrypted: Option<String>,
    last_decrypted: Option<String>,
    last_destination: Option<u16>,
    circuit: VecDeque<CircuitEntry>,
}

impl Observed {
    fn begin(&mut self, entry: CircuitEntry) {
        if self.circuit.len() == CIRCUIT_LOG_CAPACITY {
            self.circuit.pop_front();
        }
        self.circuit.push_back(entry);
    }

    fn resolve(&mut self, request_id: u64, status: HopStatus) {
        if let Some(entry) = self
            .circuit
            .iter_mut()
            .rev()
            .find(|e| e.request_id == request_id)
        {
            entry.status = status;
        }
    }
}

pub struct RelayNode {
    node_id: NodeId,
    port: u16,
    keys: AsymmetricKeyPair,
    transport: Arc<dyn HopTransport>,
    observed: Mutex<Observed>,
    next_request_id: AtomicU64,
}

impl RelayNode {
    pub fn new(
        node_id: NodeId,
        port: u16,
        keys: AsymmetricKeyPair,
        transport: Arc<dyn HopTransport>,
    ) -> Self {
        Self {
            node_id,
            port,
            keys,
            transport,
            observed: Mutex::new(Observed::default()),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Directory entry advertising this relay's public key.
    pub fn record(&self) -> Result<NodeRecord> {
        Ok(NodeRecord {
            node_id: self.node_id,
            pub_key: export_public_key(&self.keys.public_key)?,
        })
    }

    pub fn export_private_key(&self) -> Result<String> {
        export_private_key(&self.keys.private_key)
    }

    /// Forward state: decrypt one layer and pass its payload to the next hop.
    ///
    /// The participation entry is appended as soon as the layer parses and is
    /// resolved once the downstream call returns; a failed forward leaves a
    /// `Failed` entry behind rather than removing it.
    pub async fn forward(&self, payload: &[u8]) -> Result<HopAddress> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.observed().last_encrypted = Some(STANDARD.encode(payload));

        let decrypted = self.peel(payload)?;
        let layer: Layer = serde_json::from_str(&decrypted)?;
        let next_hop = layer.next_hop;
        {
            let mut observed = self.observed();
            observed.last_decrypted = Some(decrypted);
            observed.last_destination = Some(next_hop.port());
            observed.begin(CircuitEntry {
                request_id,
                relay_port: self.port,
                next_hop,
                status: HopStatus::Pending,
            });
        }

        let outcome = self.dispatch(&layer).await;
        self.settle(request_id, &outcome);
        outcome.map(|_| next_hop)
    }

    /// Deliver state: the payload is a sealed terminal payload for this relay.
    pub async fn deliver(&self, payload: &[u8]) -> Result<u16> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.observed().last_encrypted = Some(STANDARD.encode(payload));

        let decrypted = self.peel(payload)?;
        let terminal = TerminalPayload::from_bytes(decrypted.as_bytes())?;
        let destination = terminal.destination_port;
        {
            let mut observed = self.observed();
            observed.last_decrypted = Some(decrypted);
            observed.last_destination = Some(destination);
            observed.begin(CircuitEntry {
                request_id,
                relay_port: self.port,
                next_hop: HopAddress::Inbox(destination),
                status: HopStatus::Pending,
            });
        }

        let outcome = self.hand_to_inbox(&terminal).await;
        self.settle(request_id, &outcome);
        outcome.map(|_| destination)
    }

    pub fn last_received_encrypted(&self) -> Option<String> {
        self.observed().last_encrypted.clone()
    }

    pub fn last_received_decrypted(&self) -> Option<String> {
        self.observed().last_decrypted.clone()
    }

    pub fn last_destination(&self) -> Option<u16> {
        self.observed().last_destination
    }

    pub fn circuit_log(&self) -> Vec<CircuitEntry> {
        self.observed().circuit.iter().cloned().collect()
    }

    fn peel(&self, payload: &[u8]) -> Result<String> {
        let plaintext = open(payload, &self.keys.private_key).map_err(|e| {
            warn!(node_id = self.node_id, "layer rejected: {}", e);
            e
        })?;
        String::from_utf8(plaintext)
            .map_err(|_| OnionError::MalformedPayload("layer is not utf-8".to_string()))
    }

    async fn dispatch(&self, layer: &Layer) -> Result<HopStatus> {
        let inner = layer.inner_payload()?;
        match layer.next_hop {
            HopAddress::Relay(port) => {
                debug!(node_id = self.node_id, next = port, "forwarding layer");
                self.transport.forward(port, &inner).await?;
                Ok(HopStatus::Forwarded)
            }
            HopAddress::Inbox(port) => {
                let terminal = TerminalPayload::from_bytes(&inner)?;
                if terminal.destination_port != port {
                    return Err(OnionError::MalformedPayload(format!(
                        "terminal payload addressed to {} inside layer for {}",
                        terminal.destination_port, port
                    )));
                }
                self.hand_to_inbox(&terminal).await
            }
        }
    }

    async fn hand_to_inbox(&self, terminal: &TerminalPayload) -> Result<HopStatus> {
        debug!(node_id = self.node_id, inbox = terminal.destination_port, "delivering message");
        self.transport
            .deliver_message(terminal.destination_port, &terminal.message)
            .await?;
        Ok(HopStatus::Delivered)
    }

    fn settle(&self, request_id: u64, outcome: &Result<HopStatus>) {
        let status = match outcome {
            Ok(status) => *status,
            Err(e) => {
                warn!(node_id = self.node_id, request_id, "hop failed: {}", e);
                HopStatus::Failed
            }
        };
        self.observed().resolve(request_id, status);
    }

    fn observed(&self) -> MutexGuard<'_, Observed> {
        self.observed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn router(relay: Arc<RelayNode>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/forward", post(forward))
        .route("/deliver", post(deliver))
        .route("/getLastReceivedEncryptedMessage", get(last_encrypted))
        .route("/getLastReceivedDecryptedMessage", get(last_decrypted))
        .route("/getLastMessageDestination", get(last_destination))
        .route("/getPrivateKey", get(private_key))
        .route("/getLastCircuit", get(last_circuit))
        .with_state(relay)
}

async fn status() -> &'static str {
    "live"
}

async fn forward(
    State(relay): State<Arc<RelayNode>>,
    Json(body): Json<ForwardBody>,
) -> Result<&'static str> {
    let payload = body.decode()?;
    let next_hop = relay.forward(&payload).await?;
    info!(node_id = relay.node_id(), next = next_hop.port(), "layer forwarded");
    Ok("forwarded")
}

async fn deliver(
    State(relay): State<Arc<RelayNode>>,
    Json(body): Json<ForwardBody>,
) -> Result<&'static str> {
    let payload = body.decode()?;
    let inbox = relay.deliver(&payload).await?;
    info!(node_id = relay.node_id(), inbox, "message delivered");
    Ok("delivered")
}

async fn last_encrypted(State(relay): State<Arc<RelayNode>>) -> Json<DiagnosticBody<Option<String>>> {
    Json(DiagnosticBody {
        result: relay.last_received_encrypted(),
    })
}

async fn last_decrypted(State(relay): State<Arc<RelayNode>>) -> Json<DiagnosticBody<Option<String>>> {
    Json(DiagnosticBody {
        result: relay.last_received_decrypted(),
    })
}

async fn last_destination(State(relay): State<Arc<RelayNode>>) -> Json<DiagnosticBody<Option<u16>>> {
    Json(DiagnosticBody {
        result: relay.last_destination(),
    })
}

async fn private_key(State(relay): State<Arc<RelayNode>>) -> Result<Json<DiagnosticBody<String>>> {
    Ok(Json(DiagnosticBody {
        result: relay.export_private_key()?,
    }))
}

async fn last_circuit(State(relay): State<Arc<RelayNode>>) -> Json<DiagnosticBody<Vec<CircuitEntry>>> {
    Json(DiagnosticBody {
        result: relay.circuit_log(),
    })
}
