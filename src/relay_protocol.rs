//! Wire types exchanged between the directory, relays and users.
//!
//! Every HTTP body is JSON. Binary payloads travel as standard base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{OnionError, Result};

pub type NodeId = u16;

/// Directory entry for one relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub pub_key: String,
}

pub type RegisterNodeBody = NodeRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegistryBody {
    pub nodes: Vec<NodeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardBody {
    pub payload: String,
}

impl ForwardBody {
    pub fn from_bytes(payload: &[u8]) -> Self {
        Self {
            payload: STANDARD.encode(payload),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        Ok(STANDARD.decode(&self.payload)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    pub message: String,
    pub destination_user_id: NodeId,
}

/// Envelope for every diagnostic GET endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticBody<T> {
    pub result: T,
}

/// Where a relay sends what it peeled off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "port", rename_all = "camelCase")]
pub enum HopAddress {
    /// Forward endpoint of another relay.
    Relay(u16),
    /// Message endpoint of the destination user.
    Inbox(u16),
}

impl HopAddress {
    pub fn port(&self) -> u16 {
        match self {
            HopAddress::Relay(port) | HopAddress::Inbox(port) => *port,
        }
    }
}

/// What one relay recovers from its envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub next_hop: HopAddress,
    pub payload: String,
}

impl Layer {
    pub fn wrap(next_hop: HopAddress, inner: &[u8]) -> Self {
        Self {
            next_hop,
            payload: STANDARD.encode(inner),
        }
    }

    pub fn inner_payload(&self) -> Result<Vec<u8>> {
        Ok(STANDARD.decode(&self.payload)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Innermost payload, readable only by the exit relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalPayload {
    pub destination_port: u16,
    pub message: String,
}

impl TerminalPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| OnionError::MalformedPayload(format!("terminal payload: {}", e)))
    }
}
