//! End user: sends through circuits and keeps an inbox of one message.

use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{info, warn};

use crate::circuit::{Circuit, CircuitBuilder};
use crate::error::Result;
use crate::relay_protocol::{DiagnosticBody, MessageBody, NodeId, SendMessageBody};

#[derive(Debug, Default)]
struct Mailbox {
    last_received: Option<String>,
    last_sent: Option<String>,
    last_circuit: Vec<NodeId>,
}

pub struct UserNode {
    user_id: NodeId,
    port: u16,
    builder: CircuitBuilder,
    mailbox: Mutex<Mailbox>,
}

impl UserNode {
    pub fn new(user_id: NodeId, port: u16, builder: CircuitBuilder) -> Self {
        Self {
            user_id,
            port,
            builder,
            mailbox: Mutex::new(Mailbox::default()),
        }
    }

    pub fn user_id(&self) -> NodeId {
        self.user_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn receive(&self, message: String) {
        self.mailbox().last_received = Some(message);
    }

    /// Records the message as sent before the circuit is built, so a failed
    /// send still shows up in `last_sent`.
    pub async fn send(&self, destination_user_id: NodeId, message: &str) -> Result<Circuit> {
        self.mailbox().last_sent = Some(message.to_string());
        let circuit = self.builder.send(destination_user_id, message).await?;
        self.mailbox().last_circuit = circuit.node_ids();
        Ok(circuit)
    }

    pub fn last_received(&self) -> Option<String> {
        self.mailbox().last_received.clone()
    }

    pub fn last_sent(&self) -> Option<String> {
        self.mailbox().last_sent.clone()
    }

    pub fn last_circuit(&self) -> Vec<NodeId> {
        self.mailbox().last_circuit.clone()
    }

    fn mailbox(&self) -> MutexGuard<'_, Mailbox> {
        self.mailbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn router(user: Arc<UserNode>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/message", post(message))
        .route("/sendMessage", post(send_message))
        .route("/getLastReceivedMessage", get(last_received))
        .route("/getLastSentMessage", get(last_sent))
        .route("/getLastCircuit", get(last_circuit))
        .with_state(user)
}

async fn status() -> &'static str {
    "live"
}

async fn message(State(user): State<Arc<UserNode>>, Json(body): Json<MessageBody>) -> &'static str {
    user.receive(body.message);
    "success"
}

async fn send_message(
    State(user): State<Arc<UserNode>>,
    Json(body): Json<SendMessageBody>,
) -> Result<&'static str> {
    match user.send(body.destination_user_id, &body.message).await {
        Ok(circuit) => {
            info!(user_id = user.user_id(), circuit = ?circuit.node_ids(), "message sent");
            Ok("success")
        }
        Err(e) => {
            warn!(user_id = user.user_id(), "send failed: {}", e);
            Err(e)
        }
    }
}

async fn last_received(State(user): State<Arc<UserNode>>) -> Json<DiagnosticBody<Option<String>>> {
    Json(DiagnosticBody {
        result: user.last_received(),
    })
}

async fn last_sent(State(user): State<Arc<UserNode>>) -> Json<DiagnosticBody<Option<String>>> {
    Json(DiagnosticBody {
        result: user.last_sent(),
    })
}

async fn last_circuit(State(user): State<Arc<UserNode>>) -> Json<DiagnosticBody<Vec<NodeId>>> {
    Json(DiagnosticBody {
        result: user.last_circuit(),
    })
}
