use async_trait::async_trait;
use tracing::debug;

use crate::config::NetworkConfig;
use crate::error::{OnionError, Result};
use crate::relay_protocol::{ForwardBody, MessageBody};

/// Outbound hop calls made by senders and relays.
///
/// Each call resolves only once the receiving side has finished its own
/// handling, so a forward to the entry relay covers the whole circuit.
#[async_trait]
pub trait HopTransport: Send + Sync {
    /// POST an onion to a relay's forward endpoint.
    async fn forward(&self, relay_port: u16, payload: &[u8]) -> Result<()>;

    /// POST a sealed terminal payload to a relay's deliver endpoint.
    async fn deliver(&self, relay_port: u16, payload: &[u8]) -> Result<()>;

    /// Hand a plaintext message to a user's inbox.
    async fn deliver_message(&self, inbox_port: u16, message: &str) -> Result<()>;
}

/// JSON-over-HTTP transport bound to the configured host.
#[derive(Debug, Clone)]
pub struct HttpHopTransport {
    http: reqwest::Client,
    config: NetworkConfig,
}

impl HttpHopTransport {
    pub fn new(config: NetworkConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.hop_timeout)
            .build()
            .map_err(|e| OnionError::InvalidConfig(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.http
    }

    async fn post<T: serde::Serialize + Sync>(&self, port: u16, path: &str, body: &T) -> Result<()> {
        let url = self.config.url(port, path);
        debug!(%url, "hop call");
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(map_send_error)?;

        // The body is not read: it describes hops past this one.
        let status = response.status();
        if !status.is_success() {
            return Err(OnionError::ForwardUnreachable(format!(
                "{} returned {}",
                url, status
            )));
        }
        Ok(())
    }
}

fn map_send_error(err: reqwest::Error) -> OnionError {
    if err.is_timeout() {
        OnionError::Timeout
    } else {
        OnionError::ForwardUnreachable(err.to_string())
    }
}

#[async_trait]
impl HopTransport for HttpHopTransport {
    async fn forward(&self, relay_port: u16, payload: &[u8]) -> Result<()> {
        self.post(relay_port, "/forward", &ForwardBody::from_bytes(payload))
            .await
    }

    async fn deliver(&self, relay_port: u16, payload: &[u8]) -> Result<()> {
        self.post(relay_port, "/deliver", &ForwardBody::from_bytes(payload))
            .await
    }

    async fn deliver_message(&self, inbox_port: u16, message: &str) -> Result<()> {
        let body = MessageBody {
            message: message.to_string(),
        };
        self.post(inbox_port, "/message", &body).await
    }
}
