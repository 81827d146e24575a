use std::time::Duration;

use crate::error::{OnionError, Result};
use crate::key_management::{oaep_capacity, SYMMETRIC_KEY_LEN};
use crate::relay_protocol::NodeId;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_DIRECTORY_PORT: u16 = 8080;
pub const DEFAULT_BASE_RELAY_PORT: u16 = 4000;
pub const DEFAULT_BASE_USER_PORT: u16 = 3000;
pub const DEFAULT_CIRCUIT_LENGTH: usize = 3;
pub const DEFAULT_RSA_KEY_BITS: usize = 2048;
pub const DEFAULT_HOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Addressing and protocol parameters shared by every participant.
///
/// All participants live on `host`. The directory sits on a fixed port, relay
/// `i` on `base_relay_port + i` and user `i` on `base_user_port + i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub host: String,
    pub directory_port: u16,
    pub base_relay_port: u16,
    pub base_user_port: u16,
    pub circuit_length: usize,
    pub rsa_key_bits: usize,
    /// Upper bound for a single outbound hop call, downstream chain included.
    pub hop_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            directory_port: DEFAULT_DIRECTORY_PORT,
            base_relay_port: DEFAULT_BASE_RELAY_PORT,
            base_user_port: DEFAULT_BASE_USER_PORT,
            circuit_length: DEFAULT_CIRCUIT_LENGTH,
            rsa_key_bits: DEFAULT_RSA_KEY_BITS,
            hop_timeout: DEFAULT_HOP_TIMEOUT,
        }
    }
}

impl NetworkConfig {
    pub fn with_ports(mut self, directory: u16, base_relay: u16, base_user: u16) -> Self {
        self.directory_port = directory;
        self.base_relay_port = base_relay;
        self.base_user_port = base_user;
        self
    }

    pub fn with_circuit_length(mut self, length: usize) -> Self {
        self.circuit_length = length;
        self
    }

    pub fn with_rsa_key_bits(mut self, bits: usize) -> Self {
        self.rsa_key_bits = bits;
        self
    }

    pub fn with_hop_timeout(mut self, timeout: Duration) -> Self {
        self.hop_timeout = timeout;
        self
    }

    /// Reads `ONION_*` overrides on top of the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("ONION_HOST") {
            config.host = host;
        }
        if let Some(port) = env_parse("ONION_DIRECTORY_PORT")? {
            config.directory_port = port;
        }
        if let Some(port) = env_parse("ONION_BASE_RELAY_PORT")? {
            config.base_relay_port = port;
        }
        if let Some(port) = env_parse("ONION_BASE_USER_PORT")? {
            config.base_user_port = port;
        }
        if let Some(length) = env_parse("ONION_CIRCUIT_LENGTH")? {
            config.circuit_length = length;
        }
        if let Some(bits) = env_parse("ONION_RSA_KEY_BITS")? {
            config.rsa_key_bits = bits;
        }
        if let Some(millis) = env_parse::<u64>("ONION_HOP_TIMEOUT_MS")? {
            config.hop_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.circuit_length == 0 {
            return Err(OnionError::InvalidConfig(
                "circuit length must be at least 1".to_string(),
            ));
        }
        if self.rsa_key_bits % 8 != 0 {
            return Err(OnionError::InvalidConfig(format!(
                "rsa key size {} is not a whole number of bytes",
                self.rsa_key_bits
            )));
        }
        // Each layer wraps one symmetric key under the hop's RSA key.
        if oaep_capacity(self.rsa_key_bits / 8) < SYMMETRIC_KEY_LEN {
            return Err(OnionError::InvalidConfig(format!(
                "rsa key size {} cannot wrap a {}-byte layer key",
                self.rsa_key_bits, SYMMETRIC_KEY_LEN
            )));
        }
        if self.hop_timeout.is_zero() {
            return Err(OnionError::InvalidConfig(
                "hop timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn relay_port(&self, node_id: NodeId) -> Result<u16> {
        offset_port(self.base_relay_port, node_id)
    }

    pub fn user_port(&self, user_id: NodeId) -> Result<u16> {
        offset_port(self.base_user_port, user_id)
    }

    pub fn url(&self, port: u16, path: &str) -> String {
        format!("http://{}:{}{}", self.host, port, path)
    }

    pub fn directory_url(&self) -> String {
        format!("http://{}:{}", self.host, self.directory_port)
    }
}

fn offset_port(base: u16, id: NodeId) -> Result<u16> {
    base.checked_add(id).ok_or_else(|| {
        OnionError::InvalidConfig(format!("id {} overflows port range from base {}", id, base))
    })
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| OnionError::InvalidConfig(format!("invalid {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}
