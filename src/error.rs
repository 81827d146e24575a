//! Error types shared by the key codec, circuit builder and relays.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::relay_protocol::NodeId;

#[derive(Error, Debug)]
pub enum OnionError {
    #[error("payload of {size} bytes exceeds asymmetric capacity of {capacity} bytes")]
    PayloadTooLarge { size: usize, capacity: usize },

    #[error("layer could not be decrypted with the held private key")]
    DecryptionFailed,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("circuit needs {required} relays but only {available} are eligible")]
    InsufficientNodes { required: usize, available: usize },

    #[error("node {0} is not registered in the directory")]
    UnknownNode(NodeId),

    #[error("next hop unreachable: {0}")]
    ForwardUnreachable(String),

    #[error("timed out waiting for next hop")]
    Timeout,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for OnionError {
    fn from(err: serde_json::Error) -> Self {
        OnionError::MalformedPayload(err.to_string())
    }
}

impl From<base64::DecodeError> for OnionError {
    fn from(err: base64::DecodeError) -> Self {
        OnionError::MalformedPayload(err.to_string())
    }
}

impl OnionError {
    /// Fixed text per kind. Carries no ports, keys or payload detail.
    pub fn kind_label(&self) -> &'static str {
        match self {
            OnionError::PayloadTooLarge { .. } => "payload too large",
            OnionError::DecryptionFailed => "decryption failed",
            OnionError::InvalidKey(_) => "invalid key",
            OnionError::MalformedPayload(_) => "malformed payload",
            OnionError::DirectoryUnavailable(_) => "directory unavailable",
            OnionError::InsufficientNodes { .. } => "insufficient nodes",
            OnionError::UnknownNode(_) => "unknown node",
            OnionError::ForwardUnreachable(_) => "forward failed",
            OnionError::Timeout => "timed out",
            OnionError::InvalidConfig(_) => "invalid configuration",
            OnionError::Io(_) => "internal error",
        }
    }
}

/// Any failure inside a hop answers the immediate caller with a 500 and the
/// kind label only, so nothing about later hops travels back upstream.
impl IntoResponse for OnionError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.kind_label()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, OnionError>;
