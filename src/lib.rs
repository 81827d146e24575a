//! Minimal onion-routing overlay.
//!
//! A sender wraps its message in one encrypted layer per relay. Each relay
//! peels its own layer, learns only the next hop, and passes the rest on; the
//! exit relay hands the plaintext to the destination user's inbox.
//!
//! ```rust,no_run
//! use onion_circuit::{LocalNetwork, NetworkConfig, NetworkLayout};
//!
//! #[tokio::main]
//! async fn main() -> onion_circuit::Result<()> {
//!     let network = LocalNetwork::launch(NetworkConfig::default(), NetworkLayout::new(5, 2)).await?;
//!     if let Some(alice) = network.user(0) {
//!         alice.send(1, "hello").await?;
//!     }
//!     network.shutdown();
//!     Ok(())
//! }
//! ```

pub mod anonymity;
pub mod circuit;
pub mod config;
pub mod directory;
pub mod error;
pub mod key_management;
pub mod logging;
pub mod relay;
pub mod relay_protocol;
pub mod session;
pub mod transport;
pub mod user;


pub use anonymity::{FixedPathSelector, PathSelector, RandomPathSelector};
pub use circuit::{Circuit, CircuitBuilder};
pub use config::NetworkConfig;
pub use directory::{Directory, DirectoryClient, HttpDirectoryClient};
pub use error::{OnionError, Result};
pub use relay::{CircuitEntry, HopStatus, RelayNode};
pub use relay_protocol::{HopAddress, Layer, NodeId, NodeRecord, TerminalPayload};
pub use session::{LocalNetwork, NetworkLayout};
pub use transport::{HopTransport, HttpHopTransport};
pub use user::UserNode;
