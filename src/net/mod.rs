use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod local;
pub mod node;
pub mod registry;
pub mod wire;

pub use local::{LocalTransport, RPC_CHANNEL_SIZE};
pub use node::{Node, NodeError, NodeOpts, SIGN_REQUEST_TIMEOUT};
pub use registry::NodeRegistry;
pub use wire::{Message, WireError};

#[derive(Debug, Error)]
pub enum NetError {
    #[error("transport {me} could not find peer {to}")]
    UnknownPeer { me: NetAddr, to: NetAddr },
    #[error("send to {0} failed: channel unavailable")]
    SendFailed(NetAddr),
    #[error("no address registered for public key {0}")]
    UnknownPublicKey(String),
    #[error("no public key registered for address {0}")]
    UnknownAddress(NetAddr),
}

/// Endpoint identity on the message-passing layer. Opaque to consensus;
/// the registry maps public keys onto these.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetAddr(pub String);

impl NetAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }
}

impl std::fmt::Display for NetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NetAddr {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One delivered payload with its sender.
#[derive(Clone, Debug)]
pub struct Rpc {
    pub from: NetAddr,
    pub payload: Vec<u8>,
}

/// Byte-level message passing between peers. The node coordinator only
/// needs these three capabilities; wiring up peers is transport-specific.
pub trait Transport: Send + Sync {
    fn address(&self) -> NetAddr;
    fn send_message(&self, to: &NetAddr, payload: Vec<u8>) -> Result<(), NetError>;
    fn broadcast(&self, payload: Vec<u8>) -> Result<(), NetError>;
}
