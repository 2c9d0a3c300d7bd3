//! Transport collaborator interfaces.
//!
//! The networking layer never touches sockets directly. It asks a
//! [`Transport`] for named endpoints (idempotent lookup-or-create keyed by
//! `(scope, id)`), sends through them, and receives deliveries through a single
//! handler per endpoint. Connected peers and disconnects come from the
//! transport's [`PeerSet`].
//!
//! Two implementations ship with the crate:
//! - [`memory`]: in-process hub for tests and single-process setups
//! - [`tcp`]: length-prefixed msgpack frames over TCP

pub mod memory;
pub mod router;
pub mod tcp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use router::Router;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::middleware::Args;
use crate::types::{PeerId, Result};

/// Which end of the link the local process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Server,
    Client,
}

/// Delivery guarantee of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Reliability {
    #[default]
    Reliable,
    Unreliable,
}

impl Reliability {
    pub fn is_reliable(self) -> bool {
        matches!(self, Reliability::Reliable)
    }
}

/// Destination of an outbound message, and key of a pending-call table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Target {
    /// The server (only meaningful from a client).
    Server,
    /// One connected client (only meaningful from the server).
    Peer(PeerId),
}

impl Target {
    pub fn peer(&self) -> Option<&PeerId> {
        match self {
            Target::Server => None,
            Target::Peer(peer) => Some(peer),
        }
    }
}

impl From<PeerId> for Target {
    fn from(peer: PeerId) -> Self {
        Target::Peer(peer)
    }
}

impl From<&PeerId> for Target {
    fn from(peer: &PeerId) -> Self {
        Target::Peer(peer.clone())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Server => write!(f, "server"),
            Target::Peer(peer) => write!(f, "{}", peer),
        }
    }
}

/// Invoked for every inbound message: `(sender, args)`; sender is `None`
/// when the server sent it.
pub type DeliveryHandler = Arc<dyn Fn(Option<PeerId>, Args) + Send + Sync>;

/// Invoked when the remote end identified by the target goes away.
pub type DisconnectCallback = Arc<dyn Fn(&Target) + Send + Sync>;

/// One named, peer-scoped message endpoint.
pub trait Endpoint: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn reliability(&self) -> Reliability;

    /// Send `args` to `target`. From a client the target must be `Server`.
    fn send(&self, target: &Target, args: Args) -> Result<()>;

    /// Install the inbound handler. Messages that arrived before a handler
    /// was installed are delivered to it in order.
    fn set_handler(&self, handler: DeliveryHandler) -> Result<()>;
}

/// Enumerates connected peers and reports disconnects.
#[cfg_attr(test, mockall::automock)]
pub trait PeerSet: Send + Sync {
    /// Currently connected clients (always empty on a client).
    fn connected(&self) -> Vec<PeerId>;

    fn on_disconnect(&self, callback: DisconnectCallback);
}

/// Endpoint registry for one side of the link.
pub trait Transport: Send + Sync + fmt::Debug {
    fn side(&self) -> Side;

    /// Look up or create the endpoint `id` inside `scope`. Calling this
    /// repeatedly with the same arguments returns an equivalent endpoint.
    fn endpoint(&self, scope: &str, id: &str, reliability: Reliability) -> Result<Arc<dyn Endpoint>>;

    fn peers(&self) -> Arc<dyn PeerSet>;
}
