//! In-process transport.
//!
//! A [`MemoryNetwork`] is a hub connecting one server node and any number of
//! client nodes. Every node owns an unbounded mailbox drained by a pump task,
//! so messages from one sender arrive in send order and handlers never run on
//! the sender's stack. Unreliable endpoints are delivered reliably.
//!
//! ```text
//!   endpoint.send ──▶ hub lookup ──▶ node mailbox ──▶ pump ──▶ Router ──▶ handler
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

use super::{
    DeliveryHandler, DisconnectCallback, Endpoint, PeerSet, Reliability, Router, Side, Target,
    Transport,
};
use crate::middleware::Args;
use crate::types::{Error, PeerId, Result};

struct Packet {
    scope: String,
    id: String,
    sender: Option<PeerId>,
    args: Args,
}

struct Node {
    side: Side,
    /// Identity of a client node; `None` for the server.
    peer: Option<PeerId>,
    router: Arc<Router>,
    mailbox: mpsc::UnboundedSender<Packet>,
    disconnect_listeners: Mutex<Vec<DisconnectCallback>>,
    hub: Weak<Hub>,
}

impl Node {
    fn spawn(side: Side, peer: Option<PeerId>, hub: &Arc<Hub>) -> Result<Arc<Self>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::internal("memory transport requires a tokio runtime"))?;

        let router = Arc::new(Router::new());
        let (mailbox, mut rx) = mpsc::unbounded_channel::<Packet>();
        let pump_router = router.clone();
        runtime.spawn(async move {
            while let Some(packet) = rx.recv().await {
                pump_router.deliver(&packet.scope, &packet.id, packet.sender, packet.args);
            }
        });

        Ok(Arc::new(Self {
            side,
            peer,
            router,
            mailbox,
            disconnect_listeners: Mutex::new(Vec::new()),
            hub: Arc::downgrade(hub),
        }))
    }

    fn notify_disconnect(&self, target: &Target) {
        let listeners = self.disconnect_listeners.lock().clone();
        for listener in listeners {
            listener(target);
        }
    }

    fn push(&self, packet: Packet) -> Result<()> {
        self.mailbox
            .send(packet)
            .map_err(|_| Error::transport("mailbox closed"))
    }
}

#[derive(Default)]
struct Hub {
    server: Mutex<Option<Arc<Node>>>,
    clients: Mutex<HashMap<PeerId, Arc<Node>>>,
}

/// In-process hub linking one server transport with its client transports.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Hub>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the server side. Only one server may exist per network.
    ///
    /// Must be called from within a tokio runtime.
    pub fn server(&self) -> Result<MemoryTransport> {
        let mut server = self.hub.server.lock();
        if server.is_some() {
            return Err(Error::validation("memory network already has a server"));
        }
        let node = Node::spawn(Side::Server, None, &self.hub)?;
        *server = Some(node.clone());
        tracing::debug!("Memory server node created");
        Ok(MemoryTransport { node })
    }

    /// Connect a client with the given identity.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, peer: PeerId) -> Result<MemoryTransport> {
        let mut clients = self.hub.clients.lock();
        if clients.contains_key(&peer) {
            return Err(Error::validation(format!("peer '{}' is already connected", peer)));
        }
        let node = Node::spawn(Side::Client, Some(peer.clone()), &self.hub)?;
        clients.insert(peer.clone(), node.clone());
        tracing::debug!("Memory client '{}' connected", peer);
        Ok(MemoryTransport { node })
    }

    /// Disconnect a client. Fires the server's disconnect listeners with
    /// `Target::Peer(peer)` and the client's with `Target::Server`.
    ///
    /// Returns `false` if the peer was not connected.
    pub fn disconnect(&self, peer: &PeerId) -> bool {
        let Some(client) = self.hub.clients.lock().remove(peer) else {
            return false;
        };
        tracing::debug!("Memory client '{}' disconnected", peer);

        let server = self.hub.server.lock().clone();
        if let Some(server) = server {
            server.notify_disconnect(&Target::Peer(peer.clone()));
        }
        client.notify_disconnect(&Target::Server);
        true
    }

    pub fn connected(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.hub.clients.lock().keys().cloned().collect();
        peers.sort();
        peers
    }
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("has_server", &self.hub.server.lock().is_some())
            .field("clients", &self.hub.clients.lock().len())
            .finish()
    }
}

/// One node of a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    node: Arc<Node>,
}

impl MemoryTransport {
    /// The client's identity; `None` on the server.
    pub fn peer_id(&self) -> Option<&PeerId> {
        self.node.peer.as_ref()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("side", &self.node.side)
            .field("peer", &self.node.peer)
            .finish()
    }
}

impl Transport for MemoryTransport {
    fn side(&self) -> Side {
        self.node.side
    }

    fn endpoint(&self, scope: &str, id: &str, reliability: Reliability) -> Result<Arc<dyn Endpoint>> {
        self.node.router.claim(scope, id, reliability)?;
        Ok(Arc::new(MemoryEndpoint {
            node: self.node.clone(),
            scope: scope.to_string(),
            id: id.to_string(),
            reliability,
        }))
    }

    fn peers(&self) -> Arc<dyn PeerSet> {
        Arc::new(MemoryPeers {
            node: self.node.clone(),
        })
    }
}

struct MemoryEndpoint {
    node: Arc<Node>,
    scope: String,
    id: String,
    reliability: Reliability,
}

impl MemoryEndpoint {
    fn destination(&self, target: &Target) -> Result<(Arc<Node>, Option<PeerId>)> {
        let hub = self
            .node
            .hub
            .upgrade()
            .ok_or_else(|| Error::transport("memory network dropped"))?;

        match (self.node.side, target) {
            (Side::Server, Target::Peer(peer)) => {
                let client = hub
                    .clients
                    .lock()
                    .get(peer)
                    .cloned()
                    .ok_or_else(|| Error::transport(format!("peer '{}' is not connected", peer)))?;
                Ok((client, None))
            }
            (Side::Client, Target::Server) => {
                let me = self.node.peer.clone();
                let connected = me
                    .as_ref()
                    .is_some_and(|peer| hub.clients.lock().contains_key(peer));
                if !connected {
                    return Err(Error::transport("client is not connected"));
                }
                let server = hub
                    .server
                    .lock()
                    .clone()
                    .ok_or_else(|| Error::transport("memory network has no server"))?;
                Ok((server, me))
            }
            (Side::Server, Target::Server) => {
                Err(Error::validation("the server cannot send to itself"))
            }
            (Side::Client, Target::Peer(peer)) => Err(Error::validation(format!(
                "a client can only send to the server, not '{}'",
                peer
            ))),
        }
    }
}

impl std::fmt::Debug for MemoryEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEndpoint")
            .field("scope", &self.scope)
            .field("id", &self.id)
            .field("reliability", &self.reliability)
            .finish()
    }
}

impl Endpoint for MemoryEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    fn reliability(&self) -> Reliability {
        self.reliability
    }

    fn send(&self, target: &Target, args: Args) -> Result<()> {
        let (node, sender) = self.destination(target)?;
        node.push(Packet {
            scope: self.scope.clone(),
            id: self.id.clone(),
            sender,
            args,
        })
    }

    fn set_handler(&self, handler: DeliveryHandler) -> Result<()> {
        self.node.router.set_handler(&self.scope, &self.id, handler);
        Ok(())
    }
}

struct MemoryPeers {
    node: Arc<Node>,
}

impl PeerSet for MemoryPeers {
    fn connected(&self) -> Vec<PeerId> {
        if self.node.side == Side::Client {
            return Vec::new();
        }
        self.node
            .hub
            .upgrade()
            .map(|hub| MemoryNetwork { hub }.connected())
            .unwrap_or_default()
    }

    fn on_disconnect(&self, callback: DisconnectCallback) {
        self.node.disconnect_listeners.lock().push(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn capture(endpoint: &Arc<dyn Endpoint>) -> UnboundedReceiver<(Option<PeerId>, Args)> {
        let (tx, rx) = mpsc::unbounded_channel();
        endpoint
            .set_handler(Arc::new(move |sender, args| {
                let _ = tx.send((sender, args));
            }))
            .unwrap();
        rx
    }

    async fn next(rx: &mut UnboundedReceiver<(Option<PeerId>, Args)>) -> (Option<PeerId>, Args) {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("delivery timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_client_to_server_carries_sender() {
        let net = MemoryNetwork::new();
        let server = net.server().unwrap();
        let alice = net.connect(PeerId::named("alice")).unwrap();

        let inbound = server.endpoint("game", "chat", Reliability::Reliable).unwrap();
        let mut rx = capture(&inbound);
        let outbound = alice.endpoint("game", "chat", Reliability::Reliable).unwrap();
        outbound.send(&Target::Server, vec![json!("hi")]).unwrap();

        let (sender, args) = next(&mut rx).await;
        assert_eq!(sender, Some(PeerId::named("alice")));
        assert_eq!(args, vec![json!("hi")]);
    }

    #[tokio::test]
    async fn test_messages_buffer_until_handler() {
        let net = MemoryNetwork::new();
        let server = net.server().unwrap();
        let bob = net.connect(PeerId::named("bob")).unwrap();

        let outbound = server.endpoint("game", "tick", Reliability::Reliable).unwrap();
        for i in 0..3 {
            outbound.send(&Target::Peer(PeerId::named("bob")), vec![json!(i)]).unwrap();
        }
        tokio::task::yield_now().await;

        let inbound = bob.endpoint("game", "tick", Reliability::Reliable).unwrap();
        let mut rx = capture(&inbound);
        for i in 0..3 {
            let (sender, args) = next(&mut rx).await;
            assert_eq!(sender, None);
            assert_eq!(args, vec![json!(i)]);
        }
    }

    #[tokio::test]
    async fn test_role_checks() {
        let net = MemoryNetwork::new();
        let server = net.server().unwrap();
        let carol = net.connect(PeerId::named("carol")).unwrap();

        let from_server = server.endpoint("g", "x", Reliability::Reliable).unwrap();
        assert!(matches!(
            from_server.send(&Target::Server, vec![]),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            from_server.send(&Target::Peer(PeerId::named("nobody")), vec![]),
            Err(Error::Transport(_))
        ));

        let from_client = carol.endpoint("g", "x", Reliability::Reliable).unwrap();
        assert!(matches!(
            from_client.send(&Target::Peer(PeerId::named("carol")), vec![]),
            Err(Error::Validation(_))
        ));
        assert!(net.server().is_err());
        assert!(net.connect(PeerId::named("carol")).is_err());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_both_sides() {
        let net = MemoryNetwork::new();
        let server = net.server().unwrap();
        let dave = net.connect(PeerId::named("dave")).unwrap();
        assert_eq!(server.peers().connected(), vec![PeerId::named("dave")]);
        assert!(dave.peers().connected().is_empty());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let server_seen = seen.clone();
        server
            .peers()
            .on_disconnect(Arc::new(move |target| server_seen.lock().push(target.clone())));
        let client_seen = seen.clone();
        dave.peers()
            .on_disconnect(Arc::new(move |target| client_seen.lock().push(target.clone())));

        assert!(net.disconnect(&PeerId::named("dave")));
        assert!(!net.disconnect(&PeerId::named("dave")));
        assert_eq!(
            *seen.lock(),
            vec![Target::Peer(PeerId::named("dave")), Target::Server]
        );
        assert!(server.peers().connected().is_empty());

        let endpoint = dave.endpoint("g", "x", Reliability::Reliable).unwrap();
        assert!(matches!(
            endpoint.send(&Target::Server, vec![]),
            Err(Error::Transport(_))
        ));
    }

    #[test]
    fn test_requires_runtime() {
        let net = MemoryNetwork::new();
        assert!(matches!(net.server(), Err(Error::Internal(_))));
    }
}
