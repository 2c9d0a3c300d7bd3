//! TCP transport: length-prefixed msgpack frames.
//!
//! One connection per client. Every endpoint message travels as a `MESSAGE`
//! frame tagged with its `(scope, endpoint)` pair; the receiving side routes it
//! through a [`Router`]. TCP is always reliable and ordered, so unreliable
//! endpoints are carried the same way.
//!
//! ```text
//!   Endpoint::send ──▶ link queue ──▶ writer task ──▶ socket
//!   socket ──▶ reader loop ──▶ Router ──▶ handler
//! ```

pub mod client;
pub mod codec;
pub mod server;

pub use client::TcpClient;
pub use server::TcpServer;

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use self::codec::{read_frame, write_frame, WireMessage, MSG_MESSAGE};
use super::{
    DeliveryHandler, DisconnectCallback, Endpoint, PeerSet, Reliability, Router, Side, Target,
};
use crate::middleware::Args;
use crate::types::{Error, PeerId, Result, TcpConfig};

/// State shared by a TCP transport and its connection tasks.
struct Shared {
    side: Side,
    router: Router,
    links: Mutex<HashMap<Target, mpsc::Sender<Bytes>>>,
    disconnect_listeners: Mutex<Vec<DisconnectCallback>>,
    config: TcpConfig,
}

impl Shared {
    fn new(side: Side, config: TcpConfig) -> Arc<Self> {
        Arc::new(Self {
            side,
            router: Router::new(),
            links: Mutex::new(HashMap::new()),
            disconnect_listeners: Mutex::new(Vec::new()),
            config,
        })
    }

    fn endpoint(self: &Arc<Self>, scope: &str, id: &str, reliability: Reliability) -> Result<Arc<dyn Endpoint>> {
        self.router.claim(scope, id, reliability)?;
        Ok(Arc::new(TcpEndpoint {
            shared: self.clone(),
            scope: scope.to_string(),
            id: id.to_string(),
            reliability,
        }))
    }

    fn peers(self: &Arc<Self>) -> Arc<dyn PeerSet> {
        Arc::new(TcpPeers { shared: self.clone() })
    }

    fn connected(&self) -> Vec<PeerId> {
        if self.side == Side::Client {
            return Vec::new();
        }
        let mut peers: Vec<PeerId> = self
            .links
            .lock()
            .keys()
            .filter_map(|target| target.peer().cloned())
            .collect();
        peers.sort();
        peers
    }

    /// Register an outbound link. Fails if one already exists for `remote`.
    fn attach(&self, remote: Target) -> Result<mpsc::Receiver<Bytes>> {
        let mut links = self.links.lock();
        if links.contains_key(&remote) {
            return Err(Error::validation(format!("'{}' is already connected", remote)));
        }
        let (tx, rx) = mpsc::channel(self.config.send_queue_capacity.max(1));
        links.insert(remote, tx);
        Ok(rx)
    }

    fn detach(&self, remote: &Target) {
        let removed = self.links.lock().remove(remote).is_some();
        if !removed {
            return;
        }
        let listeners = self.disconnect_listeners.lock().clone();
        for listener in listeners {
            listener(remote);
        }
    }

    fn check_target(&self, target: &Target) -> Result<()> {
        match (self.side, target) {
            (Side::Server, Target::Server) => Err(Error::validation("the server cannot send to itself")),
            (Side::Client, Target::Peer(peer)) => Err(Error::validation(format!(
                "a client can only send to the server, not '{}'",
                peer
            ))),
            _ => Ok(()),
        }
    }
}

struct TcpEndpoint {
    shared: Arc<Shared>,
    scope: String,
    id: String,
    reliability: Reliability,
}

impl std::fmt::Debug for TcpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpEndpoint")
            .field("side", &self.shared.side)
            .field("scope", &self.scope)
            .field("id", &self.id)
            .field("reliability", &self.reliability)
            .finish()
    }
}

impl Endpoint for TcpEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    fn reliability(&self) -> Reliability {
        self.reliability
    }

    fn send(&self, target: &Target, args: Args) -> Result<()> {
        self.shared.check_target(target)?;
        let link = self
            .shared
            .links
            .lock()
            .get(target)
            .cloned()
            .ok_or_else(|| Error::transport(format!("'{}' is not connected", target)))?;

        let frame = codec::encode(&WireMessage {
            scope: self.scope.clone(),
            endpoint: self.id.clone(),
            args,
        })?;
        link.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::transport(format!("send queue to '{}' is full", target))
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::transport(format!("'{}' is not connected", target))
            }
        })
    }

    fn set_handler(&self, handler: DeliveryHandler) -> Result<()> {
        self.shared.router.set_handler(&self.scope, &self.id, handler);
        Ok(())
    }
}

struct TcpPeers {
    shared: Arc<Shared>,
}

impl PeerSet for TcpPeers {
    fn connected(&self) -> Vec<PeerId> {
        self.shared.connected()
    }

    fn on_disconnect(&self, callback: DisconnectCallback) {
        self.shared.disconnect_listeners.lock().push(callback);
    }
}

/// Drive one established connection until EOF, error, idle timeout or
/// cancellation, then detach the link and notify disconnect listeners.
async fn run_connection(
    stream: TcpStream,
    shared: Arc<Shared>,
    remote: Target,
    outbound: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) -> Result<()> {
    let (mut reader, writer) = stream.into_split();
    let sender = remote.peer().cloned();
    let write_timeout = shared.config.write_timeout;
    let mut writer_task = tokio::spawn(write_loop(writer, outbound, write_timeout));

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            written = &mut writer_task => {
                break match written {
                    Ok(result) => result,
                    Err(e) => Err(Error::internal(format!("writer task failed: {}", e))),
                };
            }
            frame = next_frame(&mut reader, &shared.config) => {
                let (msg_type, payload) = match frame {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                };
                if msg_type != MSG_MESSAGE {
                    tracing::warn!("Unexpected message type 0x{:02X} from {}", msg_type, remote);
                    continue;
                }
                match codec::decode::<WireMessage>(&payload) {
                    Ok(message) => {
                        shared.router.deliver(&message.scope, &message.endpoint, sender.clone(), message.args)
                    }
                    Err(e) => tracing::warn!("Dropping undecodable message from {}: {}", remote, e),
                }
            }
        }
    };

    writer_task.abort();
    shared.detach(&remote);
    tracing::debug!("Connection to {} closed", remote);
    result
}

async fn next_frame(
    reader: &mut tokio::net::tcp::OwnedReadHalf,
    config: &TcpConfig,
) -> Result<Option<(u8, Bytes)>> {
    let read = read_frame(reader, config.max_frame_bytes);
    match config.idle_timeout {
        None => Ok(read.await?),
        Some(limit) => match tokio::time::timeout(limit, read).await {
            Ok(frame) => Ok(frame?),
            Err(_) => {
                tracing::debug!("Idle timeout ({:?}), dropping connection", limit);
                Ok(None)
            }
        },
    }
}

async fn write_loop(
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Bytes>,
    timeout: std::time::Duration,
) -> Result<()> {
    while let Some(frame) = outbound.recv().await {
        timed_write(&mut writer, MSG_MESSAGE, &frame, timeout).await?;
    }
    Ok(())
}

/// Write a frame with a timeout. Slow consumers fail the connection.
async fn timed_write<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg_type: u8,
    payload: &[u8],
    timeout: std::time::Duration,
) -> Result<()> {
    tokio::time::timeout(timeout, write_frame(writer, msg_type, payload))
        .await
        .map_err(|_| {
            tracing::warn!("Write timeout ({:?}), dropping connection", timeout);
            Error::transport("write timeout")
        })??;
    Ok(())
}
