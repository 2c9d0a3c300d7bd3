//! TCP client transport.

use std::sync::Arc;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;

use super::codec::{self, read_frame, write_frame, Hello, Reject, MSG_HELLO, MSG_REJECT, MSG_WELCOME};
use super::{run_connection, Shared};
use crate::transport::{Endpoint, PeerSet, Reliability, Side, Target, Transport};
use crate::types::{Error, PeerId, Result, TcpConfig};

/// Client side of the TCP transport: one connection to the server.
pub struct TcpClient {
    shared: Arc<Shared>,
    peer: PeerId,
    cancel: CancellationToken,
}

impl TcpClient {
    /// Connect and complete the handshake. Fails if the server refuses the
    /// identity (e.g. another connection already uses it).
    pub async fn connect(addr: impl ToSocketAddrs, peer: PeerId, config: TcpConfig) -> Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        let hello = codec::encode(&Hello { peer: peer.clone() })?;
        write_frame(&mut stream, MSG_HELLO, &hello).await?;

        match read_frame(&mut stream, config.max_frame_bytes).await? {
            Some((MSG_WELCOME, _)) => {}
            Some((MSG_REJECT, payload)) => {
                let reject: Reject = codec::decode(&payload)?;
                return Err(Error::transport(format!("server refused connection: {}", reject.reason)));
            }
            Some((other, _)) => {
                return Err(Error::transport(format!(
                    "unexpected message type 0x{:02X} during handshake",
                    other
                )));
            }
            None => return Err(Error::transport("server closed the connection during handshake")),
        }

        let shared = Shared::new(Side::Client, config);
        let outbound = shared.attach(Target::Server)?;
        let cancel = CancellationToken::new();

        let task_shared = shared.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = run_connection(stream, task_shared, Target::Server, outbound, task_cancel).await {
                tracing::warn!("Connection to server error: {}", e);
            }
        });
        tracing::debug!("Connected to server as '{}'", peer);

        Ok(Self { shared, peer, cancel })
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer
    }

    /// Close the connection. Disconnect listeners fire with `Target::Server`.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.links.lock().contains_key(&Target::Server)
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClient")
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Transport for TcpClient {
    fn side(&self) -> Side {
        Side::Client
    }

    fn endpoint(&self, scope: &str, id: &str, reliability: Reliability) -> Result<Arc<dyn Endpoint>> {
        self.shared.endpoint(scope, id, reliability)
    }

    fn peers(&self) -> Arc<dyn PeerSet> {
        self.shared.peers()
    }
}
