//! TCP server transport: accept loop and per-connection handshake.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::codec::{self, read_frame, write_frame, Hello, Reject, MSG_HELLO, MSG_REJECT, MSG_WELCOME};
use super::{run_connection, Shared};
use crate::transport::{Endpoint, PeerSet, Reliability, Side, Target, Transport};
use crate::types::{Error, Result, TcpConfig};

/// How long a fresh connection may take to send its `HELLO`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Server side of the TCP transport.
///
/// The listener is bound by [`TcpServer::bind`]; endpoints may be created
/// before [`TcpServer::serve`] starts accepting clients.
pub struct TcpServer {
    shared: Arc<Shared>,
    listener: Mutex<Option<TcpListener>>,
    addr: SocketAddr,
    cancel: CancellationToken,
}

impl TcpServer {
    pub async fn bind(addr: impl ToSocketAddrs, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        Ok(Self {
            shared: Shared::new(Side::Server, config),
            listener: Mutex::new(Some(listener)),
            addr,
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Run the accept loop until [`TcpServer::shutdown`] is called.
    pub async fn serve(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| Error::validation("server is already serving"))?;
        let max_connections = self.shared.config.max_connections;
        let conn_semaphore = Arc::new(Semaphore::new(max_connections));
        tracing::info!(
            "TCP server listening on {} (max_connections={})",
            self.addr,
            max_connections,
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("TCP server shutting down");
                    break;
                }
                accept = listener.accept() => {
                    let (stream, remote_addr) = accept?;

                    let permit = match conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(
                                "Connection from {} rejected: at max_connections ({})",
                                remote_addr,
                                max_connections,
                            );
                            drop(stream);
                            continue;
                        }
                    };

                    tracing::debug!(
                        "TCP connection from {} (active={})",
                        remote_addr,
                        max_connections - conn_semaphore.available_permits(),
                    );
                    let shared = self.shared.clone();
                    let cancel = self.cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, shared, cancel, permit).await {
                            tracing::warn!("Connection from {} error: {}", remote_addr, e);
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Request graceful shutdown. Open connections are closed and their
    /// peers reported as disconnected.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("addr", &self.addr)
            .field("peers", &self.shared.connected().len())
            .finish()
    }
}

impl Transport for TcpServer {
    fn side(&self) -> Side {
        Side::Server
    }

    fn endpoint(&self, scope: &str, id: &str, reliability: Reliability) -> Result<Arc<dyn Endpoint>> {
        self.shared.endpoint(scope, id, reliability)
    }

    fn peers(&self) -> Arc<dyn PeerSet> {
        self.shared.peers()
    }
}

/// Handshake, then hand the connection to the shared frame loop.
async fn handle_connection(
    mut stream: TcpStream,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    _permit: OwnedSemaphorePermit, // held for connection lifetime
) -> Result<()> {
    let first = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        read_frame(&mut stream, shared.config.max_frame_bytes),
    )
    .await
    .map_err(|_| Error::timeout("no HELLO received"))??;

    let hello = match first {
        Some((MSG_HELLO, payload)) => codec::decode::<Hello>(&payload)?,
        Some((other, _)) => {
            let reason = format!("expected HELLO, got message type 0x{:02X}", other);
            reject(&mut stream, &reason).await?;
            return Err(Error::validation(reason));
        }
        None => return Ok(()),
    };

    let remote = Target::Peer(hello.peer.clone());
    let outbound = match shared.attach(remote.clone()) {
        Ok(outbound) => outbound,
        Err(e) => {
            reject(&mut stream, &e.to_string()).await?;
            return Err(e);
        }
    };

    if let Err(e) = write_frame(&mut stream, MSG_WELCOME, &[]).await {
        shared.detach(&remote);
        return Err(e.into());
    }
    tracing::debug!("Peer '{}' connected", hello.peer);

    run_connection(stream, shared, remote, outbound, cancel).await
}

async fn reject(stream: &mut TcpStream, reason: &str) -> Result<()> {
    let payload = codec::encode(&Reject {
        reason: reason.to_string(),
    })?;
    write_frame(stream, MSG_REJECT, &payload).await?;
    Ok(())
}
