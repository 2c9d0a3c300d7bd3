//! Function (request/response) channels.
//!
//! A function channel turns a pair of one-way endpoint messages into an
//! awaitable call:
//!
//! ```text
//!   caller                                         callee
//!   ──────                                         ──────
//!   register id in table[target]
//!   send [id, ...args]          ───────────────▶   guard ▶ middleware ▶ callback
//!   race(response, timeout)     ◀───────────────   send [id, outcome, value]
//!   return guard on Success
//! ```
//!
//! Each caller side keeps one pending-call table per target (one per client on
//! the server, a single `Target::Server` table on a client). Dropping an
//! in-flight call removes its entry; a response that arrives afterwards is
//! discarded as an unknown id and never reaches the return guard.

mod callback;
pub mod outcome;
pub mod pending;

pub use callback::FunctionCallback;
pub use outcome::{Outcome, Reply, Response};
pub use pending::PendingCalls;

use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use self::outcome::{decode_request, encode_request};
use self::pending::PendingGuard;
use crate::diagnostics::Diagnostics;
use crate::guard::Guard;
use crate::middleware::{
    compose, guard_middleware, processor, Args, FunctionFuture, FunctionMiddleware, FunctionProcessor,
};
use crate::namespace::{BoundEndpoint, ChannelSetup};
use crate::network_info::NetworkInfo;
use crate::transport::{Endpoint, PeerSet, Side, Target};
use crate::types::{Error, NetworkConfig, PeerId, Result};

type CallbackSlot = Arc<RwLock<Option<Arc<dyn FunctionCallback>>>>;

struct Incoming {
    // Kept alive here; the request handler only holds a weak reference.
    endpoint: Arc<dyn Endpoint>,
    pipeline: FunctionProcessor,
    callback: CallbackSlot,
}

struct Outgoing {
    endpoint: Arc<dyn Endpoint>,
    return_guard: Option<Guard>,
}

struct Inner {
    info: NetworkInfo,
    side: Side,
    config: NetworkConfig,
    diagnostics: Diagnostics,
    incoming: Option<Incoming>,
    outgoing: Option<Outgoing>,
    peers: Arc<dyn PeerSet>,
    pending: Arc<PendingCalls>,
}

/// One request/response channel.
#[derive(Clone)]
pub struct FunctionChannel {
    inner: Arc<Inner>,
}

impl FunctionChannel {
    /// Wire a function channel onto its endpoints.
    ///
    /// Installs the request handler (incoming side) and the response handler
    /// (outgoing side) immediately, and registers for peer-disconnect
    /// notifications. Must be called from within a tokio runtime.
    pub fn new(setup: ChannelSetup, middleware: &[FunctionMiddleware]) -> Result<Self> {
        if setup.incoming.is_none() && setup.outgoing.is_none() {
            return Err(Error::validation(format!("{} has no direction configured", setup.info)));
        }
        let runtime = Handle::try_current()
            .map_err(|_| Error::internal("function channels require a tokio runtime"))?;

        let ChannelSetup {
            info,
            side,
            config,
            diagnostics,
            peers,
            incoming,
            outgoing,
        } = setup;
        let pending = Arc::new(PendingCalls::new());

        let incoming = match incoming {
            Some(bound) => Some(Self::serve_requests(
                bound,
                &info,
                &config,
                &diagnostics,
                middleware,
                runtime,
            )?),
            None => None,
        };

        let outgoing = match outgoing {
            Some(BoundEndpoint { endpoint, decl }) => {
                collect_responses(&endpoint, Arc::downgrade(&pending), info.clone())?;
                Some(Outgoing {
                    endpoint,
                    return_guard: decl.returns,
                })
            }
            None => None,
        };

        let weak_pending = Arc::downgrade(&pending);
        let disconnect_info = info.clone();
        peers.on_disconnect(Arc::new(move |target: &Target| {
            let Some(pending) = weak_pending.upgrade() else {
                return;
            };
            let rejected = pending.disconnect(target);
            if rejected > 0 {
                tracing::debug!(
                    "Rejected {} pending call(s) on {} after {} disconnected",
                    rejected,
                    disconnect_info,
                    target
                );
            }
        }));

        tracing::debug!(
            "Created {} (incoming={}, outgoing={})",
            info,
            incoming.is_some(),
            outgoing.is_some()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                info,
                side,
                config,
                diagnostics,
                incoming,
                outgoing,
                peers,
                pending,
            }),
        })
    }

    fn serve_requests(
        bound: BoundEndpoint,
        info: &NetworkInfo,
        config: &NetworkConfig,
        diagnostics: &Diagnostics,
        middleware: &[FunctionMiddleware],
        runtime: Handle,
    ) -> Result<Incoming> {
        let callback: CallbackSlot = Arc::default();
        let slot = callback.clone();
        let unprocessed_info = info.clone();
        let terminal: FunctionProcessor = processor(move |sender: Option<PeerId>, args: Args| {
            let callback = slot.read().clone();
            let info = unprocessed_info.clone();
            async move {
                match callback {
                    Some(callback) => callback.call(sender, args).await,
                    None => Err(Error::unprocessed(format!("{} has no callback", info))),
                }
            }
            .boxed()
        });

        let mut factories: Vec<FunctionMiddleware> = Vec::with_capacity(middleware.len() + 1);
        if !config.disable_incoming_guards && !bound.decl.args.is_empty() {
            factories.push(guard_middleware(
                info.name.clone(),
                bound.decl.args.clone(),
                config.warn_on_invalid_guards,
                diagnostics.clone(),
                Arc::new(|| -> FunctionFuture { futures::future::ready(Ok(Reply::BadRequest)).boxed() }),
            ));
        }
        factories.extend(middleware.iter().cloned());
        let pipeline = compose(&factories, info, terminal);

        let replies: Weak<dyn Endpoint> = Arc::downgrade(&bound.endpoint);
        let handler_pipeline = pipeline.clone();
        let handler_info = info.clone();
        bound.endpoint.set_handler(Arc::new(move |sender: Option<PeerId>, args: Args| {
            let Some((id, args)) = decode_request(args) else {
                tracing::warn!(
                    "Dropping malformed request for {} from {}",
                    handler_info,
                    sender.as_ref().map(PeerId::as_str).unwrap_or("server")
                );
                return;
            };
            let reply_to = match &sender {
                Some(peer) => Target::Peer(peer.clone()),
                None => Target::Server,
            };
            let pipeline = handler_pipeline.clone();
            let replies = replies.clone();
            let info = handler_info.clone();

            runtime.spawn(async move {
                let result = AssertUnwindSafe(async move { pipeline(sender, args).await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(Error::internal("callback panicked")));
                match &result {
                    Err(Error::Unprocessed(_) | Error::BadRequest(_) | Error::Cancelled(_)) | Ok(_) => {}
                    Err(e) => tracing::warn!("Callback for {} failed: {}", info, e),
                }

                let Some(replies) = replies.upgrade() else {
                    tracing::debug!("{} dropped before request {} completed", info, id);
                    return;
                };
                let response = Response::from_result(id, result);
                if let Err(e) = replies.send(&reply_to, response.into_args()) {
                    tracing::error!("Failed to send response {} for {} to {}: {}", id, info, reply_to, e);
                }
            });
        }))?;

        Ok(Incoming {
            endpoint: bound.endpoint,
            pipeline,
            callback,
        })
    }

    pub fn info(&self) -> &NetworkInfo {
        &self.inner.info
    }

    pub fn is_incoming(&self) -> bool {
        self.inner.incoming.is_some()
    }

    pub fn is_outgoing(&self) -> bool {
        self.inner.outgoing.is_some()
    }

    /// Endpoint ids backing this channel: `(incoming, outgoing)`.
    pub fn endpoint_ids(&self) -> (Option<&str>, Option<&str>) {
        (
            self.inner.incoming.as_ref().map(|i| i.endpoint.id()),
            self.inner.outgoing.as_ref().map(|o| o.endpoint.id()),
        )
    }

    /// Pending-call tables owned by this channel.
    pub fn pending(&self) -> &PendingCalls {
        &self.inner.pending
    }

    /// Install the request handler. Replacing an existing callback logs a
    /// warning.
    pub fn set_callback(&self, callback: impl FunctionCallback) -> Result<()> {
        let incoming = self.incoming()?;
        let previous = incoming.callback.write().replace(Arc::new(callback));
        if previous.is_some() {
            tracing::warn!("Callback for {} was already set; replacing it", self.inner.info);
        }
        Ok(())
    }

    pub fn has_callback(&self) -> bool {
        self.inner
            .incoming
            .as_ref()
            .is_some_and(|incoming| incoming.callback.read().is_some())
    }

    /// Call the remote side with the configured default timeout.
    pub async fn invoke(&self, target: impl Into<Target>, args: Args) -> Result<Value> {
        self.invoke_with_timeout(target, self.inner.config.default_timeout, args)
            .await
    }

    /// Call the remote side; fails with `Timeout` if no response arrives
    /// within `timeout`.
    pub async fn invoke_with_timeout(
        &self,
        target: impl Into<Target>,
        timeout: Duration,
        args: Args,
    ) -> Result<Value> {
        let target = target.into();
        let outgoing = self.outgoing()?;
        self.check_target(&target)?;

        if !self.is_reachable(&target) {
            return Err(Error::transport(format!("'{}' is not connected", target)));
        }

        let pending = &*self.inner.pending;
        let (id, settled) = pending.register(&target);
        let mut entry = PendingGuard::new(pending, target.clone(), id);
        if let Err(e) = outgoing.endpoint.send(&target, encode_request(id, args)) {
            drop(entry);
            // Lost the race with a disconnect: its teardown already ran.
            if !self.is_reachable(&target) {
                pending.disconnect(&target);
            }
            return Err(e);
        }
        tracing::debug!("Invoked {} on {} (id={})", self.inner.info, target, id);

        let settlement = match tokio::time::timeout(timeout, settled).await {
            Ok(Ok(settlement)) => settlement,
            Ok(Err(_)) => Err(Error::disconnected(format!(
                "call {} to {} was dropped",
                id, target
            ))),
            Err(_) => {
                return Err(Error::timeout(format!(
                    "{} on {} timed out after {:?}",
                    self.inner.info, target, timeout
                )))
            }
        };
        entry.disarm();
        self.settle(&target, settlement?)
    }

    /// Like [`FunctionChannel::invoke`], but resolves to `Cancelled` as soon
    /// as `cancel` fires. The remote side is not notified.
    pub async fn invoke_cancellable(
        &self,
        target: impl Into<Target>,
        args: Args,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let call = self.invoke(target, args);
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::cancelled(format!("{} cancelled by caller", self.inner.info))),
            result = call => result,
        }
    }

    /// Run the local incoming pipeline as if `sender` had called, without
    /// touching the transport.
    pub async fn predict(&self, sender: Option<PeerId>, args: Args) -> Result<Value> {
        let incoming = self.incoming()?;
        let result = (incoming.pipeline)(sender, args).await;
        Response::from_result(0, result).into_value(&self.inner.info)
    }

    fn settle(&self, target: &Target, response: Response) -> Result<Value> {
        let info = &self.inner.info;
        let return_guard = self
            .inner
            .outgoing
            .as_ref()
            .and_then(|outgoing| outgoing.return_guard.as_ref());

        if response.outcome == Outcome::Success && !self.inner.config.disable_incoming_guards {
            if let Some(guard) = return_guard {
                if !guard.check(&response.value) {
                    if self.inner.config.warn_on_invalid_guards {
                        tracing::warn!(
                            "{} returned an invalid result for function '{}' (expected {}): {}",
                            match target {
                                Target::Server => "Server".to_string(),
                                Target::Peer(peer) => format!("'{}'", peer),
                            },
                            info.name,
                            guard.name(),
                            response.value
                        );
                    }
                    self.inner
                        .diagnostics
                        .publish_bad_response(target.peer().cloned(), info, response.value);
                    return Err(Error::invalid_result(format!(
                        "{} returned a value failing '{}'",
                        info,
                        guard.name()
                    )));
                }
            }
        }
        response.into_value(info)
    }

    fn incoming(&self) -> Result<&Incoming> {
        self.inner.incoming.as_ref().ok_or_else(|| {
            Error::validation(format!("{} is not an incoming function on this side", self.inner.info))
        })
    }

    fn outgoing(&self) -> Result<&Outgoing> {
        self.inner.outgoing.as_ref().ok_or_else(|| {
            Error::validation(format!("{} is not an outgoing function on this side", self.inner.info))
        })
    }

    /// Only peers are checked; a client's single server table is bounded.
    fn is_reachable(&self, target: &Target) -> bool {
        match target {
            Target::Server => true,
            Target::Peer(peer) => self.inner.peers.connected().contains(peer),
        }
    }

    fn check_target(&self, target: &Target) -> Result<()> {
        match (self.inner.side, target) {
            (Side::Client, Target::Peer(peer)) => Err(Error::validation(format!(
                "a client can only invoke the server, not '{}'",
                peer
            ))),
            (Side::Server, Target::Server) => {
                Err(Error::validation("the server must invoke a specific peer"))
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for FunctionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionChannel")
            .field("info", &self.inner.info)
            .field("side", &self.inner.side)
            .field("incoming", &self.is_incoming())
            .field("outgoing", &self.is_outgoing())
            .field("pending", &self.inner.pending)
            .finish()
    }
}

/// Route responses arriving on `endpoint` to their pending calls.
fn collect_responses(endpoint: &Arc<dyn Endpoint>, pending: Weak<PendingCalls>, info: NetworkInfo) -> Result<()> {
    endpoint.set_handler(Arc::new(move |sender: Option<PeerId>, args: Args| {
        let Some(pending) = pending.upgrade() else {
            return;
        };
        let from = match sender {
            Some(peer) => Target::Peer(peer),
            None => Target::Server,
        };
        match Response::from_args(args) {
            Ok(response) => {
                let id = response.id;
                if !pending.resolve(&from, response) {
                    tracing::debug!("Discarding response {} for {} from {}: no pending call", id, info, from);
                }
            }
            Err(e) => tracing::warn!("Dropping malformed response for {} from {}: {}", info, from, e),
        }
    }))
}
