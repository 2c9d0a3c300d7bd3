//! Event (fire-and-forget) channels.
//!
//! Outbound sends go straight to the transport endpoint. Inbound messages run
//! through the incoming pipeline (guard first, then user middleware) and end
//! in a local [`Signal`] that fans out to subscribers. The wire handler is only
//! installed by the first `subscribe`; until then the transport buffers, so
//! listeners attached after construction still see the earliest messages.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::diagnostics::Diagnostics;
use crate::middleware::{compose, guard_middleware, processor, Args, EventMiddleware, EventProcessor};
use crate::namespace::{BoundEndpoint, ChannelSetup};
use crate::network_info::NetworkInfo;
use crate::signal::{Connection, Signal};
use crate::transport::{Endpoint, PeerSet, Side, Target};
use crate::types::{Error, PeerId, Result};

/// One inbound event after it passed the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// `Some(client)` on the server, `None` (the server) on a client.
    pub sender: Option<PeerId>,
    pub args: Args,
}

struct Incoming {
    endpoint: Arc<dyn Endpoint>,
    pipeline: EventProcessor,
    armed: AtomicBool,
}

struct Inner {
    info: NetworkInfo,
    side: Side,
    peers: Arc<dyn PeerSet>,
    incoming: Option<Incoming>,
    outgoing: Option<Arc<dyn Endpoint>>,
    dispatch: Signal<Delivery>,
}

/// One event channel.
#[derive(Clone)]
pub struct EventChannel {
    inner: Arc<Inner>,
}

impl EventChannel {
    pub fn new(setup: ChannelSetup, middleware: &[EventMiddleware]) -> Result<Self> {
        if setup.incoming.is_none() && setup.outgoing.is_none() {
            return Err(Error::validation(format!("{} has no direction configured", setup.info)));
        }
        let ChannelSetup {
            info,
            side,
            config,
            diagnostics,
            peers,
            incoming,
            outgoing,
        } = setup;

        let dispatch: Signal<Delivery> = Signal::new();
        let incoming = incoming.map(|bound| {
            let pipeline = build_pipeline(
                &bound,
                &info,
                !config.disable_incoming_guards,
                config.warn_on_invalid_guards,
                &diagnostics,
                middleware,
                dispatch.clone(),
            );
            Incoming {
                endpoint: bound.endpoint,
                pipeline,
                armed: AtomicBool::new(false),
            }
        });

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
                peers,
                incoming,
                outgoing: outgoing.map(|bound| bound.endpoint),
                dispatch,
            }),
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

    /// Endpoint ids backing this channel: `(incoming, outgoing)`. Equal ids
    /// mean one physical endpoint serves both directions.
    pub fn endpoint_ids(&self) -> (Option<&str>, Option<&str>) {
        (
            self.inner.incoming.as_ref().map(|i| i.endpoint.id()),
            self.inner.outgoing.as_ref().map(|o| o.id()),
        )
    }

    /// Send to one target. From a client the target must be `Target::Server`.
    pub fn send(&self, target: impl Into<Target>, args: Args) -> Result<()> {
        let target = target.into();
        let endpoint = self.outgoing()?;
        self.check_target(&target)?;
        endpoint.send(&target, args)
    }

    /// Send to the server (client only).
    pub fn fire(&self, args: Args) -> Result<()> {
        self.send(Target::Server, args)
    }

    /// Send to each listed peer (server only). Peers that cannot be reached
    /// are skipped; returns how many sends succeeded.
    pub fn send_many(&self, peers: impl IntoIterator<Item = PeerId>, args: Args) -> Result<usize> {
        let endpoint = self.outgoing()?;
        self.require_server("send_many")?;
        Ok(self.fan_out(endpoint, peers, &args))
    }

    /// Send to every currently connected peer (server only).
    pub fn broadcast(&self, args: Args) -> Result<usize> {
        let endpoint = self.outgoing()?;
        self.require_server("broadcast")?;
        Ok(self.fan_out(endpoint, self.inner.peers.connected(), &args))
    }

    /// Send to every currently connected peer not in `excluded` (server only).
    pub fn except(&self, excluded: &[PeerId], args: Args) -> Result<usize> {
        let endpoint = self.outgoing()?;
        self.require_server("except")?;
        let recipients = self
            .inner
            .peers
            .connected()
            .into_iter()
            .filter(|peer| !excluded.contains(peer));
        Ok(self.fan_out(endpoint, recipients, &args))
    }

    /// Listen for inbound events. The first subscription arms the wire
    /// handler.
    pub fn subscribe(
        &self,
        callback: impl Fn(Option<&PeerId>, &[Value]) + Send + Sync + 'static,
    ) -> Result<Connection> {
        let incoming = self.incoming()?;
        let connection = self
            .inner
            .dispatch
            .connect(move |delivery: &Delivery| callback(delivery.sender.as_ref(), &delivery.args));
        if let Err(e) = self.arm(incoming) {
            connection.disconnect();
            return Err(e);
        }
        Ok(connection)
    }

    /// Channel-style subscription: every delivery is pushed into the returned
    /// receiver until the connection is disconnected.
    pub fn subscribe_stream(&self) -> Result<(Connection, mpsc::UnboundedReceiver<Delivery>)> {
        let incoming = self.incoming()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = self.inner.dispatch.connect(move |delivery: &Delivery| {
            let _ = tx.send(delivery.clone());
        });
        if let Err(e) = self.arm(incoming) {
            connection.disconnect();
            return Err(e);
        }
        Ok((connection, rx))
    }

    /// Run the incoming pipeline locally as if `sender` had sent `args`.
    pub fn predict(&self, sender: Option<PeerId>, args: Args) -> Result<()> {
        let incoming = self.incoming()?;
        (incoming.pipeline)(sender, args);
        Ok(())
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.dispatch.listener_count()
    }

    fn arm(&self, incoming: &Incoming) -> Result<()> {
        if incoming
            .armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let pipeline = incoming.pipeline.clone();
        let installed = incoming
            .endpoint
            .set_handler(Arc::new(move |sender: Option<PeerId>, args: Args| pipeline(sender, args)));
        if let Err(e) = installed {
            incoming.armed.store(false, Ordering::Release);
            return Err(e);
        }
        tracing::debug!("Armed wire listener for {}", self.inner.info);
        Ok(())
    }

    fn fan_out(&self, endpoint: &Arc<dyn Endpoint>, peers: impl IntoIterator<Item = PeerId>, args: &Args) -> usize {
        let mut sent = 0;
        for peer in peers {
            match endpoint.send(&Target::Peer(peer), args.clone()) {
                Ok(()) => sent += 1,
                Err(e) => tracing::debug!("Skipping recipient of {}: {}", self.inner.info, e),
            }
        }
        sent
    }

    fn incoming(&self) -> Result<&Incoming> {
        self.inner.incoming.as_ref().ok_or_else(|| {
            Error::validation(format!("{} is not an incoming event on this side", self.inner.info))
        })
    }

    fn outgoing(&self) -> Result<&Arc<dyn Endpoint>> {
        self.inner.outgoing.as_ref().ok_or_else(|| {
            Error::validation(format!("{} is not an outgoing event on this side", self.inner.info))
        })
    }

    fn require_server(&self, operation: &str) -> Result<()> {
        match self.inner.side {
            Side::Server => Ok(()),
            Side::Client => Err(Error::validation(format!(
                "{} on {} is only available on the server",
                operation, self.inner.info
            ))),
        }
    }

    fn check_target(&self, target: &Target) -> Result<()> {
        match (self.inner.side, target) {
            (Side::Client, Target::Peer(peer)) => Err(Error::validation(format!(
                "a client can only send to the server, not '{}'",
                peer
            ))),
            (Side::Server, Target::Server) => Err(Error::validation("the server must send to a specific peer")),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("info", &self.inner.info)
            .field("side", &self.inner.side)
            .field("incoming", &self.is_incoming())
            .field("outgoing", &self.is_outgoing())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn build_pipeline(
    bound: &BoundEndpoint,
    info: &NetworkInfo,
    guards_enabled: bool,
    warn_on_invalid: bool,
    diagnostics: &Diagnostics,
    middleware: &[EventMiddleware],
    dispatch: Signal<Delivery>,
) -> EventProcessor {
    let terminal: EventProcessor = processor(move |sender: Option<PeerId>, args: Args| {
        dispatch.fire(&Delivery { sender, args });
    });

    let mut factories: Vec<EventMiddleware> = Vec::with_capacity(middleware.len() + 1);
    if guards_enabled && !bound.decl.args.is_empty() {
        factories.push(guard_middleware(
            info.name.clone(),
            bound.decl.args.clone(),
            warn_on_invalid,
            diagnostics.clone(),
            Arc::new(|| ()),
        ));
    }
    factories.extend(middleware.iter().cloned());
    compose(&factories, info, terminal)
}
