//! Recursive handler construction.
//!
//! Walks a [`NamespaceMetadata`] tree and builds one channel per name:
//! ```text
//!   for name in node.incoming ∪ node.outgoing:
//!       (rel_in, rel_out) = effective reliability
//!       incoming endpoint = endpoint_id(name, rel_in)   (if received here)
//!       outgoing endpoint = endpoint_id(name, rel_out)  (if sent from here)
//!       equal ids  ⇒ one endpoint shared by both directions
//!   for child in node.namespaces:
//!       recurse with path/child, same config, middleware.child(child)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use super::declaration::{join, ChannelDecl, NamespaceMetadata};
use super::Namespace;
use crate::diagnostics::Diagnostics;
use crate::middleware::{MiddlewareFactory, MiddlewareTree};
use crate::network_info::{ChannelKind, NetworkInfo};
use crate::transport::{Endpoint, PeerSet, Reliability, Side, Transport};
use crate::types::{NetworkConfig, Result};

/// Pure rename applied to every endpoint id at creation time.
pub type NameMapper = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// An endpoint together with the declaration of the direction it carries.
#[derive(Debug, Clone)]
pub struct BoundEndpoint {
    pub endpoint: Arc<dyn Endpoint>,
    pub decl: ChannelDecl,
}

/// Everything a channel needs at construction.
pub struct ChannelSetup {
    pub info: NetworkInfo,
    pub side: Side,
    pub config: NetworkConfig,
    pub diagnostics: Diagnostics,
    pub peers: Arc<dyn PeerSet>,
    /// Direction this side receives.
    pub incoming: Option<BoundEndpoint>,
    /// Direction this side sends.
    pub outgoing: Option<BoundEndpoint>,
}

impl std::fmt::Debug for ChannelSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSetup")
            .field("info", &self.info)
            .field("side", &self.side)
            .field("config", &self.config)
            .field("incoming", &self.incoming)
            .field("outgoing", &self.outgoing)
            .finish()
    }
}

/// Which way a message travels relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Server,
    Client,
}

/// Wire id of one endpoint.
///
/// `path` for reliable endpoints, `unreliable:path` otherwise. Functions
/// declared in both directions get an `s:` (server-bound) or `c:`
/// (client-bound) prefix so requests and responses of the two directions
/// never share an endpoint.
pub fn endpoint_id(path: &str, reliability: Reliability, bound: Option<Bound>) -> String {
    let reliability = match reliability {
        Reliability::Reliable => "",
        Reliability::Unreliable => "unreliable:",
    };
    let direction = match bound {
        None => "",
        Some(Bound::Server) => "s:",
        Some(Bound::Client) => "c:",
    };
    format!("{}{}{}", reliability, direction, path)
}

/// Shared inputs of one build.
pub(crate) struct BuildContext {
    pub transport: Arc<dyn Transport>,
    pub global_name: String,
    pub kind: ChannelKind,
    pub config: NetworkConfig,
    pub diagnostics: Diagnostics,
    pub name_mapper: Option<NameMapper>,
}

impl BuildContext {
    fn side(&self) -> Side {
        self.transport.side()
    }

    fn endpoint(&self, id: String, reliability: Reliability) -> Result<Arc<dyn Endpoint>> {
        let id = match &self.name_mapper {
            Some(mapper) => mapper(&id),
            None => id,
        };
        self.transport.endpoint(&self.global_name, &id, reliability)
    }

    /// Direction prefixes for `(incoming, outgoing)` of a bidirectional function.
    fn function_bounds(&self) -> (Bound, Bound) {
        match self.side() {
            Side::Server => (Bound::Server, Bound::Client),
            Side::Client => (Bound::Client, Bound::Server),
        }
    }
}

/// Build the handler tree rooted at `path`.
pub(crate) fn build_namespace<C, O>(
    ctx: &BuildContext,
    path: &str,
    meta: &NamespaceMetadata,
    middleware: &MiddlewareTree<O>,
    make: &dyn Fn(ChannelSetup, &[MiddlewareFactory<O>]) -> Result<C>,
) -> Result<Namespace<C>> {
    let mut channels = BTreeMap::new();
    for name in meta.names() {
        let setup = channel_setup(ctx, path, meta, name)?;
        let channel = make(setup, middleware.for_channel(name))?;
        channels.insert(name.to_string(), channel);
    }

    let mut namespaces = BTreeMap::new();
    for (name, child) in &meta.namespaces {
        let child_path = join(path, name);
        let handler = build_namespace(ctx, &child_path, child, &middleware.child(name), make)?;
        namespaces.insert(name.clone(), handler);
    }

    tracing::debug!(
        "Built {} namespace '{}/{}' ({} channels, {} namespaces)",
        match ctx.kind {
            ChannelKind::Event => "event",
            ChannelKind::Function => "function",
        },
        ctx.global_name,
        path,
        channels.len(),
        namespaces.len()
    );
    Ok(Namespace::from_parts(path.to_string(), channels, namespaces))
}

fn channel_setup(ctx: &BuildContext, path: &str, meta: &NamespaceMetadata, name: &str) -> Result<ChannelSetup> {
    let channel_path = join(path, name);
    let (incoming_rel, outgoing_rel) = meta
        .reliability(name)
        .unwrap_or((Reliability::Reliable, Reliability::Reliable));

    let (incoming_bound, outgoing_bound) =
        if ctx.kind == ChannelKind::Function && meta.is_bidirectional(name) {
            let (i, o) = ctx.function_bounds();
            (Some(i), Some(o))
        } else {
            (None, None)
        };

    let incoming_id = meta
        .incoming
        .get(name)
        .map(|_| endpoint_id(&channel_path, incoming_rel, incoming_bound));
    let outgoing_id = meta
        .outgoing
        .get(name)
        .map(|_| endpoint_id(&channel_path, outgoing_rel, outgoing_bound));

    let incoming_endpoint = match &incoming_id {
        Some(id) => Some(ctx.endpoint(id.clone(), incoming_rel)?),
        None => None,
    };
    let outgoing_endpoint = match (&outgoing_id, &incoming_id, &incoming_endpoint) {
        (Some(out), Some(inc), Some(shared)) if out == inc => Some(shared.clone()),
        (Some(out), _, _) => Some(ctx.endpoint(out.clone(), outgoing_rel)?),
        (None, _, _) => None,
    };

    let bind = |endpoint: Option<Arc<dyn Endpoint>>, decl: Option<&ChannelDecl>| {
        endpoint.zip(decl).map(|(endpoint, decl)| BoundEndpoint {
            endpoint,
            decl: decl.clone(),
        })
    };

    Ok(ChannelSetup {
        info: NetworkInfo::new(ctx.global_name.clone(), channel_path, ctx.kind),
        side: ctx.side(),
        config: ctx.config.clone(),
        diagnostics: ctx.diagnostics.clone(),
        peers: ctx.transport.peers(),
        incoming: bind(incoming_endpoint, meta.incoming.get(name)),
        outgoing: bind(outgoing_endpoint, meta.outgoing.get(name)),
    })
}
