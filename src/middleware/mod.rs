//! Interceptor pipeline.
//!
//! A channel's inbound path is a chain of interceptors wrapping a terminal
//! handler. Each interceptor is produced by a [`MiddlewareFactory`] that
//! receives the next stage and the channel's [`NetworkInfo`], and returns a
//! [`Processor`] with the same signature as the terminal. An interceptor may
//! call `next` any number of times, rewrite the arguments, replace the result,
//! or short-circuit without calling `next` at all.
//!
//! The chain is resolved once when the channel is built:
//! ```text
//!   stage[i] = factory[i](stage[i + 1] or terminal, info)
//!   call ──▶ f0 ──▶ f1 ──▶ ... ──▶ terminal
//!   result ◀── f0 ◀── f1 ◀── ... ◀──┘
//! ```
//!
//! Events use `Processor<()>`; functions use a processor returning a boxed
//! future, so asynchronous stages are awaited in declaration order.

pub mod guard;

pub use guard::guard_middleware;

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::function::Reply;
use crate::network_info::NetworkInfo;
use crate::types::{PeerId, Result};

/// One message's argument tuple.
pub type Args = Vec<Value>;

/// A pipeline stage: `(sender, args) -> O`.
pub type Processor<O> = Arc<dyn Fn(Option<PeerId>, Args) -> O + Send + Sync>;

/// Builds a stage around the next one.
pub type MiddlewareFactory<O> = Arc<dyn Fn(Processor<O>, &NetworkInfo) -> Processor<O> + Send + Sync>;

pub type EventProcessor = Processor<()>;
pub type EventMiddleware = MiddlewareFactory<()>;

/// Result of a function pipeline run.
pub type FunctionFuture = BoxFuture<'static, Result<Reply>>;
pub type FunctionProcessor = Processor<FunctionFuture>;
pub type FunctionMiddleware = MiddlewareFactory<FunctionFuture>;

/// Resolve `factories` around `terminal`. An empty list yields `terminal`.
pub fn compose<O>(
    factories: &[MiddlewareFactory<O>],
    info: &NetworkInfo,
    terminal: Processor<O>,
) -> Processor<O> {
    factories
        .iter()
        .rev()
        .fold(terminal, |next, factory| factory(next, info))
}

/// Wrap a closure as a middleware factory.
pub fn middleware<O>(
    factory: impl Fn(Processor<O>, &NetworkInfo) -> Processor<O> + Send + Sync + 'static,
) -> MiddlewareFactory<O> {
    Arc::new(factory)
}

/// Wrap a closure as a processor.
pub fn processor<O>(stage: impl Fn(Option<PeerId>, Args) -> O + Send + Sync + 'static) -> Processor<O> {
    Arc::new(stage)
}

/// Pass-through interceptor that logs every inbound message at debug level.
pub fn traced<O: 'static>() -> MiddlewareFactory<O> {
    middleware(|next: Processor<O>, info: &NetworkInfo| {
        let label = info.to_string();
        processor(move |peer: Option<PeerId>, args: Args| {
            tracing::debug!(
                channel = %label,
                peer = peer.as_ref().map(PeerId::as_str).unwrap_or("server"),
                args = args.len(),
                "inbound message"
            );
            next(peer, args)
        })
    })
}

/// Middleware lists keyed by channel name, with nested trees per namespace.
pub struct MiddlewareTree<O> {
    channels: HashMap<String, Vec<MiddlewareFactory<O>>>,
    namespaces: HashMap<String, MiddlewareTree<O>>,
}

impl<O> MiddlewareTree<O> {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            namespaces: HashMap::new(),
        }
    }

    /// Append an interceptor to `channel`'s list.
    pub fn with(mut self, channel: impl Into<String>, factory: MiddlewareFactory<O>) -> Self {
        self.channels.entry(channel.into()).or_default().push(factory);
        self
    }

    /// Attach the tree for a child namespace.
    pub fn namespace(mut self, name: impl Into<String>, tree: MiddlewareTree<O>) -> Self {
        self.namespaces.insert(name.into(), tree);
        self
    }

    pub fn for_channel(&self, channel: &str) -> &[MiddlewareFactory<O>] {
        self.channels.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The child namespace's tree, or an empty one.
    pub fn child(&self, name: &str) -> MiddlewareTree<O> {
        self.namespaces.get(name).cloned().unwrap_or_default()
    }
}

impl<O> Default for MiddlewareTree<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> Clone for MiddlewareTree<O> {
    fn clone(&self) -> Self {
        Self {
            channels: self.channels.clone(),
            namespaces: self.namespaces.clone(),
        }
    }
}

impl<O> fmt::Debug for MiddlewareTree<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channels: HashMap<&str, usize> = self
            .channels
            .iter()
            .map(|(name, list)| (name.as_str(), list.len()))
            .collect();
        f.debug_struct("MiddlewareTree")
            .field("channels", &channels)
            .field("namespaces", &self.namespaces)
            .finish()
    }
}

pub type EventMiddlewareTree = MiddlewareTree<()>;
pub type FunctionMiddlewareTree = MiddlewareTree<FunctionFuture>;
