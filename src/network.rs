//! Global entry points.
//!
//! A [`GlobalEvent`] or [`GlobalFunction`] pairs a global scope name with its
//! [`Declaration`]. Each side builds its handler tree from the same value:
//!
//! ```ignore
//! let events = GlobalEvent::new("game", declaration)?;
//! let server = events.create_server(server_transport)?;
//! let client = events.create_client(client_transport)?;
//! ```
//!
//! [`NetworkBuilder`] exposes the optional knobs (configuration, middleware,
//! diagnostics bus, endpoint name mapping).

use std::fmt;
use std::sync::Arc;

use crate::diagnostics::{BadRequest, BadResponse, Diagnostics};
use crate::event::EventChannel;
use crate::function::FunctionChannel;
use crate::middleware::{
    EventMiddleware, EventMiddlewareTree, FunctionFuture, FunctionMiddleware, FunctionMiddlewareTree,
    MiddlewareTree,
};
use crate::namespace::{
    build_namespace, BuildContext, ChannelSetup, Declaration, EventHandler, FunctionHandler, NameMapper,
};
use crate::network_info::ChannelKind;
use crate::signal::Connection;
use crate::transport::{Side, Transport};
use crate::types::{Error, NetworkConfig, Result};

/// Event channels of one global scope.
#[derive(Debug, Clone)]
pub struct GlobalEvent {
    scope: Scope,
}

/// Function channels of one global scope.
#[derive(Debug, Clone)]
pub struct GlobalFunction {
    scope: Scope,
}

#[derive(Debug, Clone)]
struct Scope {
    name: String,
    declaration: Arc<Declaration>,
    diagnostics: Diagnostics,
}

impl Scope {
    fn new(name: String, declaration: Declaration) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::validation("global name cannot be empty"));
        }
        declaration.validate()?;
        Ok(Self {
            name,
            declaration: Arc::new(declaration),
            diagnostics: Diagnostics::new(),
        })
    }

    fn builder<O>(&self, kind: ChannelKind, transport: Arc<dyn Transport>, expected: Option<Side>) -> NetworkBuilder<O> {
        NetworkBuilder {
            global_name: self.name.clone(),
            declaration: self.declaration.clone(),
            kind,
            transport,
            expected_side: expected,
            config: None,
            middleware: MiddlewareTree::new(),
            diagnostics: self.diagnostics.clone(),
            name_mapper: None,
        }
    }
}

impl GlobalEvent {
    /// Validates the declaration. Every `GlobalEvent` gets its own
    /// diagnostics bus unless one is shared with [`GlobalEvent::with_diagnostics`].
    pub fn new(name: impl Into<String>, declaration: Declaration) -> Result<Self> {
        Ok(Self {
            scope: Scope::new(name.into(), declaration)?,
        })
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.scope.diagnostics = diagnostics;
        self
    }

    pub fn name(&self) -> &str {
        &self.scope.name
    }

    pub fn declaration(&self) -> &Declaration {
        &self.scope.declaration
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.scope.diagnostics
    }

    /// Subscribe to guard failures on this scope's channels.
    pub fn on_bad_request(&self, callback: impl Fn(&BadRequest) + Send + Sync + 'static) -> Connection {
        self.scope.diagnostics.on_bad_request(callback)
    }

    /// Builder for either side; the side is taken from the transport.
    pub fn builder(&self, transport: Arc<dyn Transport>) -> NetworkBuilder<()> {
        self.scope.builder(ChannelKind::Event, transport, None)
    }

    /// Server handler with default configuration.
    pub fn create_server(&self, transport: Arc<dyn Transport>) -> Result<EventHandler> {
        self.scope
            .builder::<()>(ChannelKind::Event, transport, Some(Side::Server))
            .build()
    }

    /// Client handler with default configuration.
    pub fn create_client(&self, transport: Arc<dyn Transport>) -> Result<EventHandler> {
        self.scope
            .builder::<()>(ChannelKind::Event, transport, Some(Side::Client))
            .build()
    }
}

impl GlobalFunction {
    /// Validates the declaration. Every `GlobalFunction` gets its own
    /// diagnostics bus unless one is shared with
    /// [`GlobalFunction::with_diagnostics`].
    pub fn new(name: impl Into<String>, declaration: Declaration) -> Result<Self> {
        Ok(Self {
            scope: Scope::new(name.into(), declaration)?,
        })
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.scope.diagnostics = diagnostics;
        self
    }

    pub fn name(&self) -> &str {
        &self.scope.name
    }

    pub fn declaration(&self) -> &Declaration {
        &self.scope.declaration
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.scope.diagnostics
    }

    /// Subscribe to requests rejected by argument guards.
    pub fn on_bad_request(&self, callback: impl Fn(&BadRequest) + Send + Sync + 'static) -> Connection {
        self.scope.diagnostics.on_bad_request(callback)
    }

    /// Subscribe to responses rejected by return guards.
    pub fn on_bad_response(&self, callback: impl Fn(&BadResponse) + Send + Sync + 'static) -> Connection {
        self.scope.diagnostics.on_bad_response(callback)
    }

    pub fn builder(&self, transport: Arc<dyn Transport>) -> NetworkBuilder<FunctionFuture> {
        self.scope.builder(ChannelKind::Function, transport, None)
    }

    pub fn create_server(&self, transport: Arc<dyn Transport>) -> Result<FunctionHandler> {
        self.scope
            .builder::<FunctionFuture>(ChannelKind::Function, transport, Some(Side::Server))
            .build()
    }

    pub fn create_client(&self, transport: Arc<dyn Transport>) -> Result<FunctionHandler> {
        self.scope
            .builder::<FunctionFuture>(ChannelKind::Function, transport, Some(Side::Client))
            .build()
    }
}

/// Configures and builds one side's handler tree.
pub struct NetworkBuilder<O> {
    global_name: String,
    declaration: Arc<Declaration>,
    kind: ChannelKind,
    transport: Arc<dyn Transport>,
    expected_side: Option<Side>,
    config: Option<NetworkConfig>,
    middleware: MiddlewareTree<O>,
    diagnostics: Diagnostics,
    name_mapper: Option<NameMapper>,
}

impl<O> NetworkBuilder<O> {
    /// Replace the side's default configuration.
    pub fn with_config(mut self, config: NetworkConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_middleware(mut self, middleware: MiddlewareTree<O>) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Rename every endpoint id before it reaches the transport. Both sides
    /// must use the same mapping.
    pub fn with_name_mapper(mut self, mapper: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.name_mapper = Some(Arc::new(mapper));
        self
    }

    fn context(&self) -> Result<BuildContext> {
        let side = self.transport.side();
        if let Some(expected) = self.expected_side {
            if expected != side {
                return Err(Error::validation(format!(
                    "cannot create a {:?} handler for '{}' on a {:?} transport",
                    expected, self.global_name, side
                )));
            }
        }
        Ok(BuildContext {
            transport: self.transport.clone(),
            global_name: self.global_name.clone(),
            kind: self.kind,
            config: self
                .config
                .clone()
                .unwrap_or_else(|| NetworkConfig::for_side(side)),
            diagnostics: self.diagnostics.clone(),
            name_mapper: self.name_mapper.clone(),
        })
    }
}

impl NetworkBuilder<()> {
    pub fn build(self) -> Result<EventHandler> {
        let ctx = self.context()?;
        let meta = self.declaration.metadata(ctx.transport.side());
        let middleware: &EventMiddlewareTree = &self.middleware;
        build_namespace(&ctx, "", &meta, middleware, &|setup: ChannelSetup, middleware: &[EventMiddleware]| {
            EventChannel::new(setup, middleware)
        })
    }
}

impl NetworkBuilder<FunctionFuture> {
    pub fn build(self) -> Result<FunctionHandler> {
        let ctx = self.context()?;
        let meta = self.declaration.metadata(ctx.transport.side());
        let middleware: &FunctionMiddlewareTree = &self.middleware;
        build_namespace(&ctx, "", &meta, middleware, &|setup: ChannelSetup, middleware: &[FunctionMiddleware]| {
            FunctionChannel::new(setup, middleware)
        })
    }
}

impl<O> fmt::Debug for NetworkBuilder<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkBuilder")
            .field("global_name", &self.global_name)
            .field("kind", &self.kind)
            .field("side", &self.transport.side())
            .field("config", &self.config)
            .field("middleware", &self.middleware)
            .field("name_mapper", &self.name_mapper.is_some())
            .finish()
    }
}
