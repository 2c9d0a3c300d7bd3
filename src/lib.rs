//! # remoting - typed event and request/response channels between two peers
//!
//! Declares named channels once per global scope and builds them on both ends
//! of a point-to-point transport:
//! - Fire-and-forget **events** with local subscriber fan-out
//! - Request/response **functions** with per-peer pending-call tables,
//!   monotonic ids, timeouts and cancellation
//! - Argument and return-value guards reported on a diagnostics bus
//! - Onion-style interceptor pipelines shared by both channel kinds
//! - Nested namespaces sharing configuration
//!
//! ## Architecture
//!
//! ```text
//!   Declaration ──metadata(side)──▶ NamespaceMetadata ──build──▶ Namespace<Channel>
//!
//!   inbound:   Transport ─▶ Endpoint ─▶ [guard ▶ middleware…] ─▶ subscribers / callback
//!   outbound:  channel.send / invoke ─▶ Endpoint ─▶ Transport
//!
//!                    ┌────────────────────────────────┐
//!   invoke(peer) ──▶ │ FunctionChannel                │
//!                    │  pending[peer]: id ─▶ resolver │ ◀── [id, outcome, value]
//!                    └────────────────────────────────┘
//! ```
//!
//! Transports are pluggable ([`transport::Transport`]); an in-memory hub and a
//! TCP transport ship with the crate.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod diagnostics;
pub mod event;
pub mod function;
pub mod guard;
pub mod middleware;
pub mod namespace;
pub mod network;
pub mod network_info;
pub mod signal;
pub mod transport;
pub mod types;

pub mod observability;

pub use diagnostics::{BadRequest, BadResponse, Diagnostics};
pub use event::{Delivery, EventChannel};
pub use function::{FunctionCallback, FunctionChannel, Outcome, Reply};
pub use guard::{Guard, GuardSet};
pub use middleware::{Args, EventMiddlewareTree, FunctionMiddlewareTree, MiddlewareTree};
pub use namespace::{ChannelDecl, Declaration, EventHandler, FunctionHandler, Namespace};
pub use network::{GlobalEvent, GlobalFunction, NetworkBuilder};
pub use network_info::{ChannelKind, NetworkInfo};
pub use signal::Connection;
pub use transport::{Reliability, Side, Target, Transport};
pub use types::{Error, NetworkConfig, PeerId, Result, TcpConfig};
