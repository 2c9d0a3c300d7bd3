//! Diagnostics bus for malformed traffic.
//!
//! Guard failures never raise; they are reported here instead. The bus has
//! its own lifetime: it can be created and subscribed to before any channel
//! exists, and a channel never depends on a subscriber being present.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::network_info::NetworkInfo;
use crate::signal::{Connection, Signal};
use crate::types::PeerId;

/// An inbound argument failed its guard.
#[derive(Debug, Clone, Serialize)]
pub struct BadRequest {
    /// Sender of the request; `None` when the server sent it.
    pub peer: Option<PeerId>,
    pub network_info: NetworkInfo,
    pub arg_index: usize,
    pub arg_value: Value,
    pub timestamp: DateTime<Utc>,
}

/// A function response failed the local return guard.
#[derive(Debug, Clone, Serialize)]
pub struct BadResponse {
    /// Peer that produced the response; `None` when the server did.
    pub peer: Option<PeerId>,
    pub network_info: NetworkInfo,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

/// Counters for published diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiagnosticsStats {
    pub bad_requests: u64,
    pub bad_responses: u64,
}

#[derive(Debug, Default)]
struct Counters {
    bad_requests: AtomicU64,
    bad_responses: AtomicU64,
}

/// Typed publish/subscribe registry for `on_bad_request` / `on_bad_response`.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    bad_request: Signal<BadRequest>,
    bad_response: Signal<BadResponse>,
    counters: Arc<Counters>,
}

static GLOBAL: OnceLock<Diagnostics> = OnceLock::new();

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide bus.
    ///
    /// Scopes start with a private bus and never publish here on their own;
    /// hand this one to [`GlobalEvent::with_diagnostics`] or
    /// [`GlobalFunction::with_diagnostics`] to route their reports through it.
    ///
    /// [`GlobalEvent::with_diagnostics`]: crate::GlobalEvent::with_diagnostics
    /// [`GlobalFunction::with_diagnostics`]: crate::GlobalFunction::with_diagnostics
    pub fn global() -> &'static Diagnostics {
        GLOBAL.get_or_init(Diagnostics::new)
    }

    pub fn on_bad_request(&self, callback: impl Fn(&BadRequest) + Send + Sync + 'static) -> Connection {
        self.bad_request.connect(callback)
    }

    pub fn on_bad_response(&self, callback: impl Fn(&BadResponse) + Send + Sync + 'static) -> Connection {
        self.bad_response.connect(callback)
    }

    pub fn publish_bad_request(
        &self,
        peer: Option<PeerId>,
        network_info: &NetworkInfo,
        arg_index: usize,
        arg_value: Value,
    ) {
        self.counters.bad_requests.fetch_add(1, Ordering::Relaxed);
        self.bad_request.fire(&BadRequest {
            peer,
            network_info: network_info.clone(),
            arg_index,
            arg_value,
            timestamp: Utc::now(),
        });
    }

    pub fn publish_bad_response(&self, peer: Option<PeerId>, network_info: &NetworkInfo, value: Value) {
        self.counters.bad_responses.fetch_add(1, Ordering::Relaxed);
        self.bad_response.fire(&BadResponse {
            peer,
            network_info: network_info.clone(),
            value,
            timestamp: Utc::now(),
        });
    }

    pub fn stats(&self) -> DiagnosticsStats {
        DiagnosticsStats {
            bad_requests: self.counters.bad_requests.load(Ordering::Relaxed),
            bad_responses: self.counters.bad_responses.load(Ordering::Relaxed),
        }
    }
}
