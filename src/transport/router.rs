//! Inbound routing table shared by the bundled transports.
//!
//! Routes `(scope, id)` to the endpoint's delivery handler. Messages for an
//! endpoint without a handler are held in a bounded backlog and replayed, in
//! arrival order, when the handler is installed.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::middleware::Args;
use crate::transport::{DeliveryHandler, Reliability};
use crate::types::{Error, PeerId, Result};

/// Default number of messages held per endpoint while no handler is set.
pub const DEFAULT_BACKLOG_LIMIT: usize = 1024;

type Backlog = VecDeque<(Option<PeerId>, Args)>;

#[derive(Default)]
struct Route {
    reliability: Option<Reliability>,
    handler: Option<DeliveryHandler>,
    backlog: Backlog,
    dropped: u64,
}

/// `(scope, id)` → handler table.
pub struct Router {
    routes: Mutex<HashMap<(String, String), Route>>,
    backlog_limit: usize,
}

impl Router {
    pub fn new() -> Self {
        Self::with_backlog_limit(DEFAULT_BACKLOG_LIMIT)
    }

    pub fn with_backlog_limit(backlog_limit: usize) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            backlog_limit,
        }
    }

    /// Record the endpoint's reliability. Redundant claims with the same
    /// reliability succeed; a conflicting claim is rejected.
    pub fn claim(&self, scope: &str, id: &str, reliability: Reliability) -> Result<()> {
        let mut routes = self.routes.lock();
        let route = routes.entry(key(scope, id)).or_default();
        match route.reliability {
            None => {
                route.reliability = Some(reliability);
                Ok(())
            }
            Some(existing) if existing == reliability => Ok(()),
            Some(existing) => Err(Error::validation(format!(
                "endpoint '{}/{}' already exists as {:?}, requested {:?}",
                scope, id, existing, reliability
            ))),
        }
    }

    /// Install (or replace) the handler and replay any backlog.
    pub fn set_handler(&self, scope: &str, id: &str, handler: DeliveryHandler) {
        // Drain outside the lock so handlers may touch the router; the handler
        // is only published once the backlog is empty, which keeps concurrent
        // deliveries queued behind the replay.
        loop {
            let pending = {
                let mut routes = self.routes.lock();
                let route = routes.entry(key(scope, id)).or_default();
                if route.backlog.is_empty() {
                    route.handler = Some(handler);
                    return;
                }
                std::mem::take(&mut route.backlog)
            };

            for (sender, args) in pending {
                handler(sender, args);
            }
        }
    }

    /// Hand one inbound message to its endpoint's handler.
    pub fn deliver(&self, scope: &str, id: &str, sender: Option<PeerId>, args: Args) {
        let handler = {
            let mut routes = self.routes.lock();
            let route = routes.entry(key(scope, id)).or_default();
            match &route.handler {
                Some(handler) => handler.clone(),
                None => {
                    if route.backlog.len() >= self.backlog_limit {
                        route.backlog.pop_front();
                        route.dropped += 1;
                        tracing::warn!(
                            "backlog for endpoint '{}/{}' full, dropped oldest message ({} total)",
                            scope,
                            id,
                            route.dropped
                        );
                    }
                    route.backlog.push_back((sender, args));
                    return;
                }
            }
        };

        handler(sender, args);
    }

    pub fn has_handler(&self, scope: &str, id: &str) -> bool {
        self.routes
            .lock()
            .get(&key(scope, id))
            .is_some_and(|route| route.handler.is_some())
    }

    pub fn backlog_len(&self, scope: &str, id: &str) -> usize {
        self.routes
            .lock()
            .get(&key(scope, id))
            .map(|route| route.backlog.len())
            .unwrap_or(0)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.lock().len())
            .field("backlog_limit", &self.backlog_limit)
            .finish()
    }
}

fn key(scope: &str, id: &str) -> (String, String) {
    (scope.to_string(), id.to_string())
}
