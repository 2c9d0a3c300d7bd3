//! Pending-call tables.
//!
//! One table per remote target, created on the first call to that target and
//! torn down when it disconnects. Each table hands out monotonically
//! increasing ids starting at 0; an id is settled exactly once, by whichever
//! of response, timeout, cancellation or disconnect gets there first.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

use super::outcome::Response;
use crate::transport::Target;
use crate::types::{Error, Result};

/// What a pending call eventually receives.
pub type Settlement = Result<Response>;

#[derive(Default)]
struct Table {
    next_id: u64,
    pending: HashMap<u64, oneshot::Sender<Settlement>>,
}

/// Pending calls of one function channel, keyed by target.
#[derive(Default)]
pub struct PendingCalls {
    tables: Mutex<HashMap<Target, Table>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id for `target` and register its resolver.
    pub fn register(&self, target: &Target) -> (u64, oneshot::Receiver<Settlement>) {
        let (tx, rx) = oneshot::channel();
        let mut tables = self.tables.lock();
        let table = tables.entry(target.clone()).or_default();
        let id = table.next_id;
        table.next_id += 1;
        table.pending.insert(id, tx);
        (id, rx)
    }

    /// Hand a response to its caller. Returns `false` for unknown ids
    /// (duplicates, or calls already timed out or cancelled).
    pub fn resolve(&self, target: &Target, response: Response) -> bool {
        let resolver = self
            .tables
            .lock()
            .get_mut(target)
            .and_then(|table| table.pending.remove(&response.id));
        match resolver {
            Some(resolver) => resolver.send(Ok(response)).is_ok(),
            None => false,
        }
    }

    /// Forget a call without settling it.
    pub fn remove(&self, target: &Target, id: u64) -> bool {
        self.tables
            .lock()
            .get_mut(target)
            .is_some_and(|table| table.pending.remove(&id).is_some())
    }

    /// Tear down `target`'s table, rejecting its outstanding calls with
    /// `Disconnected`. Returns how many calls were rejected.
    pub fn disconnect(&self, target: &Target) -> usize {
        let Some(table) = self.tables.lock().remove(target) else {
            return 0;
        };
        let count = table.pending.len();
        for (id, resolver) in table.pending {
            let _ = resolver.send(Err(Error::disconnected(format!(
                "{} disconnected while call {} was pending",
                target, id
            ))));
        }
        count
    }

    pub fn pending_count(&self, target: &Target) -> usize {
        self.tables
            .lock()
            .get(target)
            .map(|table| table.pending.len())
            .unwrap_or(0)
    }

    /// The id the next call to `target` would receive.
    pub fn next_id(&self, target: &Target) -> u64 {
        self.tables
            .lock()
            .get(target)
            .map(|table| table.next_id)
            .unwrap_or(0)
    }

    pub fn has_table(&self, target: &Target) -> bool {
        self.tables.lock().contains_key(target)
    }
}

impl std::fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.lock();
        let pending: usize = tables.values().map(|table| table.pending.len()).sum();
        f.debug_struct("PendingCalls")
            .field("tables", &tables.len())
            .field("pending", &pending)
            .finish()
    }
}

/// Removes a still-pending entry when the owning call is dropped (caller
/// cancellation, timeout, send failure).
pub(crate) struct PendingGuard<'a> {
    calls: &'a PendingCalls,
    target: Target,
    id: u64,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(calls: &'a PendingCalls, target: Target, id: u64) -> Self {
        Self {
            calls,
            target,
            id,
            armed: true,
        }
    }

    /// The entry was consumed by a settlement; nothing left to remove.
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.calls.remove(&self.target, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::outcome::Outcome;
    use crate::types::PeerId;
    use proptest::prelude::*;
    use serde_json::json;

    fn success(id: u64) -> Response {
        Response {
            id,
            outcome: Outcome::Success,
            value: json!(id),
        }
    }

    #[tokio::test]
    async fn test_resolve_once() {
        let calls = PendingCalls::new();
        let (id, rx) = calls.register(&Target::Server);
        assert_eq!(id, 0);

        assert!(calls.resolve(&Target::Server, success(id)));
        assert!(!calls.resolve(&Target::Server, success(id)));
        assert_eq!(rx.await.unwrap().unwrap(), success(0));
    }

    #[test]
    fn test_settlement_stays_pending_until_resolved() {
        let calls = PendingCalls::new();
        let (id, rx) = calls.register(&Target::Server);
        let mut settled = tokio_test::task::spawn(rx);

        tokio_test::assert_pending!(settled.poll());
        assert!(calls.resolve(&Target::Server, success(id)));
        assert!(settled.is_woken());
        let result = tokio_test::assert_ready!(settled.poll());
        assert_eq!(result.unwrap().unwrap(), success(0));
    }

    #[tokio::test]
    async fn test_tables_are_independent_per_peer() {
        let calls = PendingCalls::new();
        let a = Target::Peer(PeerId::named("a"));
        let b = Target::Peer(PeerId::named("b"));
        let (id_a, rx_a) = calls.register(&a);
        let (id_b, rx_b) = calls.register(&b);
        assert_eq!((id_a, id_b), (0, 0));

        assert!(calls.resolve(&b, success(0)));
        assert_eq!(calls.pending_count(&a), 1);
        assert_eq!(rx_b.await.unwrap().unwrap().id, 0);

        assert!(calls.resolve(&a, success(0)));
        assert!(rx_a.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_rejects_and_tears_down() {
        let calls = PendingCalls::new();
        let peer = Target::Peer(PeerId::named("gone"));
        let (_, rx1) = calls.register(&peer);
        let (_, rx2) = calls.register(&peer);

        assert_eq!(calls.disconnect(&peer), 2);
        assert!(!calls.has_table(&peer));
        assert!(matches!(rx1.await.unwrap(), Err(Error::Disconnected(_))));
        assert!(matches!(rx2.await.unwrap(), Err(Error::Disconnected(_))));
        assert_eq!(calls.disconnect(&peer), 0);
    }

    #[test]
    fn test_guard_removes_unless_disarmed() {
        let calls = PendingCalls::new();
        let (id, _rx) = calls.register(&Target::Server);
        drop(PendingGuard::new(&calls, Target::Server, id));
        assert_eq!(calls.pending_count(&Target::Server), 0);

        let (id, _rx) = calls.register(&Target::Server);
        let mut guard = PendingGuard::new(&calls, Target::Server, id);
        guard.disarm();
        drop(guard);
        assert_eq!(calls.pending_count(&Target::Server), 1);
    }

    proptest! {
        #[test]
        fn prop_ids_strictly_increase(settle in proptest::collection::vec(proptest::arbitrary::any::<bool>(), 1..40)) {
            let calls = PendingCalls::new();
            let mut last = None;
            let mut receivers = Vec::new();
            for resolve_now in settle {
                let (id, rx) = calls.register(&Target::Server);
                if let Some(prev) = last {
                    prop_assert!(id > prev);
                }
                last = Some(id);
                if resolve_now {
                    calls.resolve(&Target::Server, success(id));
                } else {
                    receivers.push(rx);
                }
            }
            prop_assert_eq!(calls.pending_count(&Target::Server), receivers.len());
        }
    }
}
