//! Local listener registry.
//!
//! `Signal<T>` is the local dispatch primitive behind event subscriptions and
//! the diagnostics bus: listeners are plain callbacks, `fire` snapshots the
//! current listener list and invokes each one outside the lock so a listener
//! may connect or disconnect others while running.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SignalInner<T> {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(u64, Listener<T>)>>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T: 'static> Detach for SignalInner<T> {
    fn detach(&self, id: u64) {
        self.listeners.write().retain(|(slot, _)| *slot != id);
    }
}

/// Multi-listener callback registry.
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T: 'static> Signal<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                next_id: AtomicU64::new(0),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a listener. It stays connected until `Connection::disconnect`.
    pub fn connect(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Connection {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().push((id, Arc::new(listener)));

        let weak: Weak<SignalInner<T>> = Arc::downgrade(&self.inner);
        let detach: Weak<dyn Detach> = weak;
        Connection {
            id,
            signal: detach,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Invoke every connected listener; returns how many ran.
    pub fn fire(&self, value: &T) -> usize {
        let snapshot: Vec<Listener<T>> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in &snapshot {
            listener(value);
        }
        snapshot.len()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.inner.listeners.read().len())
            .finish()
    }
}

/// Handle for one registered listener.
#[derive(Clone)]
pub struct Connection {
    id: u64,
    signal: Weak<dyn Detach>,
    connected: Arc<AtomicBool>,
}

impl Connection {
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            if let Some(signal) = self.signal.upgrade() {
                signal.detach(self.id);
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && self.signal.strong_count() > 0
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}
