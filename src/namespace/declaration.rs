//! Static channel declarations and the side-specific metadata derived from
//! them.

use std::collections::{BTreeMap, BTreeSet};

use crate::guard::{Guard, GuardSet};
use crate::transport::{Reliability, Side};
use crate::types::{Error, Result};

/// One channel in one direction.
#[derive(Debug, Clone, Default)]
pub struct ChannelDecl {
    /// Argument guards checked by the receiver.
    pub args: GuardSet,
    /// Return-value guard checked by the caller (functions only).
    pub returns: Option<Guard>,
    pub reliability: Reliability,
}

impl ChannelDecl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_args(mut self, args: GuardSet) -> Self {
        self.args = args;
        self
    }

    /// Append a positional argument guard.
    pub fn arg(mut self, guard: Guard) -> Self {
        self.args = self.args.arg(guard);
        self
    }

    /// Guard every argument past the positional ones.
    pub fn rest(mut self, guard: Guard) -> Self {
        self.args = self.args.rest(guard);
        self
    }

    pub fn returns(mut self, guard: Guard) -> Self {
        self.returns = Some(guard);
        self
    }

    pub fn unreliable(mut self) -> Self {
        self.reliability = Reliability::Unreliable;
        self
    }
}

/// Channels of one global scope, as both sides see them.
///
/// `server_bound` channels are sent by clients and received by the server;
/// `client_bound` channels flow the other way. A name may appear in both.
#[derive(Debug, Clone, Default)]
pub struct Declaration {
    server_bound: BTreeMap<String, ChannelDecl>,
    client_bound: BTreeMap<String, ChannelDecl>,
    namespaces: BTreeMap<String, Declaration>,
}

impl Declaration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a channel the server receives.
    pub fn server_bound(mut self, name: impl Into<String>, decl: ChannelDecl) -> Self {
        self.server_bound.insert(name.into(), decl);
        self
    }

    /// Declare a channel clients receive.
    pub fn client_bound(mut self, name: impl Into<String>, decl: ChannelDecl) -> Self {
        self.client_bound.insert(name.into(), decl);
        self
    }

    /// Declare the same channel in both directions.
    pub fn bidirectional(self, name: impl Into<String>, decl: ChannelDecl) -> Self {
        let name = name.into();
        self.server_bound(name.clone(), decl.clone()).client_bound(name, decl)
    }

    pub fn namespace(mut self, name: impl Into<String>, child: Declaration) -> Self {
        self.namespaces.insert(name.into(), child);
        self
    }

    /// Reject empty names, names containing `/` or `:`, and channel names
    /// that collide with a sibling namespace.
    pub fn validate(&self) -> Result<()> {
        self.validate_at("")
    }

    fn validate_at(&self, path: &str) -> Result<()> {
        let names = self
            .server_bound
            .keys()
            .chain(self.client_bound.keys())
            .chain(self.namespaces.keys());
        for name in names {
            if name.is_empty() || name.contains('/') || name.contains(':') {
                return Err(Error::validation(format!(
                    "invalid channel or namespace name '{}' in '{}'",
                    name, path
                )));
            }
        }

        for (name, child) in &self.namespaces {
            if self.server_bound.contains_key(name) || self.client_bound.contains_key(name) {
                return Err(Error::validation(format!(
                    "'{}' in '{}' is declared both as a channel and as a namespace",
                    name, path
                )));
            }
            child.validate_at(&join(path, name))?;
        }
        Ok(())
    }

    /// What `side` receives (incoming) and sends (outgoing).
    pub fn metadata(&self, side: Side) -> NamespaceMetadata {
        let (incoming, outgoing) = match side {
            Side::Server => (&self.server_bound, &self.client_bound),
            Side::Client => (&self.client_bound, &self.server_bound),
        };
        NamespaceMetadata {
            incoming: incoming.clone(),
            outgoing: outgoing.clone(),
            namespaces: self
                .namespaces
                .iter()
                .map(|(name, child)| (name.clone(), child.metadata(side)))
                .collect(),
        }
    }
}

/// Side-specific view of one namespace node.
#[derive(Debug, Clone, Default)]
pub struct NamespaceMetadata {
    pub incoming: BTreeMap<String, ChannelDecl>,
    pub outgoing: BTreeMap<String, ChannelDecl>,
    pub namespaces: BTreeMap<String, NamespaceMetadata>,
}

impl NamespaceMetadata {
    /// Every channel name at this node, sorted.
    pub fn names(&self) -> Vec<&str> {
        let names: BTreeSet<&str> = self
            .incoming
            .keys()
            .chain(self.outgoing.keys())
            .map(String::as_str)
            .collect();
        names.into_iter().collect()
    }

    pub fn is_bidirectional(&self, name: &str) -> bool {
        self.incoming.contains_key(name) && self.outgoing.contains_key(name)
    }

    /// Effective `(incoming, outgoing)` reliability. A name declared in one
    /// direction only uses that direction's reliability for both.
    pub fn reliability(&self, name: &str) -> Option<(Reliability, Reliability)> {
        let incoming = self.incoming.get(name).map(|decl| decl.reliability);
        let outgoing = self.outgoing.get(name).map(|decl| decl.reliability);
        match (incoming, outgoing) {
            (Some(i), Some(o)) => Some((i, o)),
            (Some(i), None) => Some((i, i)),
            (None, Some(o)) => Some((o, o)),
            (None, None) => None,
        }
    }
}

pub(crate) fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", path, name)
    }
}
