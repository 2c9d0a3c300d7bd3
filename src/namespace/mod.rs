//! Namespace/metadata tree.
//!
//! A [`Declaration`] describes a global scope's channels once for both sides.
//! Each side derives its [`NamespaceMetadata`] (what it receives, what it
//! sends), and the builder turns that tree into a [`Namespace`] of live
//! channels. Nested namespaces share the parent's configuration and pick their
//! middleware from the matching branch of the middleware tree.

mod builder;
mod declaration;

pub use builder::{endpoint_id, BoundEndpoint, Bound, ChannelSetup, NameMapper};
pub use declaration::{ChannelDecl, Declaration, NamespaceMetadata};

pub(crate) use builder::{build_namespace, BuildContext};

use std::collections::BTreeMap;

use crate::event::EventChannel;
use crate::function::FunctionChannel;
use crate::types::{Error, Result};

/// Built channels of one namespace, plus its child namespaces.
#[derive(Debug, Clone)]
pub struct Namespace<C> {
    path: String,
    channels: BTreeMap<String, C>,
    namespaces: BTreeMap<String, Namespace<C>>,
}

/// Event channels of one global scope.
pub type EventHandler = Namespace<EventChannel>;

/// Function channels of one global scope.
pub type FunctionHandler = Namespace<FunctionChannel>;

impl<C> Namespace<C> {
    pub(crate) fn from_parts(
        path: String,
        channels: BTreeMap<String, C>,
        namespaces: BTreeMap<String, Namespace<C>>,
    ) -> Self {
        Self {
            path,
            channels,
            namespaces,
        }
    }

    /// Slash-joined path of this namespace; empty at the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Channel `name` at this level.
    pub fn get(&self, name: &str) -> Result<&C> {
        self.channels.get(name).ok_or_else(|| {
            Error::not_found(format!("no channel '{}' in namespace '{}'", name, self.path))
        })
    }

    /// Child namespace `name`.
    pub fn namespace(&self, name: &str) -> Result<&Namespace<C>> {
        self.namespaces.get(name).ok_or_else(|| {
            Error::not_found(format!("no namespace '{}' in namespace '{}'", name, self.path))
        })
    }

    /// Resolve a slash-separated path such as `admin/kick`.
    pub fn lookup(&self, path: &str) -> Result<&C> {
        match path.rsplit_once('/') {
            None => self.get(path),
            Some((parents, name)) => {
                let mut node = self;
                for segment in parents.split('/') {
                    node = node.namespace(segment)?;
                }
                node.get(name)
            }
        }
    }

    pub fn channels(&self) -> impl Iterator<Item = (&str, &C)> {
        self.channels.iter().map(|(name, channel)| (name.as_str(), channel))
    }

    pub fn namespaces(&self) -> impl Iterator<Item = (&str, &Namespace<C>)> {
        self.namespaces.iter().map(|(name, child)| (name.as_str(), child))
    }

    /// Number of channels in this namespace and all descendants.
    pub fn total_channels(&self) -> usize {
        self.channels.len()
            + self
                .namespaces
                .values()
                .map(Namespace::total_channels)
                .sum::<usize>()
    }
}
