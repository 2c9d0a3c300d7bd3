//! Channel descriptor passed to every interceptor and diagnostic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a channel is fire-and-forget or request/response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Event,
    Function,
}

/// Identifies one channel for diagnostics and middleware context.
///
/// `name` is the effective name: the slash-joined path through nested
/// namespaces, e.g. `admin/kick`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub global_name: String,
    pub name: String,
    pub kind: ChannelKind,
}

impl NetworkInfo {
    pub fn new(global_name: impl Into<String>, name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            global_name: global_name.into(),
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for NetworkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ChannelKind::Event => "event",
            ChannelKind::Function => "function",
        };
        write!(f, "{} '{}/{}'", kind, self.global_name, self.name)
    }
}
