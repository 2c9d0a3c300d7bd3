//! Configuration structures.
//!
//! Scalar settings live in `NetworkConfig` and are inherited unchanged by every
//! nested namespace. Middleware is configured separately per namespace (see
//! `middleware::MiddlewareTree`).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::transport::Side;

/// Default timeout for requests issued by the server.
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for requests issued by a client.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-handler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct NetworkConfig {
    /// Skip argument and return-value guards entirely.
    pub disable_incoming_guards: bool,

    /// Log a warning whenever a guard rejects a value.
    pub warn_on_invalid_guards: bool,

    /// Timeout used by `invoke` when none is given explicitly.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub default_timeout: Duration,
}

impl NetworkConfig {
    /// Defaults for the given side: 10s outgoing timeout on the server, 30s on
    /// the client, warnings enabled in debug builds.
    pub fn for_side(side: Side) -> Self {
        Self {
            disable_incoming_guards: false,
            warn_on_invalid_guards: cfg!(debug_assertions),
            default_timeout: match side {
                Side::Server => DEFAULT_SERVER_TIMEOUT,
                Side::Client => DEFAULT_CLIENT_TIMEOUT,
            },
        }
    }

    /// Load a (possibly partial) configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::types::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_guards_disabled(mut self, disabled: bool) -> Self {
        self.disable_incoming_guards = disabled;
        self
    }

    pub fn with_warnings(mut self, warn: bool) -> Self {
        self.warn_on_invalid_guards = warn;
        self
    }

    /// JSON schema of the configuration file format.
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(NetworkConfig);
        serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::for_side(Side::Server)
    }
}

/// TCP transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TcpConfig {
    /// Maximum frame payload size in bytes.
    pub max_frame_bytes: u32,

    /// Maximum concurrent client connections. Connections beyond this limit
    /// are closed immediately.
    pub max_connections: usize,

    /// Outbound frames queued per connection before sends start failing.
    pub send_queue_capacity: usize,

    /// Drop a connection that sends nothing for this long (`None` = never).
    #[serde(with = "humantime_serde")]
    #[schemars(with = "Option<String>")]
    pub idle_timeout: Option<Duration>,

    /// Per-frame write deadline. Slow consumers are dropped.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub write_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 5 * 1024 * 1024,
            max_connections: 1000,
            send_queue_capacity: 1024,
            idle_timeout: None,
            write_timeout: Duration::from_secs(10),
        }
    }
}
