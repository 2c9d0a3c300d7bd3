//! Core types for the networking layer.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed peer identifiers
//! - **Errors**: Call outcomes and infrastructure errors with thiserror derives
//! - **Config**: Scalar handler configuration and TCP transport settings

mod config;
mod errors;
mod ids;

pub use config::{NetworkConfig, TcpConfig, DEFAULT_CLIENT_TIMEOUT, DEFAULT_SERVER_TIMEOUT};
pub use errors::{Error, Result};
pub use ids::PeerId;
