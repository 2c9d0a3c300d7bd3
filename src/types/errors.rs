//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Call
//! outcomes (timeouts, rejected requests, ...) share the enum with setup and
//! transport faults so a single `Result` flows through the crate.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the networking layer.
#[derive(Error, Debug)]
pub enum Error {
    /// No response arrived before the deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// An argument guard rejected the request, locally or on the remote side.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The receiving side has no callback registered.
    #[error("unprocessed: {0}")]
    Unprocessed(String),

    /// The response value failed the local return guard.
    #[error("invalid result: {0}")]
    InvalidResult(String),

    /// The callee skipped the request, or the caller cancelled it.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The remote callback failed.
    #[error("failure: {0}")]
    Failure(String),

    /// The peer disconnected while the call was pending.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// Invalid declaration, configuration or API use.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown channel, namespace or endpoint.
    #[error("not found: {0}")]
    NotFound(String),

    /// The transport could not deliver a message.
    #[error("transport error: {0}")]
    Transport(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// JSON serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Msgpack frame encoding errors.
    #[error("codec error: {0}")]
    Codec(String),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable error code, also used as the outcome tag on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Timeout(_) => "Timeout",
            Error::BadRequest(_) => "BadRequest",
            Error::Unprocessed(_) => "Unprocessed",
            Error::InvalidResult(_) => "InvalidResult",
            Error::Cancelled(_) => "Cancelled",
            Error::Failure(_) => "Failure",
            Error::Disconnected(_) => "Disconnected",
            Error::Validation(_) => "INVALID_ARGUMENT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Transport(_) => "UNAVAILABLE",
            Error::Internal(_) | Error::Serialization(_) | Error::Codec(_) | Error::Io(_) => {
                "INTERNAL"
            }
        }
    }

    /// Whether this is one of the normal function-call outcomes rather than
    /// an infrastructure fault.
    pub fn is_call_outcome(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::BadRequest(_)
                | Error::Unprocessed(_)
                | Error::InvalidResult(_)
                | Error::Cancelled(_)
                | Error::Failure(_)
                | Error::Disconnected(_)
        )
    }
}

// Convenience constructors
impl Error {
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unprocessed(msg: impl Into<String>) -> Self {
        Self::Unprocessed(msg.into())
    }

    pub fn invalid_result(msg: impl Into<String>) -> Self {
        Self::InvalidResult(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self::Failure(msg.into())
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::Disconnected(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
