//! Call outcome vocabulary and the request/response wire shapes.
//!
//! ```text
//!   request:  [id, arg0, arg1, ...]
//!   response: [id, outcome, value]
//! ```
//! `outcome` is one of `"Success"`, `"Cancelled"`, `"BadRequest"`,
//! `"Unprocessed"`, `"Failure"`. For `Failure` the value carries the error
//! message; for the other non-success outcomes it is `null`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::middleware::Args;
use crate::network_info::NetworkInfo;
use crate::types::{Error, Result};

/// What a callee-side pipeline produced for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Successful result.
    Value(Value),
    /// The callee opted out; the caller sees `Cancelled`.
    Skip,
    /// An argument guard rejected the request.
    BadRequest,
}

impl Reply {
    /// Serialize any value into a successful reply.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Reply::Value(serde_json::to_value(value)?))
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Value(value)
    }
}

/// Outcome tag transmitted with every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Cancelled,
    BadRequest,
    Unprocessed,
    Failure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "Success",
            Outcome::Cancelled => "Cancelled",
            Outcome::BadRequest => "BadRequest",
            Outcome::Unprocessed => "Unprocessed",
            Outcome::Failure => "Failure",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "Success" => Some(Outcome::Success),
            "Cancelled" => Some(Outcome::Cancelled),
            "BadRequest" => Some(Outcome::BadRequest),
            "Unprocessed" => Some(Outcome::Unprocessed),
            "Failure" => Some(Outcome::Failure),
            _ => None,
        }
    }
}

/// One decoded response message.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub outcome: Outcome,
    pub value: Value,
}

impl Response {
    /// Translate the callee pipeline's result into a response.
    pub fn from_result(id: u64, result: Result<Reply>) -> Self {
        let (outcome, value) = match result {
            Ok(Reply::Value(value)) => (Outcome::Success, value),
            Ok(Reply::Skip) => (Outcome::Cancelled, Value::Null),
            Ok(Reply::BadRequest) | Err(Error::BadRequest(_)) => (Outcome::BadRequest, Value::Null),
            Err(Error::Cancelled(_)) => (Outcome::Cancelled, Value::Null),
            Err(Error::Unprocessed(_)) => (Outcome::Unprocessed, Value::Null),
            Err(e) => (Outcome::Failure, Value::String(e.to_string())),
        };
        Self { id, outcome, value }
    }

    pub fn into_args(self) -> Args {
        vec![Value::from(self.id), Value::from(self.outcome.as_str()), self.value]
    }

    pub fn from_args(args: Args) -> Result<Self> {
        let mut args = args.into_iter();
        let id = args
            .next()
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::validation("response is missing its numeric id"))?;
        let outcome = args
            .next()
            .as_ref()
            .and_then(Value::as_str)
            .and_then(Outcome::parse)
            .ok_or_else(|| Error::validation(format!("response {} has no valid outcome", id)))?;
        let value = args.next().unwrap_or(Value::Null);
        Ok(Self { id, outcome, value })
    }

    /// Map a non-success outcome to the caller-visible error.
    pub fn into_value(self, info: &NetworkInfo) -> Result<Value> {
        match self.outcome {
            Outcome::Success => Ok(self.value),
            Outcome::Cancelled => Err(Error::cancelled(format!("{} was skipped by the remote callback", info))),
            Outcome::BadRequest => Err(Error::bad_request(format!("{} rejected the arguments", info))),
            Outcome::Unprocessed => Err(Error::unprocessed(format!("{} has no remote callback", info))),
            Outcome::Failure => {
                let message = match self.value {
                    Value::String(message) => message,
                    other => other.to_string(),
                };
                Err(Error::failure(message))
            }
        }
    }
}

/// Build `[id, ...args]`.
pub fn encode_request(id: u64, args: Args) -> Args {
    let mut request = Vec::with_capacity(args.len() + 1);
    request.push(Value::from(id));
    request.extend(args);
    request
}

/// Split `[id, ...args]`. `None` if the id is missing or not an unsigned integer.
pub fn decode_request(mut args: Args) -> Option<(u64, Args)> {
    if args.is_empty() {
        return None;
    }
    let id = args.remove(0).as_u64()?;
    Some((id, args))
}
