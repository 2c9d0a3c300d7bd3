//! Argument guards.
//!
//! A [`Guard`] is a predicate over one argument value. A [`GuardSet`] holds the
//! guards for one channel: one per positional argument plus an optional rest
//! guard covering every position past the positional list. Missing arguments
//! are checked as `null`, so a positional guard that rejects `null` also
//! enforces arity.

use schemars::JsonSchema;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::types::{Error, Result};

type Predicate = dyn Fn(&Value) -> bool + Send + Sync;

/// A named predicate over one argument value.
#[derive(Clone)]
pub struct Guard {
    name: Arc<str>,
    check: Arc<Predicate>,
}

impl Guard {
    pub fn new(name: impl Into<String>, check: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: Arc::from(name.into()),
            check: Arc::new(check),
        }
    }

    pub fn check(&self, value: &Value) -> bool {
        (self.check)(value)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Guard").field(&self.name).finish()
    }
}

/// Accepts every value, including `null`.
pub fn any() -> Guard {
    Guard::new("any", |_| true)
}

pub fn string() -> Guard {
    Guard::new("string", Value::is_string)
}

pub fn number() -> Guard {
    Guard::new("number", Value::is_number)
}

/// Accepts integral numbers (signed or unsigned).
pub fn integer() -> Guard {
    Guard::new("integer", |v| v.is_i64() || v.is_u64())
}

pub fn boolean() -> Guard {
    Guard::new("boolean", Value::is_boolean)
}

pub fn null() -> Guard {
    Guard::new("null", Value::is_null)
}

pub fn object() -> Guard {
    Guard::new("object", Value::is_object)
}

pub fn array() -> Guard {
    Guard::new("array", Value::is_array)
}

/// Accepts `null` or whatever `inner` accepts.
pub fn optional(inner: Guard) -> Guard {
    let name = format!("optional<{}>", inner.name());
    Guard::new(name, move |v| v.is_null() || inner.check(v))
}

/// Accepts arrays whose every element satisfies `inner`.
pub fn array_of(inner: Guard) -> Guard {
    let name = format!("array<{}>", inner.name());
    Guard::new(name, move |v| {
        v.as_array()
            .map(|items| items.iter().all(|item| inner.check(item)))
            .unwrap_or(false)
    })
}

/// Accepts exactly `expected`.
pub fn literal(expected: Value) -> Guard {
    let name = format!("literal<{}>", expected);
    Guard::new(name, move |v| *v == expected)
}

/// Accepts values that satisfy at least one of `options`.
pub fn union(options: Vec<Guard>) -> Guard {
    let name = options
        .iter()
        .map(Guard::name)
        .collect::<Vec<_>>()
        .join(" | ");
    Guard::new(name, move |v| options.iter().any(|g| g.check(v)))
}

/// Guard backed by an explicit JSON schema.
pub fn schema(schema: Value) -> Result<Guard> {
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| Error::validation(format!("invalid guard schema: {}", e)))?;
    let name = schema
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("schema")
        .to_string();
    Ok(Guard::new(name, move |v| validator.is_valid(v)))
}

/// Guard derived from the JSON schema of a Rust type.
pub fn of<T: JsonSchema>() -> Result<Guard> {
    let root = schemars::schema_for!(T);
    schema(serde_json::to_value(root)?)
}

/// Guards for one channel's argument list.
#[derive(Debug, Clone, Default)]
pub struct GuardSet {
    positional: Vec<Guard>,
    rest: Option<Guard>,
}

impl GuardSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional guard.
    pub fn arg(mut self, guard: Guard) -> Self {
        self.positional.push(guard);
        self
    }

    /// Guard applied to every position past the positional list.
    pub fn rest(mut self, guard: Guard) -> Self {
        self.rest = Some(guard);
        self
    }

    pub fn positional(&self) -> &[Guard] {
        &self.positional
    }

    pub fn rest_guard(&self) -> Option<&Guard> {
        self.rest.as_ref()
    }

    pub fn guard_for(&self, index: usize) -> Option<&Guard> {
        self.positional.get(index).or(self.rest.as_ref())
    }

    /// Index of the first argument that fails its guard.
    ///
    /// Walks `max(positional.len(), args.len())` positions; positions without a
    /// positional guard fall back to the rest guard, and positions without any
    /// guard pass.
    pub fn first_failure(&self, args: &[Value]) -> Option<usize> {
        let len = self.positional.len().max(args.len());
        (0..len).find(|&i| {
            let value = args.get(i).unwrap_or(&Value::Null);
            self.guard_for(i).is_some_and(|guard| !guard.check(value))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.rest.is_none()
    }
}
