//! Identifier types used throughout the cache.
//!
//! Entity keys are whatever the server uses (strings or integers). Correlation
//! ids are opaque tokens joining a request to its completion or cancellation.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Prefix marking a key assigned locally to an entity that has no id yet.
const PROVISIONAL_PREFIX: char = '?';

/// Primary key of an entity within its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityKey {
    /// Numeric key.
    Num(i64),
    /// String key.
    Str(String),
}

impl EntityKey {
    /// Extracts a key from a JSON value. Only strings and integers qualify.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(Self::Str(s.clone())),
            serde_json::Value::Number(n) => n.as_i64().map(Self::Num),
            _ => None,
        }
    }

    /// Like [`EntityKey::from_value`] but reports what was rejected.
    pub fn try_from_value(value: &serde_json::Value) -> crate::Result<Self> {
        Self::from_value(value).ok_or_else(|| Error::InvalidEntityKey(value.to_string()))
    }

    /// Builds the placeholder key for an optimistically added entity
    /// whose id is not known until the server answers.
    #[must_use]
    pub fn provisional(correlation_id: &CorrelationId) -> Self {
        Self::Str(format!("{PROVISIONAL_PREFIX}{correlation_id}"))
    }

    /// Whether this key was assigned locally by [`EntityKey::provisional`].
    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Str(s) if s.starts_with(PROVISIONAL_PREFIX))
    }

    /// Converts the key back into JSON.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Num(n) => serde_json::Value::from(*n),
            Self::Str(s) => serde_json::Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EntityKey {
    fn from(n: i64) -> Self {
        Self::Num(n)
    }
}

impl From<&str> for EntityKey {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// Token linking a request action to its success, error or cancel action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Creates a fresh, time-ordered correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Generates sequential correlation ids (`<prefix>1`, `<prefix>2`, ...).
///
/// Generators built with [`Default`] draw their prefix from a fresh UUID v7,
/// so independent generators never hand out the same id. A custom prefix
/// is only unique if the caller makes it so.
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    prefix: String,
    seed: AtomicU64,
}

impl CorrelationIdGenerator {
    /// Creates a generator with a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            seed: AtomicU64::new(0),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the next id.
    pub fn next(&self) -> CorrelationId {
        let seq = self.seed.fetch_add(1, Ordering::Relaxed) + 1;
        CorrelationId(format!("{}{}", self.prefix, seq))
    }
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self::with_prefix(format!("CRID-{}-", Uuid::now_v7().simple()))
    }
}
