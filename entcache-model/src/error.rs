//! Error types carried by actions or raised while building them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Programmer errors raised synchronously by the action factory.
///
/// These never reach a reducer: a malformed action is rejected before it
/// can be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("entity action is missing an entity name")]
    MissingEntityName,

    #[error("entity action is missing an entity op")]
    MissingEntityOp,

    #[error("unknown entity op: {0}")]
    UnknownEntityOp(String),

    #[error("invalid entity action payload: {0}")]
    InvalidPayload(String),
}

/// Raised when a serialized collection violates its invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("inconsistent collection {entity_name}: {reason}")]
pub struct SnapshotError {
    pub entity_name: String,
    pub reason: String,
}

/// HTTP verb of the request that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        })
    }
}

/// What went wrong underneath a data-service call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum ServiceFailure {
    /// The server answered with a non-success status.
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never got an answer.
    #[error("network error: {0}")]
    Network(String),

    /// The request exceeded the configured timeout.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The answer could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request was refused before reaching the service.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Another request with the same correlation id is still in flight.
    /// Answers the refused request only; the one in flight is unaffected.
    #[error("correlation id {0} is already in flight")]
    DuplicateCorrelationId(String),
}

/// Structured failure of a data-service request.
///
/// Carried as data inside `_ERROR` entity actions and `SaveEntitiesError`;
/// never thrown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{http_method} {url} failed: {underlying_error}")]
pub struct DataServiceError {
    pub http_method: HttpMethod,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
    pub underlying_error: ServiceFailure,
}

impl DataServiceError {
    /// Wraps a failure with the request that produced it.
    pub fn new(
        http_method: HttpMethod,
        url: impl Into<String>,
        underlying_error: ServiceFailure,
    ) -> Self {
        Self {
            http_method,
            url: url.into(),
            options: None,
            underlying_error,
        }
    }

    /// Attaches the request options (body, query parameters).
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }

    /// Whether the request was refused because its correlation id was
    /// already taken by a request in flight.
    pub fn is_duplicate_correlation_id(&self) -> bool {
        matches!(self.underlying_error, ServiceFailure::DuplicateCorrelationId(_))
    }
}
