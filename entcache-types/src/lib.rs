//! Core type definitions for entcache.
//!
//! This crate defines the fundamental types every other layer of the cache
//! depends on:
//! - Entity keys and correlation identifiers
//! - The closed set of entity operations ([`EntityOp`])
//!
//! Nothing here knows about collections, reducers or data services.

mod ids;
mod op;

pub use ids::{CorrelationId, CorrelationIdGenerator, EntityKey};
pub use op::{EntityOp, OP_PREFIX};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("unknown entity op: {0}")]
    UnknownEntityOp(String),

    #[error("invalid entity key: {0}")]
    InvalidEntityKey(String),
}
