//! Error taxonomy shared by the transport, the query cache and mutations.

use std::time::Duration;

use thiserror::Error;

/// Error type for queries, mutations and raw transport calls.
///
/// Errors are `Clone` because a single fetch result is shared between every
/// deduplicated waiter and is also recorded on the cache entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The request never completed (connection refused, DNS, reset, ...).
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    /// No response arrived within the request's time budget.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The response body did not match the expected shape.
    #[error("Invalid response: {0}")]
    Decode(String),

    /// A request payload could not be serialized.
    #[error("Invalid request payload: {0}")]
    Serialization(String),

    /// Client-side validation rejected an input before it was submitted.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A cached value was read back with a different type than it was stored with.
    #[error("Cached value for {key} has an unexpected type")]
    TypeMismatch { key: String },
}

impl QueryError {
    /// Returns the HTTP status for [`QueryError::Http`] errors.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` for failures where the server was never reached or never answered.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}
