//! Error types for the matching engine

use thiserror::Error;
use uuid::Uuid;

/// Result type for matching operations
pub type Result<T> = std::result::Result<T, Error>;

/// Matching engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed order input, rejected synchronously
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation not permitted in the order's current status
    /// (e.g., cancelling a filled order)
    #[error("Invalid order state: {0}")]
    InvalidState(String),

    /// Order id not known to this instrument's book
    #[error("Unknown order: {0}")]
    UnknownOrder(Uuid),

    /// Defensive quantity-conservation check failed; the match attempt
    /// is aborted and the offending order left unmatched
    #[error("Matching invariant violation: {0}")]
    InvariantViolation(String),

    /// Actor mailbox or response channel closed
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Core domain error
    #[error(transparent)]
    Core(#[from] exchange_core::Error),
}
