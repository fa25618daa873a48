//! Error types for core domain operations

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core domain errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input, rejected synchronously and never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Certificate type code not recognized
    #[error("Unknown certificate type: {0}")]
    UnknownCertificateType(String),

    /// Illegal state transition on an order
    #[error("Invalid order state: {0}")]
    InvalidState(String),
}
