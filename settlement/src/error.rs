//! Error types for the settlement engine

use thiserror::Error;
use uuid::Uuid;

use crate::types::SettlementStage;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input, rejected synchronously and never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transition attempted out of a terminal stage, or otherwise not
    /// defined by the state machine
    #[error("Invalid transition for settlement {settlement_id} at {stage}: {detail}")]
    InvalidTransition {
        /// Settlement concerned
        settlement_id: Uuid,
        /// Stage at the time of the attempt
        stage: SettlementStage,
        /// What was attempted
        detail: String,
    },

    /// Optimistic-transition mismatch: the stage changed between read
    /// and write. Benign for the processor (another sweep won the
    /// race), surfaced to interactive callers.
    #[error("Settlement {settlement_id} moved from {expected} to {actual} concurrently")]
    ConcurrencyConflict {
        /// Settlement concerned
        settlement_id: Uuid,
        /// Stage the caller observed
        expected: SettlementStage,
        /// Stage found at write time
        actual: SettlementStage,
    },

    /// No settlement with this id
    #[error("Settlement not found: {0}")]
    NotFound(Uuid),

    /// Transient storage failure; logged, skipped for this sweep cycle
    /// and retried on the next
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Metrics registration failure
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Core domain error
    #[error(transparent)]
    Core(#[from] exchange_core::Error),
}
