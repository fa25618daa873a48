//! CertMark Matching Engine
//!
//! Price-time-priority limit order book for emission-allowance
//! certificates, one book per certificate type.
//!
//! # Architecture
//!
//! - **Single Writer**: one actor task owns each instrument's book, so
//!   submit/cancel for a certificate type are serialized and snapshots
//!   observe a consistent point-in-time view
//! - **Order Arena**: orders live in a per-instrument arena keyed by id;
//!   the book holds (price -> FIFO queue) references into it
//! - **Exact Prices**: matching equality is exact `Decimal` comparison,
//!   never epsilon-based
//! - **Observable Matches**: every trade is broadcast to subscribers and
//!   feeds settlement obligation creation downstream
//!
//! # Invariants
//!
//! - Price-time priority strictly enforced
//! - Conservation of quantity: fills never exceed original quantity
//! - Orders are retained as history, never deleted

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod book;
pub mod engine;
pub mod error;
pub mod events;

// Re-exports
pub use actor::{EngineHandle, MatchingRouter};
pub use book::{BookSnapshot, LevelSnapshot};
pub use engine::{Engine, MarketOutcome, MarketRequest, SubmitReport};
pub use error::{Error, Result};
pub use events::TradeExecuted;
