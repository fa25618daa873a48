//! CertMark Exchange Core
//!
//! Shared domain types for the emission-allowance brokerage:
//! orders and trades, certificate types, and the business-day
//! calendar that drives settlement due dates.
//!
//! # Invariants
//!
//! - Quantity conservation: `remaining_quantity = original_quantity - filled`
//! - Certificates are whole units; quantities are integers, never fractional
//! - Prices and notional values use exact decimal arithmetic (no floats)
//! - Orders are never deleted; terminal orders are retained as history

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod calendar;
pub mod error;
pub mod types;

// Re-exports
pub use calendar::BusinessCalendar;
pub use error::{Error, Result};
pub use types::{CertificateType, EntityId, Order, OrderStatus, Side, Trade};
