//! Settlement Engine
//!
//! Tracks each certificate-delivery obligation through the mandated
//! multi-day external-registry cycle.
//!
//! # Architecture
//!
//! A settled trade creates one `Settlement` at `Pending`; due dates for
//! every later stage are computed once from the trade date (T+1 .. T+3
//! business days) and never change. Three collaborators then work the
//! record:
//!
//! 1. **SettlementService**: owns creation, validated transitions, and
//!    queries; the only mutation paths are `advance` and `fail`
//! 2. **SettlementProcessor**: recurring sweep that advances due
//!    settlements via conditional (expected-stage) updates, so
//!    overlapping sweeps are harmless no-ops
//! 3. **SettlementMonitor**: recurring read-only sweep computing health
//!    metrics and tiered alerts (WARNING/ERROR/CRITICAL)
//!
//! # State machine
//!
//! ```text
//! Pending -> TransferInitiated -> InTransit -> AtCustody -> Settled
//!    |              |                 |            |
//!    +------------- fail -----------> Failed <-----+
//! ```
//!
//! `Settled` and `Failed` are terminal; no transition leaves them.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod feed;
pub mod monitoring;
pub mod processor;
pub mod service;
pub mod store;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use monitoring::{
    Alert, AlertCondition, AlertSeverity, DailyReport, MetricsSnapshot, MonitoringReport,
    SettlementMonitor,
};
pub use processor::{SettlementProcessor, SweepStats};
pub use service::{AdvanceOutcome, SettlementEvent, SettlementService};
pub use store::{MemoryStore, SettlementStore};
pub use types::{Settlement, SettlementStage, StageDueDates, TimelineEntry};
