//! Recurring settlement advancement sweep
//!
//! Scans open settlements and advances each one whose current-stage
//! due date has elapsed. The sweep is idempotent and safe under
//! overlap: advancement is a conditional write keyed on the stage the
//! sweep observed, so when two sweeps race over the same settlement
//! exactly one wins and the loser records a benign conflict.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::ProcessorConfig;
use crate::error::Error;
use crate::service::{AdvanceOutcome, SettlementService};

/// Outcome counters for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Open settlements scanned
    pub scanned: usize,
    /// Settlements advanced one stage
    pub advanced: usize,
    /// Benign optimistic-write losses (another sweep advanced first)
    pub conflicts: usize,
    /// Scanned settlements not yet due
    pub skipped: usize,
    /// Settlements skipped on a transient error, retried next sweep
    pub errors: usize,
}

/// Scheduled advancement task over a settlement service
#[derive(Debug)]
pub struct SettlementProcessor {
    service: Arc<SettlementService>,
    config: ProcessorConfig,
}

impl SettlementProcessor {
    /// Create a processor over the service
    pub fn new(service: Arc<SettlementService>, config: ProcessorConfig) -> Self {
        Self { service, config }
    }

    /// Run a single sweep at the given instant. Advances each due
    /// settlement at most one stage; a settlement due for several
    /// stages catches up over successive sweeps.
    pub async fn run_once(&self, now: chrono::DateTime<Utc>) -> SweepStats {
        let open = match self.service.list_pending().await {
            Ok(open) => open,
            Err(e) => {
                error!(error = %e, "Sweep aborted: could not list open settlements");
                return SweepStats {
                    errors: 1,
                    ..SweepStats::default()
                };
            }
        };

        let mut stats = SweepStats {
            scanned: open.len(),
            ..SweepStats::default()
        };

        for settlement in open {
            if !settlement.is_due(now) {
                stats.skipped += 1;
                continue;
            }

            // conditional on the stage observed during the scan
            match self
                .service
                .advance_expected(settlement.settlement_id, settlement.stage, now)
                .await
            {
                Ok(AdvanceOutcome::Advanced(updated)) => {
                    stats.advanced += 1;
                    debug!(
                        settlement_id = %settlement.settlement_id,
                        stage = %updated.stage,
                        "Sweep advanced settlement"
                    );
                }
                Ok(AdvanceOutcome::Conflict { actual }) => {
                    // another sweep got there first
                    stats.conflicts += 1;
                    debug!(
                        settlement_id = %settlement.settlement_id,
                        actual = %actual,
                        "Sweep lost advancement race"
                    );
                }
                Err(Error::InvalidTransition { .. }) => {
                    // turned terminal between listing and advancing
                    stats.conflicts += 1;
                }
                Err(e) => {
                    stats.errors += 1;
                    error!(
                        settlement_id = %settlement.settlement_id,
                        error = %e,
                        "Sweep step failed, will retry next sweep"
                    );
                }
            }
        }

        if stats.advanced > 0 || stats.errors > 0 {
            info!(
                scanned = stats.scanned,
                advanced = stats.advanced,
                conflicts = stats.conflicts,
                errors = stats.errors,
                "Settlement sweep complete"
            );
        }

        stats
    }

    /// Spawn the recurring sweep on its configured interval
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.sweep_interval_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_once(Utc::now()).await;
            }
        })
    }
}
