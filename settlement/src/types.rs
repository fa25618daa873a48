//! Core types for the settlement engine

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use exchange_core::{BusinessCalendar, CertificateType, EntityId};

/// Delivery cycle stage, strictly ordered, no skipping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SettlementStage {
    /// Obligation recorded, registry transfer not yet started
    Pending = 1,
    /// Transfer instructed at the external registry (due T+1)
    TransferInitiated = 2,
    /// Certificates moving between registry accounts (due T+2)
    InTransit = 3,
    /// Certificates arrived at the custody account (due T+3)
    AtCustody = 4,
    /// Delivery complete (terminal, due T+3)
    Settled = 5,
    /// Delivery abandoned (terminal, reachable from any non-terminal stage)
    Failed = 6,
}

impl SettlementStage {
    /// The single next stage in the fixed order; None for terminals
    pub fn next(&self) -> Option<SettlementStage> {
        match self {
            SettlementStage::Pending => Some(SettlementStage::TransferInitiated),
            SettlementStage::TransferInitiated => Some(SettlementStage::InTransit),
            SettlementStage::InTransit => Some(SettlementStage::AtCustody),
            SettlementStage::AtCustody => Some(SettlementStage::Settled),
            SettlementStage::Settled | SettlementStage::Failed => None,
        }
    }

    /// Terminal stages admit no further mutation
    pub fn is_terminal(&self) -> bool {
        matches!(self, SettlementStage::Settled | SettlementStage::Failed)
    }
}

impl fmt::Display for SettlementStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettlementStage::Pending => "PENDING",
            SettlementStage::TransferInitiated => "TRANSFER_INITIATED",
            SettlementStage::InTransit => "IN_TRANSIT",
            SettlementStage::AtCustody => "AT_CUSTODY",
            SettlementStage::Settled => "SETTLED",
            SettlementStage::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

/// Due dates for reaching each stage, in business days from the trade
/// date. Computed once at creation, immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDueDates {
    /// Transfer instructed by T+1
    pub transfer_initiated: NaiveDate,
    /// In transit by T+2
    pub in_transit: NaiveDate,
    /// At custody by T+3
    pub at_custody: NaiveDate,
    /// Settled by T+3
    pub settled: NaiveDate,
}

impl StageDueDates {
    /// Compute the four due dates from the trade date
    pub fn from_trade_date(calendar: &BusinessCalendar, trade_date: NaiveDate) -> Self {
        Self {
            transfer_initiated: calendar.add_business_days(trade_date, 1),
            in_transit: calendar.add_business_days(trade_date, 2),
            at_custody: calendar.add_business_days(trade_date, 3),
            settled: calendar.add_business_days(trade_date, 3),
        }
    }

    /// Due date for reaching `stage`; None for Pending (the starting
    /// point) and Failed
    pub fn for_stage(&self, stage: SettlementStage) -> Option<NaiveDate> {
        match stage {
            SettlementStage::Pending | SettlementStage::Failed => None,
            SettlementStage::TransferInitiated => Some(self.transfer_initiated),
            SettlementStage::InTransit => Some(self.in_transit),
            SettlementStage::AtCustody => Some(self.at_custody),
            SettlementStage::Settled => Some(self.settled),
        }
    }
}

/// Timestamped record of a stage entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEntry {
    /// Stage entered
    pub stage: SettlementStage,
    /// When it was entered
    pub at: DateTime<Utc>,
}

/// One row of a settlement's derived timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Stage in delivery order
    pub stage: SettlementStage,
    /// Deadline for reaching the stage, if one applies
    pub due_date: Option<NaiveDate>,
    /// When the stage was actually entered, if it has been
    pub entered_at: Option<DateTime<Utc>>,
}

/// One external-registry delivery obligation created by a trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    /// Unique settlement ID
    pub settlement_id: Uuid,

    /// Trade that created the obligation (idempotency key)
    pub trade_id: Uuid,

    /// Entity owing the delivery (trade's selling side)
    pub entity: EntityId,

    /// Certificate type to deliver
    pub certificate_type: CertificateType,

    /// Certificates to deliver
    pub quantity: u64,

    /// Trade date (T+0)
    pub trade_date: NaiveDate,

    /// Per-stage due dates, fixed at creation
    pub due_dates: StageDueDates,

    /// Current stage
    pub stage: SettlementStage,

    /// When the current stage was entered
    pub stage_entered_at: DateTime<Utc>,

    /// Stage entries so far, in order (timeline source)
    pub history: Vec<StageEntry>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// When the settlement reached Settled
    pub settled_at: Option<DateTime<Utc>>,

    /// Why the settlement failed, when it did
    pub failure_reason: Option<String>,
}

impl Settlement {
    /// Create a new settlement at Pending
    pub fn new(
        trade_id: Uuid,
        entity: EntityId,
        certificate_type: CertificateType,
        quantity: u64,
        trade_date: NaiveDate,
        due_dates: StageDueDates,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            settlement_id: Uuid::new_v4(),
            trade_id,
            entity,
            certificate_type,
            quantity,
            trade_date,
            due_dates,
            stage: SettlementStage::Pending,
            stage_entered_at: created_at,
            history: vec![StageEntry {
                stage: SettlementStage::Pending,
                at: created_at,
            }],
            created_at,
            settled_at: None,
            failure_reason: None,
        }
    }

    /// Check if the settlement is in a terminal stage
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Deadline governing the current stage: the due date for reaching
    /// the next one. None when terminal.
    pub fn current_due_date(&self) -> Option<NaiveDate> {
        self.due_dates.for_stage(self.stage.next()?)
    }

    /// Whether the current stage's deadline has been reached (the
    /// processor advances due settlements)
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.current_due_date()
            .is_some_and(|due| now.date_naive() >= due)
    }

    /// Days past the current stage's deadline; zero or negative when on
    /// schedule or terminal
    pub fn days_overdue(&self, now: DateTime<Utc>) -> i64 {
        match self.current_due_date() {
            Some(due) => (now.date_naive() - due).num_days(),
            None => 0,
        }
    }

    /// A non-terminal settlement at least one day past its deadline
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.days_overdue(now) >= 1
    }

    /// Derived timeline: every stage in order with its due date and
    /// actual entry timestamp. No separate storage.
    pub fn timeline(&self) -> Vec<TimelineEntry> {
        let stages = [
            SettlementStage::Pending,
            SettlementStage::TransferInitiated,
            SettlementStage::InTransit,
            SettlementStage::AtCustody,
            SettlementStage::Settled,
        ];

        let mut entries: Vec<TimelineEntry> = stages
            .into_iter()
            .map(|stage| TimelineEntry {
                stage,
                due_date: self.due_dates.for_stage(stage),
                entered_at: self
                    .history
                    .iter()
                    .find(|e| e.stage == stage)
                    .map(|e| e.at),
            })
            .collect();

        if self.stage == SettlementStage::Failed {
            entries.push(TimelineEntry {
                stage: SettlementStage::Failed,
                due_date: None,
                entered_at: Some(self.stage_entered_at),
            });
        }

        entries
    }
}
