//! Settlement lifecycle service
//!
//! Sole owner of settlement creation and mutation. Every stage change
//! goes through the store's conditional writes, so a stale caller gets
//! a `ConcurrencyConflict` instead of silently double-advancing.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use exchange_core::{BusinessCalendar, Trade};

use crate::error::{Error, Result};
use crate::store::SettlementStore;
use crate::types::{Settlement, SettlementStage, StageDueDates, TimelineEntry};

/// Capacity of the stage-change broadcast channel
const EVENT_CAPACITY: usize = 4096;

/// Stage-change event pushed to subscribers. Delivery is at-least-once;
/// consumers deduplicate on `settlement_id` + `to`.
#[derive(Debug, Clone)]
pub enum SettlementEvent {
    /// A new settlement was created from a trade
    Created {
        /// Settlement created
        settlement_id: Uuid,
        /// Trade that created it
        trade_id: Uuid,
    },
    /// A settlement moved forward one stage
    StageChanged {
        /// Settlement concerned
        settlement_id: Uuid,
        /// Stage left
        from: SettlementStage,
        /// Stage entered
        to: SettlementStage,
        /// When the transition was recorded
        at: DateTime<Utc>,
    },
    /// A settlement was abandoned
    Failed {
        /// Settlement concerned
        settlement_id: Uuid,
        /// Why delivery was abandoned
        reason: String,
        /// When the failure was recorded
        at: DateTime<Utc>,
    },
}

/// Outcome of a conditional advancement attempt
#[derive(Debug, Clone)]
pub enum AdvanceOutcome {
    /// The settlement moved to the next stage
    Advanced(Settlement),
    /// Another writer moved it first; benign for sweep callers
    Conflict {
        /// Stage found at write time
        actual: SettlementStage,
    },
}

/// Creation, transitions and queries for settlements
pub struct SettlementService {
    store: Arc<dyn SettlementStore>,
    calendar: BusinessCalendar,
    events: broadcast::Sender<SettlementEvent>,
}

impl std::fmt::Debug for SettlementService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementService")
            .field("calendar", &self.calendar)
            .finish_non_exhaustive()
    }
}

impl SettlementService {
    /// Create a service over the given store and business calendar
    pub fn new(store: Arc<dyn SettlementStore>, calendar: BusinessCalendar) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            calendar,
            events,
        }
    }

    /// Subscribe to stage-change events
    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.events.subscribe()
    }

    /// Create a settlement for the trade's delivering (selling) side.
    /// Idempotent on `trade_id`: a duplicate trade returns the existing
    /// settlement unchanged.
    pub async fn create_from_trade(&self, trade: &Trade) -> Result<Settlement> {
        if trade.quantity == 0 {
            return Err(Error::Validation(
                "Settlement quantity must be positive".to_string(),
            ));
        }

        if let Some(existing) = self.store.find_by_trade(trade.trade_id).await? {
            debug!(
                trade_id = %trade.trade_id,
                settlement_id = %existing.settlement_id,
                "Duplicate trade event, settlement already exists"
            );
            return Ok(existing);
        }

        let trade_date = trade.executed_at.date_naive();
        let due_dates = StageDueDates::from_trade_date(&self.calendar, trade_date);
        let settlement = Settlement::new(
            trade.trade_id,
            trade.seller.clone(),
            trade.certificate_type,
            trade.quantity,
            trade_date,
            due_dates,
            trade.executed_at,
        );

        self.store.insert(settlement.clone()).await?;

        info!(
            settlement_id = %settlement.settlement_id,
            trade_id = %trade.trade_id,
            certificate_type = %trade.certificate_type.code(),
            quantity = trade.quantity,
            settled_due = %due_dates.settled,
            "Settlement created"
        );

        let _ = self.events.send(SettlementEvent::Created {
            settlement_id: settlement.settlement_id,
            trade_id: trade.trade_id,
        });

        Ok(settlement)
    }

    /// Advance the settlement one stage. Fails with `InvalidTransition`
    /// from a terminal stage or before the next stage's due date has
    /// been reached, and `ConcurrencyConflict` if the stage moved
    /// between read and write.
    pub async fn advance(&self, settlement_id: Uuid, now: DateTime<Utc>) -> Result<Settlement> {
        let current = self.store.get(settlement_id).await?;
        if current.stage.is_terminal() {
            return Err(Error::InvalidTransition {
                settlement_id,
                stage: current.stage,
                detail: "advance from terminal stage".to_string(),
            });
        }
        if !current.is_due(now) {
            return Err(Error::InvalidTransition {
                settlement_id,
                stage: current.stage,
                detail: "not yet due for advancement".to_string(),
            });
        }

        let updated = self.store.advance_if(settlement_id, current.stage, now).await?;

        info!(
            settlement_id = %settlement_id,
            from = %current.stage,
            to = %updated.stage,
            "Settlement advanced"
        );

        let _ = self.events.send(SettlementEvent::StageChanged {
            settlement_id,
            from: current.stage,
            to: updated.stage,
            at: now,
        });

        Ok(updated)
    }

    /// Conditional advancement for sweep callers: advance only if the
    /// settlement is still at `expected`. A lost race comes back as
    /// `Conflict` rather than an error.
    pub async fn advance_expected(
        &self,
        settlement_id: Uuid,
        expected: SettlementStage,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome> {
        match self.store.advance_if(settlement_id, expected, now).await {
            Ok(updated) => {
                let _ = self.events.send(SettlementEvent::StageChanged {
                    settlement_id,
                    from: expected,
                    to: updated.stage,
                    at: now,
                });
                Ok(AdvanceOutcome::Advanced(updated))
            }
            Err(Error::ConcurrencyConflict { actual, .. }) => {
                Ok(AdvanceOutcome::Conflict { actual })
            }
            Err(e) => Err(e),
        }
    }

    /// Mark the settlement failed. Idempotent if already failed; fails
    /// with `InvalidTransition` if already settled.
    pub async fn fail(
        &self,
        settlement_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Settlement> {
        let current = self.store.get(settlement_id).await?;
        match current.stage {
            SettlementStage::Failed => return Ok(current),
            SettlementStage::Settled => {
                return Err(Error::InvalidTransition {
                    settlement_id,
                    stage: current.stage,
                    detail: "fail after settlement completed".to_string(),
                });
            }
            _ => {}
        }

        let updated = self
            .store
            .fail_if(settlement_id, current.stage, reason, now)
            .await?;

        warn!(
            settlement_id = %settlement_id,
            from = %current.stage,
            reason = %reason,
            "Settlement failed"
        );

        let _ = self.events.send(SettlementEvent::Failed {
            settlement_id,
            reason: reason.to_string(),
            at: now,
        });

        Ok(updated)
    }

    /// Fetch one settlement
    pub async fn get(&self, settlement_id: Uuid) -> Result<Settlement> {
        self.store.get(settlement_id).await
    }

    /// Fetch the settlement created by a trade, if any
    pub async fn by_trade(&self, trade_id: Uuid) -> Result<Option<Settlement>> {
        self.store.find_by_trade(trade_id).await
    }

    /// Derived due-date/entry timeline for one settlement
    pub async fn timeline(&self, settlement_id: Uuid) -> Result<Vec<TimelineEntry>> {
        Ok(self.store.get(settlement_id).await?.timeline())
    }

    /// All non-terminal settlements, most overdue first (current due
    /// date ascending)
    pub async fn list_pending(&self) -> Result<Vec<Settlement>> {
        let mut open = self.store.list_open().await?;
        open.sort_by(|a, b| {
            a.current_due_date()
                .cmp(&b.current_due_date())
                .then(a.settlement_id.cmp(&b.settlement_id))
        });
        Ok(open)
    }

    /// One page of `list_pending`
    pub async fn list_pending_page(&self, offset: usize, limit: usize) -> Result<Vec<Settlement>> {
        Ok(self
            .list_pending()
            .await?
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    /// All settlements regardless of stage
    pub async fn list_all(&self) -> Result<Vec<Settlement>> {
        self.store.list_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{NaiveDate, TimeZone};
    use exchange_core::{CertificateType, EntityId};
    use rust_decimal::Decimal;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap(),
        )
    }

    fn trade(executed_at: DateTime<Utc>) -> Trade {
        Trade {
            trade_id: Uuid::new_v4(),
            buy_order_id: Uuid::new_v4(),
            sell_order_id: Uuid::new_v4(),
            buyer: EntityId::new("buyer"),
            seller: EntityId::new("seller"),
            certificate_type: CertificateType::EUA,
            price: Decimal::new(8550, 2),
            quantity: 100,
            executed_at,
        }
    }

    fn service() -> SettlementService {
        SettlementService::new(Arc::new(MemoryStore::new()), BusinessCalendar::new())
    }

    #[tokio::test]
    async fn test_create_from_trade_assigns_seller_and_due_dates() {
        let svc = service();
        // Friday trade
        let t = trade(at(2024, 1, 5, 14));
        let s = svc.create_from_trade(&t).await.unwrap();

        assert_eq!(s.entity.as_str(), "seller");
        assert_eq!(s.stage, SettlementStage::Pending);
        assert_eq!(
            s.due_dates.transfer_initiated,
            NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()
        );
        assert_eq!(
            s.due_dates.settled,
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
        );
    }

    #[tokio::test]
    async fn test_create_from_trade_is_idempotent() {
        let svc = service();
        let t = trade(at(2024, 1, 8, 10));

        let first = svc.create_from_trade(&t).await.unwrap();
        let second = svc.create_from_trade(&t).await.unwrap();
        assert_eq!(first.settlement_id, second.settlement_id);
        assert_eq!(svc.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_advance_walks_full_lifecycle() {
        let svc = service();
        let t = trade(at(2024, 1, 8, 10));
        let s = svc.create_from_trade(&t).await.unwrap();

        let stages = [
            SettlementStage::TransferInitiated,
            SettlementStage::InTransit,
            SettlementStage::AtCustody,
            SettlementStage::Settled,
        ];
        for (i, expected) in stages.iter().enumerate() {
            let updated = svc
                .advance(s.settlement_id, at(2024, 1, 9 + i as u32, 9))
                .await
                .unwrap();
            assert_eq!(updated.stage, *expected);
        }

        let finished = svc.get(s.settlement_id).await.unwrap();
        assert!(finished.settled_at.is_some());

        let err = svc
            .advance(s.settlement_id, at(2024, 1, 15, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_advance_before_due_date_rejected() {
        let svc = service();
        // Monday trade: Pending due for TransferInitiated on Tuesday
        let t = trade(at(2024, 1, 8, 10));
        let s = svc.create_from_trade(&t).await.unwrap();

        let err = svc
            .advance(s.settlement_id, at(2024, 1, 8, 16))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(
            svc.get(s.settlement_id).await.unwrap().stage,
            SettlementStage::Pending
        );

        // on the due date the same call succeeds
        let updated = svc.advance(s.settlement_id, at(2024, 1, 9, 9)).await.unwrap();
        assert_eq!(updated.stage, SettlementStage::TransferInitiated);
    }

    #[tokio::test]
    async fn test_advance_expected_reports_conflict_not_error() {
        let svc = service();
        let t = trade(at(2024, 1, 8, 10));
        let s = svc.create_from_trade(&t).await.unwrap();
        svc.advance(s.settlement_id, at(2024, 1, 9, 9)).await.unwrap();

        // a sweep still holding the Pending observation loses quietly
        let outcome = svc
            .advance_expected(s.settlement_id, SettlementStage::Pending, at(2024, 1, 9, 9))
            .await
            .unwrap();
        match outcome {
            AdvanceOutcome::Conflict { actual } => {
                assert_eq!(actual, SettlementStage::TransferInitiated)
            }
            AdvanceOutcome::Advanced(_) => panic!("stale expectation must not advance"),
        }
    }

    #[tokio::test]
    async fn test_fail_is_idempotent_but_not_from_settled() {
        let svc = service();
        let t = trade(at(2024, 1, 8, 10));
        let s = svc.create_from_trade(&t).await.unwrap();

        let failed = svc
            .fail(s.settlement_id, "registry rejected transfer", at(2024, 1, 9, 9))
            .await
            .unwrap();
        assert_eq!(failed.stage, SettlementStage::Failed);
        assert_eq!(
            failed.failure_reason.as_deref(),
            Some("registry rejected transfer")
        );

        // second fail is a no-op
        let again = svc
            .fail(s.settlement_id, "other reason", at(2024, 1, 9, 10))
            .await
            .unwrap();
        assert_eq!(
            again.failure_reason.as_deref(),
            Some("registry rejected transfer")
        );
    }

    #[tokio::test]
    async fn test_list_pending_orders_most_overdue_first() {
        let svc = service();
        let early = trade(at(2024, 1, 1, 10)); // Monday, due T+1 = Jan 2
        let late = trade(at(2024, 1, 8, 10)); // Monday, due T+1 = Jan 9

        let late_s = svc.create_from_trade(&late).await.unwrap();
        let early_s = svc.create_from_trade(&early).await.unwrap();

        let pending = svc.list_pending().await.unwrap();
        assert_eq!(pending[0].settlement_id, early_s.settlement_id);
        assert_eq!(pending[1].settlement_id, late_s.settlement_id);

        let page = svc.list_pending_page(1, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].settlement_id, late_s.settlement_id);
    }

    #[tokio::test]
    async fn test_events_published_on_transitions() {
        let svc = service();
        let mut rx = svc.subscribe();
        let t = trade(at(2024, 1, 8, 10));
        let s = svc.create_from_trade(&t).await.unwrap();
        svc.advance(s.settlement_id, at(2024, 1, 9, 9)).await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            SettlementEvent::Created { .. }
        ));
        match rx.recv().await.unwrap() {
            SettlementEvent::StageChanged { from, to, .. } => {
                assert_eq!(from, SettlementStage::Pending);
                assert_eq!(to, SettlementStage::TransferInitiated);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_quantity_trade_rejected() {
        let svc = service();
        let mut t = trade(at(2024, 1, 8, 10));
        t.quantity = 0;
        let err = svc.create_from_trade(&t).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
