//! Settlement persistence
//!
//! The store is the concurrency boundary: `advance_if` and `fail_if`
//! are conditional writes that only apply when the caller's observed
//! stage still matches, executed under a single write guard.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Settlement, SettlementStage, StageEntry};

/// Storage abstraction for settlements
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Insert a new settlement. Rejects a second settlement for the
    /// same trade.
    async fn insert(&self, settlement: Settlement) -> Result<()>;

    /// Fetch a settlement by id
    async fn get(&self, settlement_id: Uuid) -> Result<Settlement>;

    /// Fetch the settlement created by a trade, if one exists
    async fn find_by_trade(&self, trade_id: Uuid) -> Result<Option<Settlement>>;

    /// All settlements, ordered by creation time then id for stable
    /// pagination
    async fn list_all(&self) -> Result<Vec<Settlement>>;

    /// Non-terminal settlements only, same ordering as `list_all`
    async fn list_open(&self) -> Result<Vec<Settlement>>;

    /// Advance to the next stage only if the settlement is still at
    /// `expected`. Returns the updated settlement, or
    /// `ConcurrencyConflict` when another writer got there first.
    async fn advance_if(
        &self,
        settlement_id: Uuid,
        expected: SettlementStage,
        now: DateTime<Utc>,
    ) -> Result<Settlement>;

    /// Mark the settlement failed only if it is still at `expected`
    async fn fail_if(
        &self,
        settlement_id: Uuid,
        expected: SettlementStage,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Settlement>;
}

/// In-memory store backed by a [`tokio::sync::RwLock`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    settlements: Arc<RwLock<HashMap<Uuid, Settlement>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn insert(&self, settlement: Settlement) -> Result<()> {
        let mut guard = self.settlements.write().await;
        if guard
            .values()
            .any(|s| s.trade_id == settlement.trade_id)
        {
            return Err(Error::Validation(format!(
                "Settlement already exists for trade {}",
                settlement.trade_id
            )));
        }
        guard.insert(settlement.settlement_id, settlement);
        Ok(())
    }

    async fn get(&self, settlement_id: Uuid) -> Result<Settlement> {
        self.settlements
            .read()
            .await
            .get(&settlement_id)
            .cloned()
            .ok_or(Error::NotFound(settlement_id))
    }

    async fn find_by_trade(&self, trade_id: Uuid) -> Result<Option<Settlement>> {
        Ok(self
            .settlements
            .read()
            .await
            .values()
            .find(|s| s.trade_id == trade_id)
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<Settlement>> {
        let mut all: Vec<Settlement> =
            self.settlements.read().await.values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.settlement_id.cmp(&b.settlement_id))
        });
        Ok(all)
    }

    async fn list_open(&self) -> Result<Vec<Settlement>> {
        let mut open = self.list_all().await?;
        open.retain(|s| !s.is_terminal());
        Ok(open)
    }

    async fn advance_if(
        &self,
        settlement_id: Uuid,
        expected: SettlementStage,
        now: DateTime<Utc>,
    ) -> Result<Settlement> {
        let mut guard = self.settlements.write().await;
        let settlement = guard
            .get_mut(&settlement_id)
            .ok_or(Error::NotFound(settlement_id))?;

        if settlement.stage != expected {
            return Err(Error::ConcurrencyConflict {
                settlement_id,
                expected,
                actual: settlement.stage,
            });
        }

        let next = expected.next().ok_or_else(|| Error::InvalidTransition {
            settlement_id,
            stage: expected,
            detail: "advance from terminal stage".to_string(),
        })?;

        settlement.stage = next;
        settlement.stage_entered_at = now;
        settlement.history.push(StageEntry { stage: next, at: now });
        if next == SettlementStage::Settled {
            settlement.settled_at = Some(now);
        }

        Ok(settlement.clone())
    }

    async fn fail_if(
        &self,
        settlement_id: Uuid,
        expected: SettlementStage,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Settlement> {
        let mut guard = self.settlements.write().await;
        let settlement = guard
            .get_mut(&settlement_id)
            .ok_or(Error::NotFound(settlement_id))?;

        if settlement.stage != expected {
            return Err(Error::ConcurrencyConflict {
                settlement_id,
                expected,
                actual: settlement.stage,
            });
        }

        if expected.is_terminal() {
            return Err(Error::InvalidTransition {
                settlement_id,
                stage: expected,
                detail: "fail from terminal stage".to_string(),
            });
        }

        settlement.stage = SettlementStage::Failed;
        settlement.stage_entered_at = now;
        settlement.history.push(StageEntry {
            stage: SettlementStage::Failed,
            at: now,
        });
        settlement.failure_reason = Some(reason.to_string());

        Ok(settlement.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StageDueDates;
    use chrono::{NaiveDate, TimeZone};
    use exchange_core::{BusinessCalendar, CertificateType, EntityId};

    fn sample(created_at: DateTime<Utc>) -> Settlement {
        let trade_date = created_at.date_naive();
        let calendar = BusinessCalendar::new();
        Settlement::new(
            Uuid::new_v4(),
            EntityId::new("seller"),
            CertificateType::EUA,
            50,
            trade_date,
            StageDueDates::from_trade_date(&calendar, trade_date),
            created_at,
        )
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_trade() {
        let store = MemoryStore::new();
        let first = sample(at(2024, 1, 8, 10));
        let mut second = sample(at(2024, 1, 8, 11));
        second.trade_id = first.trade_id;

        store.insert(first).await.unwrap();
        let err = store.insert(second).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_advance_if_stage_mismatch_conflicts() {
        let store = MemoryStore::new();
        let s = sample(at(2024, 1, 8, 10));
        let id = s.settlement_id;
        store.insert(s).await.unwrap();

        let advanced = store
            .advance_if(id, SettlementStage::Pending, at(2024, 1, 9, 9))
            .await
            .unwrap();
        assert_eq!(advanced.stage, SettlementStage::TransferInitiated);

        // stale expectation loses
        let err = store
            .advance_if(id, SettlementStage::Pending, at(2024, 1, 9, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConcurrencyConflict { .. }));
    }

    #[tokio::test]
    async fn test_advance_from_terminal_rejected() {
        let store = MemoryStore::new();
        let mut s = sample(at(2024, 1, 8, 10));
        s.stage = SettlementStage::Settled;
        let id = s.settlement_id;
        store.insert(s).await.unwrap();

        let err = store
            .advance_if(id, SettlementStage::Settled, at(2024, 1, 9, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_list_all_orders_by_creation() {
        let store = MemoryStore::new();
        let older = sample(at(2024, 1, 8, 9));
        let newer = sample(at(2024, 1, 8, 15));
        let older_id = older.settlement_id;
        store.insert(newer).await.unwrap();
        store.insert(older).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].settlement_id, older_id);
    }

    #[tokio::test]
    async fn test_list_open_excludes_terminal() {
        let store = MemoryStore::new();
        let open = sample(at(2024, 1, 8, 9));
        let failed = sample(at(2024, 1, 8, 10));
        let failed_id = failed.settlement_id;
        store.insert(open).await.unwrap();
        store.insert(failed).await.unwrap();
        store
            .fail_if(
                failed_id,
                SettlementStage::Pending,
                "registry rejected transfer",
                at(2024, 1, 8, 11),
            )
            .await
            .unwrap();

        let open = store.list_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_ne!(open[0].settlement_id, failed_id);
    }
}
