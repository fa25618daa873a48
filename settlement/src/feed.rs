//! Trade feed consumer
//!
//! Bridges the matching engine's trade broadcast into settlement
//! creation. Delivery from the broadcast channel is at-least-once;
//! `SettlementService::create_from_trade` is idempotent on trade id, so
//! a redelivered event is a no-op. Each trade also refreshes the
//! monitor's reference price for the traded certificate type.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use matching_engine::TradeExecuted;

use crate::monitoring::SettlementMonitor;
use crate::service::SettlementService;

/// Consume trade events until the matching engine drops the channel
pub async fn run_trade_feed(
    service: Arc<SettlementService>,
    monitor: Option<Arc<SettlementMonitor>>,
    mut events: broadcast::Receiver<TradeExecuted>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(monitor) = &monitor {
                    monitor
                        .set_reference_price(event.certificate_type, event.price)
                        .await;
                }
                if let Err(e) = service.create_from_trade(&event.trade).await {
                    error!(
                        trade_id = %event.trade_id,
                        error = %e,
                        "Failed to create settlement from trade"
                    );
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                // missed trades settle late; the next sweep alerts on
                // anything that never arrives
                warn!(missed, "Trade feed lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Spawn the feed as a background task
pub fn spawn_trade_feed(
    service: Arc<SettlementService>,
    monitor: Option<Arc<SettlementMonitor>>,
    events: broadcast::Receiver<TradeExecuted>,
) -> JoinHandle<()> {
    tokio::spawn(run_trade_feed(service, monitor, events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{NaiveDate, TimeZone, Utc};
    use exchange_core::{BusinessCalendar, CertificateType, EntityId, Side, Trade};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn sample_trade() -> Trade {
        let executed_at = Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(2024, 1, 8)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
        );
        Trade {
            trade_id: Uuid::new_v4(),
            buy_order_id: Uuid::new_v4(),
            sell_order_id: Uuid::new_v4(),
            buyer: EntityId::new("buyer"),
            seller: EntityId::new("seller"),
            certificate_type: CertificateType::CER,
            price: Decimal::new(1250, 2),
            quantity: 40,
            executed_at,
        }
    }

    #[tokio::test]
    async fn test_duplicate_event_creates_one_settlement() {
        let service = Arc::new(SettlementService::new(
            Arc::new(MemoryStore::new()),
            BusinessCalendar::new(),
        ));
        let (tx, rx) = broadcast::channel(16);
        let feed = spawn_trade_feed(service.clone(), None, rx);

        let event = TradeExecuted::from_trade(sample_trade(), Side::Sell);
        tx.send(event.clone()).unwrap();
        tx.send(event.clone()).unwrap();
        drop(tx);
        feed.await.unwrap();

        let all = service.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].trade_id, event.trade_id);
        assert_eq!(all[0].quantity, 40);
    }
}
