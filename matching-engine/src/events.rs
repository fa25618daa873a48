//! Trade event feed
//!
//! Every successful match is published to subscribers over a broadcast
//! channel. Delivery is at-least-once from the consumer's point of view
//! (a re-subscribing consumer may replay recent events), so consumers
//! must treat a duplicate trade id as a no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use exchange_core::{CertificateType, Side, Trade};

/// Trade executed event
///
/// The trade id is the stable de-duplication key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeExecuted {
    /// Stable event key
    pub trade_id: Uuid,
    /// Certificate type traded
    pub certificate_type: CertificateType,
    /// Aggressor side
    pub taker_side: Side,
    /// Execution price
    pub price: rust_decimal::Decimal,
    /// Executed quantity
    pub quantity: u64,
    /// Execution timestamp
    pub executed_at: DateTime<Utc>,
    /// Full match record
    pub trade: Trade,
}

impl TradeExecuted {
    /// Build the event from a match record
    pub fn from_trade(trade: Trade, taker_side: Side) -> Self {
        Self {
            trade_id: trade.trade_id,
            certificate_type: trade.certificate_type,
            taker_side,
            price: trade.price,
            quantity: trade.quantity,
            executed_at: trade.executed_at,
            trade,
        }
    }
}
