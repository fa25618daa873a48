//! Core types for the brokerage
//!
//! All types are designed for:
//! - Exact arithmetic (Decimal for prices, integer certificate quantities)
//! - Serde round-tripping on every wire-visible type
//! - Memory safety (no unsafe code)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Market participant identifier (broker client / trading entity)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    /// Create new entity ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tradable emission-allowance certificate class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum CertificateType {
    /// EU Allowance
    EUA,
    /// EU Aviation Allowance
    EUAA,
    /// Certified Emission Reduction
    CER,
    /// Verified Emission Reduction
    VER,
}

impl CertificateType {
    /// Registry code
    pub fn code(&self) -> &'static str {
        match self {
            CertificateType::EUA => "EUA",
            CertificateType::EUAA => "EUAA",
            CertificateType::CER => "CER",
            CertificateType::VER => "VER",
        }
    }

    /// Parse from registry code
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "EUA" => Some(CertificateType::EUA),
            "EUAA" => Some(CertificateType::EUAA),
            "CER" => Some(CertificateType::CER),
            "VER" => Some(CertificateType::VER),
            _ => None,
        }
    }
}

impl fmt::Display for CertificateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy certificates
    Buy,
    /// Sell certificates
    Sell,
}

impl Side {
    /// The side this order matches against
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OrderStatus {
    /// Resting, no fills yet
    Open = 1,
    /// Some quantity filled, remainder resting
    PartiallyFilled = 2,
    /// Fully filled (terminal)
    Filled = 3,
    /// Cancelled with quantity remaining (terminal)
    Cancelled = 4,
}

impl OrderStatus {
    /// Terminal statuses admit no further mutation
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

/// A resting or partially-filled intent to buy/sell certificates
/// at a limit price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique order ID
    pub order_id: Uuid,

    /// Owning entity
    pub entity: EntityId,

    /// Buy or sell
    pub side: Side,

    /// Certificate type traded
    pub certificate_type: CertificateType,

    /// Limit price per certificate (exact decimal)
    pub price: Decimal,

    /// Quantity at submission (whole certificates)
    pub original_quantity: u64,

    /// Quantity still unfilled
    pub remaining_quantity: u64,

    /// Current status
    pub status: OrderStatus,

    /// Submission timestamp (time-priority tiebreak)
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Create a validated new order
    pub fn new(
        entity: EntityId,
        side: Side,
        certificate_type: CertificateType,
        price: Decimal,
        quantity: u64,
    ) -> crate::Result<Self> {
        if price <= Decimal::ZERO {
            return Err(crate::Error::Validation(format!(
                "Order price must be positive, got {}",
                price
            )));
        }
        if quantity == 0 {
            return Err(crate::Error::Validation(
                "Order quantity must be positive".to_string(),
            ));
        }

        Ok(Self {
            order_id: Uuid::new_v4(),
            entity,
            side,
            certificate_type,
            price,
            original_quantity: quantity,
            remaining_quantity: quantity,
            status: OrderStatus::Open,
            created_at: Utc::now(),
        })
    }

    /// Apply a fill of `quantity` certificates
    ///
    /// Flips status to PartiallyFilled or Filled. Fails if the order is
    /// terminal or the fill exceeds the remaining quantity (conservation).
    pub fn fill(&mut self, quantity: u64) -> crate::Result<()> {
        if self.status.is_terminal() {
            return Err(crate::Error::InvalidState(format!(
                "Cannot fill order {} in status {:?}",
                self.order_id, self.status
            )));
        }
        if quantity == 0 || quantity > self.remaining_quantity {
            return Err(crate::Error::Validation(format!(
                "Fill of {} invalid for remaining {}",
                quantity, self.remaining_quantity
            )));
        }

        self.remaining_quantity -= quantity;
        self.status = if self.remaining_quantity == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };

        Ok(())
    }

    /// Cancel the order, valid only from Open/PartiallyFilled
    pub fn cancel(&mut self) -> crate::Result<()> {
        if self.status.is_terminal() {
            return Err(crate::Error::InvalidState(format!(
                "Cannot cancel order {} in status {:?}",
                self.order_id, self.status
            )));
        }
        self.status = OrderStatus::Cancelled;
        Ok(())
    }

    /// Quantity filled so far
    pub fn filled_quantity(&self) -> u64 {
        self.original_quantity - self.remaining_quantity
    }

    /// Check if order is in a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Immutable match record between a buy and a sell order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Unique trade ID
    pub trade_id: Uuid,

    /// Buy-side order
    pub buy_order_id: Uuid,

    /// Sell-side order
    pub sell_order_id: Uuid,

    /// Buying entity
    pub buyer: EntityId,

    /// Selling entity (owes certificate delivery)
    pub seller: EntityId,

    /// Certificate type traded
    pub certificate_type: CertificateType,

    /// Execution price (resting order's limit price)
    pub price: Decimal,

    /// Executed quantity (whole certificates)
    pub quantity: u64,

    /// Execution timestamp
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    /// Monetary value of the trade, exact decimal
    pub fn notional(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(side: Side, price: i64, qty: u64) -> Order {
        Order::new(
            EntityId::new("ACME-GmbH"),
            side,
            CertificateType::EUA,
            Decimal::from(price),
            qty,
        )
        .unwrap()
    }

    #[test]
    fn test_certificate_type_from_code() {
        assert_eq!(CertificateType::from_code("EUA"), Some(CertificateType::EUA));
        assert_eq!(CertificateType::from_code("CER"), Some(CertificateType::CER));
        assert_eq!(CertificateType::from_code("XYZ"), None);
    }

    #[test]
    fn test_order_rejects_bad_input() {
        let bad_price = Order::new(
            EntityId::new("A"),
            Side::Buy,
            CertificateType::EUA,
            Decimal::ZERO,
            10,
        );
        assert!(bad_price.is_err());

        let bad_qty = Order::new(
            EntityId::new("A"),
            Side::Buy,
            CertificateType::EUA,
            Decimal::from(10),
            0,
        );
        assert!(bad_qty.is_err());
    }

    #[test]
    fn test_order_fill_lifecycle() {
        let mut o = order(Side::Buy, 10, 100);
        assert_eq!(o.status, OrderStatus::Open);

        o.fill(60).unwrap();
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        assert_eq!(o.remaining_quantity, 40);
        assert_eq!(o.filled_quantity(), 60);

        o.fill(40).unwrap();
        assert_eq!(o.status, OrderStatus::Filled);
        assert!(o.is_terminal());

        // Terminal orders never change
        assert!(o.fill(1).is_err());
        assert!(o.cancel().is_err());
    }

    #[test]
    fn test_fill_cannot_exceed_remaining() {
        let mut o = order(Side::Sell, 10, 50);
        assert!(o.fill(51).is_err());
        assert_eq!(o.remaining_quantity, 50);
        assert_eq!(o.status, OrderStatus::Open);
    }

    #[test]
    fn test_cancel_from_partial() {
        let mut o = order(Side::Sell, 10, 50);
        o.fill(10).unwrap();
        o.cancel().unwrap();
        assert_eq!(o.status, OrderStatus::Cancelled);
        // Quantity frozen at cancellation
        assert_eq!(o.remaining_quantity, 40);
    }

    #[test]
    fn test_trade_notional_exact() {
        let trade = Trade {
            trade_id: Uuid::new_v4(),
            buy_order_id: Uuid::new_v4(),
            sell_order_id: Uuid::new_v4(),
            buyer: EntityId::new("B"),
            seller: EntityId::new("S"),
            certificate_type: CertificateType::EUA,
            price: Decimal::new(1005, 2), // 10.05
            quantity: 3,
            executed_at: Utc::now(),
        };
        assert_eq!(trade.notional(), Decimal::new(3015, 2)); // 30.15
    }
}
