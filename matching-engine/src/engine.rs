//! Matching engine core
//!
//! One `Engine` instance owns one certificate type: its two-sided book
//! plus an arena of every order ever submitted for the instrument.
//! Matching is price-time priority; execution price is always the
//! resting order's limit price.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use exchange_core::{CertificateType, EntityId, Order, OrderStatus, Side, Trade};

use crate::book::{BookSnapshot, OrderBook};
use crate::{Error, Result};

/// Matching engine for a single certificate type
#[derive(Debug)]
pub struct Engine {
    certificate_type: CertificateType,
    book: OrderBook,
    /// Every order ever submitted, retained as history
    orders: HashMap<Uuid, Order>,
}

/// Outcome of a limit order submission
#[derive(Debug, Clone)]
pub struct SubmitReport {
    /// Id of the submitted order
    pub order_id: Uuid,
    /// Status after matching (Open = fully resting)
    pub status: OrderStatus,
    /// Unfilled quantity resting in the book
    pub remaining_quantity: u64,
    /// Trades executed against resting orders, in match order
    pub trades: Vec<Trade>,
}

/// Market-style execution request
#[derive(Debug, Clone, Copy)]
pub enum MarketRequest {
    /// Take up to this many certificates at best available prices
    Quantity(u64),
    /// Spend up to this notional amount at best available prices
    Notional(Decimal),
}

/// Synchronous report of a market-style execution
#[derive(Debug, Clone)]
pub struct MarketOutcome {
    /// Historical order record id (None when nothing filled)
    pub order_id: Option<Uuid>,
    /// Trades executed, best price first
    pub trades: Vec<Trade>,
    /// Certificates acquired or sold
    pub quantity_filled: u64,
    /// Exact notional across all fills
    pub notional_spent: Decimal,
    /// True when the book ran out of liquidity before the request
    /// was exhausted
    pub partial: bool,
}

impl Engine {
    /// Create an engine with an empty book
    pub fn new(certificate_type: CertificateType) -> Self {
        Self {
            certificate_type,
            book: OrderBook::new(),
            orders: HashMap::new(),
        }
    }

    /// Certificate type this engine owns
    pub fn certificate_type(&self) -> CertificateType {
        self.certificate_type
    }

    /// Submit a limit order: match immediately, rest any remainder
    ///
    /// Matching walks the opposing side best price first, FIFO within a
    /// level, trading `min(remaining_incoming, remaining_resting)` at the
    /// resting price while the incoming price crosses. Self-matching
    /// between orders of the same entity is permitted (broker model).
    pub fn submit(&mut self, mut order: Order) -> Result<SubmitReport> {
        if order.certificate_type != self.certificate_type {
            return Err(Error::Validation(format!(
                "Order is for {}, engine trades {}",
                order.certificate_type, self.certificate_type
            )));
        }
        if order.status != OrderStatus::Open
            || order.remaining_quantity != order.original_quantity
        {
            return Err(Error::Validation(format!(
                "Order {} already worked elsewhere",
                order.order_id
            )));
        }

        let mut trades = Vec::new();

        while order.remaining_quantity > 0 {
            let Some((resting_price, resting_id, resting_remaining)) =
                self.book.best_opposing(order.side)
            else {
                break;
            };

            let crosses = match order.side {
                Side::Buy => order.price >= resting_price,
                Side::Sell => order.price <= resting_price,
            };
            if !crosses {
                break;
            }

            let quantity = order.remaining_quantity.min(resting_remaining);

            // Book and arena must agree before any mutation; a mismatch
            // would corrupt quantity conservation.
            let Some(resting) = self.orders.get_mut(&resting_id) else {
                return Err(Error::InvariantViolation(format!(
                    "Resting order {} in book but not in arena",
                    resting_id
                )));
            };
            if resting.remaining_quantity != resting_remaining {
                return Err(Error::InvariantViolation(format!(
                    "Order {} remaining {} disagrees with book level {}",
                    resting_id, resting.remaining_quantity, resting_remaining
                )));
            }

            resting
                .fill(quantity)
                .map_err(|e| Error::InvariantViolation(e.to_string()))?;
            order
                .fill(quantity)
                .map_err(|e| Error::InvariantViolation(e.to_string()))?;

            let (buy_order_id, sell_order_id, buyer, seller) = match order.side {
                Side::Buy => (
                    order.order_id,
                    resting_id,
                    order.entity.clone(),
                    resting.entity.clone(),
                ),
                Side::Sell => (
                    resting_id,
                    order.order_id,
                    resting.entity.clone(),
                    order.entity.clone(),
                ),
            };

            if !self.book.fill_best_opposing(order.side, quantity) {
                return Err(Error::InvariantViolation(
                    "Book level rejected fill applied to arena".to_string(),
                ));
            }

            trades.push(Trade {
                trade_id: Uuid::new_v4(),
                buy_order_id,
                sell_order_id,
                buyer,
                seller,
                certificate_type: self.certificate_type,
                price: resting_price,
                quantity,
                executed_at: Utc::now(),
            });
        }

        // Conservation: fills plus remainder must account for the
        // original quantity exactly.
        let executed: u64 = trades.iter().map(|t| t.quantity).sum();
        if executed + order.remaining_quantity != order.original_quantity {
            return Err(Error::InvariantViolation(format!(
                "Order {}: executed {} + remaining {} != original {}",
                order.order_id, executed, order.remaining_quantity, order.original_quantity
            )));
        }

        if order.remaining_quantity > 0 {
            self.book
                .insert(order.side, order.price, order.order_id, order.remaining_quantity);
        }

        debug!(
            order_id = %order.order_id,
            side = %order.side,
            trades = trades.len(),
            remaining = order.remaining_quantity,
            "Order submitted"
        );

        let report = SubmitReport {
            order_id: order.order_id,
            status: order.status,
            remaining_quantity: order.remaining_quantity,
            trades,
        };
        self.orders.insert(order.order_id, order);

        Ok(report)
    }

    /// Market-style execution: walk price levels best-first until the
    /// requested quantity or notional budget is exhausted or the book
    /// empties, and report whether the fill was partial
    pub fn submit_market(
        &mut self,
        entity: EntityId,
        side: Side,
        request: MarketRequest,
    ) -> Result<MarketOutcome> {
        match request {
            MarketRequest::Quantity(0) => {
                return Err(Error::Validation(
                    "Market quantity must be positive".to_string(),
                ))
            }
            MarketRequest::Notional(n) if n <= Decimal::ZERO => {
                return Err(Error::Validation(format!(
                    "Market notional must be positive, got {}",
                    n
                )))
            }
            _ => {}
        }

        let taker_order_id = Uuid::new_v4();
        let mut trades = Vec::new();
        let mut filled = 0u64;
        let mut spent = Decimal::ZERO;
        let mut worst_price = None;
        let mut exhausted_book = false;

        loop {
            let Some((resting_price, resting_id, resting_remaining)) =
                self.book.best_opposing(side)
            else {
                exhausted_book = true;
                break;
            };

            let take = match request {
                MarketRequest::Quantity(wanted) => (wanted - filled).min(resting_remaining),
                MarketRequest::Notional(budget) => {
                    let affordable = ((budget - spent) / resting_price)
                        .trunc()
                        .to_u64()
                        .unwrap_or(0);
                    affordable.min(resting_remaining)
                }
            };
            if take == 0 {
                // Request exhausted (quantity filled, or budget below one
                // certificate at the current best price)
                break;
            }

            let Some(resting) = self.orders.get_mut(&resting_id) else {
                return Err(Error::InvariantViolation(format!(
                    "Resting order {} in book but not in arena",
                    resting_id
                )));
            };
            resting
                .fill(take)
                .map_err(|e| Error::InvariantViolation(e.to_string()))?;

            let (buy_order_id, sell_order_id, buyer, seller) = match side {
                Side::Buy => (
                    taker_order_id,
                    resting_id,
                    entity.clone(),
                    resting.entity.clone(),
                ),
                Side::Sell => (
                    resting_id,
                    taker_order_id,
                    resting.entity.clone(),
                    entity.clone(),
                ),
            };

            if !self.book.fill_best_opposing(side, take) {
                return Err(Error::InvariantViolation(
                    "Book level rejected fill applied to arena".to_string(),
                ));
            }

            filled += take;
            spent += resting_price * Decimal::from(take);
            worst_price = Some(resting_price);

            trades.push(Trade {
                trade_id: Uuid::new_v4(),
                buy_order_id,
                sell_order_id,
                buyer,
                seller,
                certificate_type: self.certificate_type,
                price: resting_price,
                quantity: take,
                executed_at: Utc::now(),
            });
        }

        let partial = match request {
            MarketRequest::Quantity(wanted) => filled < wanted,
            // Notional requests complete when the leftover budget cannot
            // buy one certificate; running the book dry first is partial.
            MarketRequest::Notional(_) => exhausted_book,
        };

        // Record the taker as a filled historical order
        let order_id = worst_price.map(|price| {
            let record = Order {
                order_id: taker_order_id,
                entity,
                side,
                certificate_type: self.certificate_type,
                price,
                original_quantity: filled,
                remaining_quantity: 0,
                status: OrderStatus::Filled,
                created_at: Utc::now(),
            };
            self.orders.insert(taker_order_id, record);
            taker_order_id
        });

        debug!(
            side = %side,
            filled,
            %spent,
            partial,
            "Market execution complete"
        );

        Ok(MarketOutcome {
            order_id,
            trades,
            quantity_filled: filled,
            notional_spent: spent,
            partial,
        })
    }

    /// Cancel an order, removing its remaining quantity from the book
    ///
    /// Fails with `InvalidState` if the order is already filled or
    /// cancelled; the book and order are untouched on failure.
    pub fn cancel(&mut self, order_id: Uuid) -> Result<Order> {
        let (side, price, terminal) = {
            let order = self
                .orders
                .get(&order_id)
                .ok_or(Error::UnknownOrder(order_id))?;
            (order.side, order.price, order.is_terminal())
        };
        if terminal {
            return Err(Error::InvalidState(format!(
                "Order {} already terminal",
                order_id
            )));
        }

        self.book.remove(side, price, order_id);

        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(Error::UnknownOrder(order_id))?;
        order.cancel()?;

        debug!(order_id = %order_id, "Order cancelled");
        Ok(order.clone())
    }

    /// Aggregated view of the top `depth` levels per side
    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        self.book.snapshot(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(CertificateType::EUA)
    }

    fn limit(entity: &str, side: Side, price: i64, qty: u64) -> Order {
        Order::new(
            EntityId::new(entity),
            side,
            CertificateType::EUA,
            Decimal::from(price),
            qty,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_book_order_rests() {
        let mut eng = engine();
        let report = eng.submit(limit("buyer", Side::Buy, 10, 100)).unwrap();

        assert_eq!(report.status, OrderStatus::Open);
        assert_eq!(report.remaining_quantity, 100);
        assert!(report.trades.is_empty());

        let snap = eng.snapshot(5);
        assert_eq!(snap.bids.len(), 1);
        assert_eq!(snap.bids[0].price, Decimal::from(10));
        assert_eq!(snap.bids[0].quantity, 100);
        assert_eq!(snap.bids[0].cumulative_quantity, 100);
    }

    #[test]
    fn test_partial_fill_against_resting_bid() {
        let mut eng = engine();
        let buy = eng.submit(limit("buyer", Side::Buy, 10, 100)).unwrap();
        let sell = eng.submit(limit("seller", Side::Sell, 10, 60)).unwrap();

        assert_eq!(sell.trades.len(), 1);
        let trade = &sell.trades[0];
        assert_eq!(trade.price, Decimal::from(10));
        assert_eq!(trade.quantity, 60);
        assert_eq!(trade.buy_order_id, buy.order_id);
        assert_eq!(trade.sell_order_id, sell.order_id);

        assert_eq!(sell.status, OrderStatus::Filled);
        assert_eq!(eng.orders[&buy.order_id].status, OrderStatus::PartiallyFilled);
        assert_eq!(eng.orders[&buy.order_id].remaining_quantity, 40);
    }

    #[test]
    fn test_execution_price_is_resting_price() {
        let mut eng = engine();
        eng.submit(limit("seller", Side::Sell, 10, 50)).unwrap();
        // Aggressive buy at 12 executes at 10
        let buy = eng.submit(limit("buyer", Side::Buy, 12, 50)).unwrap();
        assert_eq!(buy.trades[0].price, Decimal::from(10));
    }

    #[test]
    fn test_time_priority_within_level() {
        let mut eng = engine();
        let first = eng.submit(limit("a", Side::Sell, 10, 30)).unwrap();
        let second = eng.submit(limit("b", Side::Sell, 10, 30)).unwrap();

        let buy = eng.submit(limit("buyer", Side::Buy, 10, 40)).unwrap();
        assert_eq!(buy.trades.len(), 2);
        assert_eq!(buy.trades[0].sell_order_id, first.order_id);
        assert_eq!(buy.trades[0].quantity, 30);
        assert_eq!(buy.trades[1].sell_order_id, second.order_id);
        assert_eq!(buy.trades[1].quantity, 10);
    }

    #[test]
    fn test_price_priority_beats_time() {
        let mut eng = engine();
        eng.submit(limit("slow", Side::Sell, 11, 30)).unwrap();
        let better = eng.submit(limit("late", Side::Sell, 10, 30)).unwrap();

        let buy = eng.submit(limit("buyer", Side::Buy, 11, 30)).unwrap();
        assert_eq!(buy.trades.len(), 1);
        assert_eq!(buy.trades[0].sell_order_id, better.order_id);
        assert_eq!(buy.trades[0].price, Decimal::from(10));
    }

    #[test]
    fn test_no_match_without_crossing() {
        let mut eng = engine();
        eng.submit(limit("buyer", Side::Buy, 9, 100)).unwrap();
        let sell = eng.submit(limit("seller", Side::Sell, 10, 100)).unwrap();

        assert!(sell.trades.is_empty());
        assert_eq!(sell.status, OrderStatus::Open);
        assert_eq!(eng.snapshot(5).spread, Some(Decimal::from(1)));
    }

    #[test]
    fn test_cancel_removes_book_quantity() {
        let mut eng = engine();
        let buy = eng.submit(limit("buyer", Side::Buy, 10, 100)).unwrap();

        let cancelled = eng.cancel(buy.order_id).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(eng.snapshot(5).bids.is_empty());
    }

    #[test]
    fn test_cancel_filled_order_fails() {
        let mut eng = engine();
        let buy = eng.submit(limit("buyer", Side::Buy, 10, 50)).unwrap();
        eng.submit(limit("seller", Side::Sell, 10, 50)).unwrap();

        let result = eng.cancel(buy.order_id);
        assert!(matches!(result, Err(Error::InvalidState(_))));
        // Order and book unchanged
        assert_eq!(eng.orders[&buy.order_id].status, OrderStatus::Filled);
    }

    #[test]
    fn test_cancel_unknown_order() {
        let mut eng = engine();
        assert!(matches!(
            eng.cancel(Uuid::new_v4()),
            Err(Error::UnknownOrder(_))
        ));
    }

    #[test]
    fn test_market_quantity_walks_levels() {
        let mut eng = engine();
        eng.submit(limit("a", Side::Sell, 10, 30)).unwrap();
        eng.submit(limit("b", Side::Sell, 11, 30)).unwrap();

        let outcome = eng
            .submit_market(EntityId::new("t"), Side::Buy, MarketRequest::Quantity(50))
            .unwrap();

        assert_eq!(outcome.quantity_filled, 50);
        assert!(!outcome.partial);
        assert_eq!(outcome.trades.len(), 2);
        assert_eq!(outcome.trades[0].price, Decimal::from(10));
        assert_eq!(outcome.trades[1].price, Decimal::from(11));
        assert_eq!(
            outcome.notional_spent,
            Decimal::from(30 * 10 + 20 * 11)
        );
    }

    #[test]
    fn test_market_partial_when_book_runs_dry() {
        let mut eng = engine();
        eng.submit(limit("a", Side::Sell, 10, 30)).unwrap();

        let outcome = eng
            .submit_market(EntityId::new("t"), Side::Buy, MarketRequest::Quantity(50))
            .unwrap();

        assert_eq!(outcome.quantity_filled, 30);
        assert!(outcome.partial);
    }

    #[test]
    fn test_market_notional_budget() {
        let mut eng = engine();
        eng.submit(limit("a", Side::Sell, 10, 30)).unwrap();
        eng.submit(limit("b", Side::Sell, 12, 30)).unwrap();

        // 360 buys 30 @ 10 plus 5 @ 12
        let outcome = eng
            .submit_market(
                EntityId::new("t"),
                Side::Buy,
                MarketRequest::Notional(Decimal::from(360)),
            )
            .unwrap();

        assert_eq!(outcome.quantity_filled, 35);
        assert_eq!(outcome.notional_spent, Decimal::from(360));
        assert!(!outcome.partial);
    }

    #[test]
    fn test_market_on_empty_book() {
        let mut eng = engine();
        let outcome = eng
            .submit_market(EntityId::new("t"), Side::Buy, MarketRequest::Quantity(10))
            .unwrap();
        assert_eq!(outcome.quantity_filled, 0);
        assert!(outcome.partial);
        assert!(outcome.order_id.is_none());
    }

    #[test]
    fn test_wrong_instrument_rejected() {
        let mut eng = engine();
        let order = Order::new(
            EntityId::new("x"),
            Side::Buy,
            CertificateType::CER,
            Decimal::from(10),
            1,
        )
        .unwrap();
        assert!(matches!(eng.submit(order), Err(Error::Validation(_))));
    }
}
