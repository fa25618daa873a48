//! Two-sided price ladder
//!
//! Bids and asks are `BTreeMap<Decimal, PriceLevel>` so iteration order
//! is deterministic: bids from the highest price down, asks from the
//! lowest price up. Price keys are exact decimals; no epsilon comparison
//! is used anywhere in the book.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use exchange_core::Side;

use super::price_level::PriceLevel;

/// Two-sided order book for one certificate type
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: BTreeMap<Decimal, PriceLevel>,
    asks: BTreeMap<Decimal, PriceLevel>,
}

/// One aggregated price level in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    /// Level price
    pub price: Decimal,
    /// Resting quantity at this price
    pub quantity: u64,
    /// Quantity from the best price up to and including this level
    pub cumulative_quantity: u64,
    /// Number of resting orders at this price
    pub order_count: usize,
}

/// Point-in-time view of the book, best-to-worst per side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// Bid levels, highest price first
    pub bids: Vec<LevelSnapshot>,
    /// Ask levels, lowest price first
    pub asks: Vec<LevelSnapshot>,
    /// Best (highest) bid price
    pub best_bid: Option<Decimal>,
    /// Best (lowest) ask price
    pub best_ask: Option<Decimal>,
    /// Best ask minus best bid; None if either side is empty
    pub spread: Option<Decimal>,
}

impl OrderBook {
    /// Create an empty book
    pub fn new() -> Self {
        Self::default()
    }

    /// Rest an order at its limit price
    pub fn insert(&mut self, side: Side, price: Decimal, order_id: Uuid, remaining: u64) {
        self.side_mut(side)
            .entry(price)
            .or_default()
            .push_back(order_id, remaining);
    }

    /// Remove an order's remaining quantity from its level
    ///
    /// Empty levels are pruned. Returns the removed quantity.
    pub fn remove(&mut self, side: Side, price: Decimal, order_id: Uuid) -> Option<u64> {
        let ladder = self.side_mut(side);
        let level = ladder.get_mut(&price)?;
        let removed = level.remove(order_id)?;
        if level.is_empty() {
            ladder.remove(&price);
        }
        Some(removed)
    }

    /// Best (highest) bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    /// Best (lowest) ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Best price and front order on the side an incoming order
    /// matches against
    pub fn best_opposing(&self, incoming: Side) -> Option<(Decimal, Uuid, u64)> {
        let (price, level) = match incoming {
            Side::Buy => self.asks.iter().next()?,
            Side::Sell => self.bids.iter().next_back()?,
        };
        let (order_id, remaining) = level.peek_front()?;
        Some((*price, order_id, remaining))
    }

    /// Fill `quantity` from the front order of the best opposing level,
    /// pruning the level when it empties
    pub fn fill_best_opposing(&mut self, incoming: Side, quantity: u64) -> bool {
        let ladder = match incoming {
            Side::Buy => &mut self.asks,
            Side::Sell => &mut self.bids,
        };
        let price = match incoming {
            Side::Buy => ladder.keys().next().copied(),
            Side::Sell => ladder.keys().next_back().copied(),
        };
        let Some(price) = price else { return false };
        let Some(level) = ladder.get_mut(&price) else {
            return false;
        };
        let filled = level.fill_front(quantity);
        if level.is_empty() {
            ladder.remove(&price);
        }
        filled
    }

    /// Aggregate the top `depth` levels per side
    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        let bids = Self::aggregate(self.bids.iter().rev(), depth);
        let asks = Self::aggregate(self.asks.iter(), depth);
        let best_bid = self.best_bid();
        let best_ask = self.best_ask();
        let spread = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        };

        BookSnapshot {
            bids,
            asks,
            best_bid,
            best_ask,
            spread,
        }
    }

    fn aggregate<'a>(
        levels: impl Iterator<Item = (&'a Decimal, &'a PriceLevel)>,
        depth: usize,
    ) -> Vec<LevelSnapshot> {
        let mut cumulative = 0u64;
        levels
            .take(depth)
            .map(|(price, level)| {
                cumulative += level.total_quantity();
                LevelSnapshot {
                    price: *price,
                    quantity: level.total_quantity(),
                    cumulative_quantity: cumulative,
                    order_count: level.order_count(),
                }
            })
            .collect()
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Decimal, PriceLevel> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(n: i64) -> Decimal {
        Decimal::from(n)
    }

    #[test]
    fn test_best_prices_per_side() {
        let mut book = OrderBook::new();
        book.insert(Side::Buy, dec(10), Uuid::new_v4(), 100);
        book.insert(Side::Buy, dec(11), Uuid::new_v4(), 50);
        book.insert(Side::Sell, dec(13), Uuid::new_v4(), 70);
        book.insert(Side::Sell, dec(12), Uuid::new_v4(), 30);

        assert_eq!(book.best_bid(), Some(dec(11)));
        assert_eq!(book.best_ask(), Some(dec(12)));
    }

    #[test]
    fn test_best_opposing_orientation() {
        let mut book = OrderBook::new();
        let bid = Uuid::new_v4();
        let ask = Uuid::new_v4();
        book.insert(Side::Buy, dec(11), bid, 50);
        book.insert(Side::Sell, dec(12), ask, 30);

        // Incoming buy matches the lowest ask
        assert_eq!(book.best_opposing(Side::Buy), Some((dec(12), ask, 30)));
        // Incoming sell matches the highest bid
        assert_eq!(book.best_opposing(Side::Sell), Some((dec(11), bid, 50)));
    }

    #[test]
    fn test_snapshot_cumulative_and_spread() {
        let mut book = OrderBook::new();
        book.insert(Side::Buy, dec(10), Uuid::new_v4(), 100);
        book.insert(Side::Buy, dec(9), Uuid::new_v4(), 40);
        book.insert(Side::Buy, dec(10), Uuid::new_v4(), 25);
        book.insert(Side::Sell, dec(12), Uuid::new_v4(), 60);

        let snap = book.snapshot(10);
        assert_eq!(snap.bids.len(), 2);
        assert_eq!(snap.bids[0].price, dec(10));
        assert_eq!(snap.bids[0].quantity, 125);
        assert_eq!(snap.bids[0].order_count, 2);
        assert_eq!(snap.bids[1].cumulative_quantity, 165);
        assert_eq!(snap.spread, Some(dec(2)));
    }

    #[test]
    fn test_snapshot_spread_null_when_side_empty() {
        let mut book = OrderBook::new();
        book.insert(Side::Buy, dec(10), Uuid::new_v4(), 100);

        let snap = book.snapshot(5);
        assert_eq!(snap.best_bid, Some(dec(10)));
        assert_eq!(snap.best_ask, None);
        assert_eq!(snap.spread, None);
    }

    #[test]
    fn test_remove_prunes_empty_level() {
        let mut book = OrderBook::new();
        let id = Uuid::new_v4();
        book.insert(Side::Sell, dec(12), id, 60);

        assert_eq!(book.remove(Side::Sell, dec(12), id), Some(60));
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn test_fill_best_opposing_prunes() {
        let mut book = OrderBook::new();
        book.insert(Side::Sell, dec(12), Uuid::new_v4(), 60);

        assert!(book.fill_best_opposing(Side::Buy, 60));
        assert_eq!(book.best_ask(), None);
        assert!(!book.fill_best_opposing(Side::Buy, 1));
    }
}
