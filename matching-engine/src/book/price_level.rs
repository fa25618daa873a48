//! Price level with FIFO order queue
//!
//! All open orders at one price, queued in submission order. FIFO
//! position is what enforces time priority within a level.

use std::collections::VecDeque;
use uuid::Uuid;

/// Entry in the level queue
#[derive(Debug, Clone, Copy)]
struct LevelEntry {
    order_id: Uuid,
    remaining: u64,
}

/// All resting quantity at a single price
#[derive(Debug, Clone, Default)]
pub struct PriceLevel {
    orders: VecDeque<LevelEntry>,
    total_quantity: u64,
}

impl PriceLevel {
    /// Create an empty level
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an order at the back (time priority)
    pub fn push_back(&mut self, order_id: Uuid, remaining: u64) {
        self.orders.push_back(LevelEntry {
            order_id,
            remaining,
        });
        self.total_quantity += remaining;
    }

    /// Peek the front order without removing it
    pub fn peek_front(&self) -> Option<(Uuid, u64)> {
        self.orders.front().map(|e| (e.order_id, e.remaining))
    }

    /// Fill `quantity` certificates from the front order
    ///
    /// Removes the entry when fully consumed. Returns false if the level
    /// is empty or the fill exceeds the front order's remaining quantity.
    pub fn fill_front(&mut self, quantity: u64) -> bool {
        let Some(entry) = self.orders.front_mut() else {
            return false;
        };
        if quantity == 0 || quantity > entry.remaining {
            return false;
        }

        entry.remaining -= quantity;
        self.total_quantity -= quantity;
        if entry.remaining == 0 {
            self.orders.pop_front();
        }
        true
    }

    /// Remove an order from anywhere in the queue (cancellation)
    ///
    /// Returns the removed remaining quantity, or None if not queued here.
    pub fn remove(&mut self, order_id: Uuid) -> Option<u64> {
        let position = self.orders.iter().position(|e| e.order_id == order_id)?;
        let entry = self.orders.remove(position)?;
        self.total_quantity -= entry.remaining;
        Some(entry.remaining)
    }

    /// Total resting quantity at this level
    pub fn total_quantity(&self) -> u64 {
        self.total_quantity
    }

    /// Number of resting orders at this level
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Check whether the level has no resting orders
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
