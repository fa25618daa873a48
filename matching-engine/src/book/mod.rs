//! Order book data structures
//!
//! A book is two price ladders (bids descending, asks ascending) of FIFO
//! price levels. The book stores only (order id, remaining quantity)
//! entries; full order records live in the engine's arena.

mod ladder;
mod price_level;

pub use ladder::{BookSnapshot, LevelSnapshot, OrderBook};
pub use price_level::PriceLevel;
