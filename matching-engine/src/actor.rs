//! Actor-based concurrency for the matching engine
//!
//! One actor task owns each certificate type's book (single-writer
//! pattern): submit and cancel for an instrument are serialized through
//! the actor mailbox, and snapshots travel through the same mailbox so
//! reads always observe a consistent point-in-time book with no
//! partially-applied match visible.
//!
//! ```text
//! callers ──> MatchingRouter ──> EngineHandle (Clone)
//!                                     │ mpsc::channel (bounded)
//!                                     ▼
//!                              EngineActor (single task per instrument)
//!                                     │ owns Engine { book, arena }
//!                                     ▼
//!                              broadcast::Sender<TradeExecuted>
//! ```

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::info;
use uuid::Uuid;

use exchange_core::{CertificateType, EntityId, Order, Side};

use crate::book::BookSnapshot;
use crate::engine::{Engine, MarketOutcome, MarketRequest, SubmitReport};
use crate::events::TradeExecuted;
use crate::{Error, Result};

/// Mailbox capacity per instrument actor
const MAILBOX_CAPACITY: usize = 1024;

/// Broadcast buffer for the trade feed
const EVENT_CAPACITY: usize = 4096;

/// Message sent to an instrument actor
pub enum EngineMessage {
    /// Submit a limit order
    Submit {
        /// Validated order to work
        order: Order,
        /// Reply channel
        response: oneshot::Sender<Result<SubmitReport>>,
    },

    /// Market-style execution across levels
    SubmitMarket {
        /// Taker entity
        entity: EntityId,
        /// Taker side
        side: Side,
        /// Quantity or notional budget
        request: MarketRequest,
        /// Reply channel
        response: oneshot::Sender<Result<MarketOutcome>>,
    },

    /// Cancel a resting order
    Cancel {
        /// Order to cancel
        order_id: Uuid,
        /// Reply channel
        response: oneshot::Sender<Result<Order>>,
    },

    /// Consistent point-in-time book view
    Snapshot {
        /// Levels per side
        depth: usize,
        /// Reply channel
        response: oneshot::Sender<BookSnapshot>,
    },

    /// Stop the actor
    Shutdown,
}

impl std::fmt::Debug for EngineMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineMessage::Submit { .. } => "Submit",
            EngineMessage::SubmitMarket { .. } => "SubmitMarket",
            EngineMessage::Cancel { .. } => "Cancel",
            EngineMessage::Snapshot { .. } => "Snapshot",
            EngineMessage::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Actor that owns one instrument's engine
struct EngineActor {
    engine: Engine,
    mailbox: mpsc::Receiver<EngineMessage>,
    events: broadcast::Sender<TradeExecuted>,
}

impl EngineActor {
    async fn run(mut self) {
        info!(
            certificate_type = %self.engine.certificate_type(),
            "Matching actor started"
        );

        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                EngineMessage::Submit { order, response } => {
                    let taker_side = order.side;
                    let result = self.engine.submit(order);
                    if let Ok(report) = &result {
                        self.publish(&report.trades, taker_side);
                    }
                    let _ = response.send(result);
                }

                EngineMessage::SubmitMarket {
                    entity,
                    side,
                    request,
                    response,
                } => {
                    let result = self.engine.submit_market(entity, side, request);
                    if let Ok(outcome) = &result {
                        self.publish(&outcome.trades, side);
                    }
                    let _ = response.send(result);
                }

                EngineMessage::Cancel { order_id, response } => {
                    let _ = response.send(self.engine.cancel(order_id));
                }

                EngineMessage::Snapshot { depth, response } => {
                    let _ = response.send(self.engine.snapshot(depth));
                }

                EngineMessage::Shutdown => break,
            }
        }

        info!(
            certificate_type = %self.engine.certificate_type(),
            "Matching actor stopped"
        );
    }

    fn publish(&self, trades: &[exchange_core::Trade], taker_side: Side) {
        for trade in trades {
            // send fails only when no subscriber is listening
            let _ = self
                .events
                .send(TradeExecuted::from_trade(trade.clone(), taker_side));
        }
    }
}

/// Handle for sending messages to one instrument actor
#[derive(Debug, Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineMessage>,
}

impl EngineHandle {
    /// Submit a limit order
    pub async fn submit(&self, order: Order) -> Result<SubmitReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineMessage::Submit {
                order,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Market-style execution
    pub async fn submit_market(
        &self,
        entity: EntityId,
        side: Side,
        request: MarketRequest,
    ) -> Result<MarketOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineMessage::SubmitMarket {
                entity,
                side,
                request,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Cancel an order
    pub async fn cancel(&self, order_id: Uuid) -> Result<Order> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineMessage::Cancel {
                order_id,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Consistent book snapshot
    pub async fn snapshot(&self, depth: usize) -> Result<BookSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineMessage::Snapshot {
                depth,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Stop the actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(EngineMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn an instrument actor, returning its handle
pub fn spawn_engine_actor(
    certificate_type: CertificateType,
    events: broadcast::Sender<TradeExecuted>,
) -> EngineHandle {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let actor = EngineActor {
        engine: Engine::new(certificate_type),
        mailbox: rx,
        events,
    };

    tokio::spawn(actor.run());

    EngineHandle { sender: tx }
}

/// Routes orders to the per-instrument actors, spawning each on first use
#[derive(Debug)]
pub struct MatchingRouter {
    engines: DashMap<CertificateType, EngineHandle>,
    events: broadcast::Sender<TradeExecuted>,
}

impl MatchingRouter {
    /// Create a router with no live instruments
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            engines: DashMap::new(),
            events,
        }
    }

    /// Subscribe to the trade feed across all instruments
    pub fn subscribe(&self) -> broadcast::Receiver<TradeExecuted> {
        self.events.subscribe()
    }

    /// Submit a limit order, routed by certificate type
    pub async fn submit(&self, order: Order) -> Result<SubmitReport> {
        self.handle_for(order.certificate_type).submit(order).await
    }

    /// Market-style execution, routed by certificate type
    pub async fn submit_market(
        &self,
        certificate_type: CertificateType,
        entity: EntityId,
        side: Side,
        request: MarketRequest,
    ) -> Result<MarketOutcome> {
        self.handle_for(certificate_type)
            .submit_market(entity, side, request)
            .await
    }

    /// Cancel an order on the given instrument
    pub async fn cancel(
        &self,
        certificate_type: CertificateType,
        order_id: Uuid,
    ) -> Result<Order> {
        self.handle_for(certificate_type).cancel(order_id).await
    }

    /// Snapshot the given instrument's book
    pub async fn snapshot(
        &self,
        certificate_type: CertificateType,
        depth: usize,
    ) -> Result<BookSnapshot> {
        self.handle_for(certificate_type).snapshot(depth).await
    }

    /// Convenience: a market buy spending `notional` at best available
    /// prices
    pub async fn spend(
        &self,
        certificate_type: CertificateType,
        entity: EntityId,
        notional: Decimal,
    ) -> Result<MarketOutcome> {
        self.submit_market(
            certificate_type,
            entity,
            Side::Buy,
            MarketRequest::Notional(notional),
        )
        .await
    }

    fn handle_for(&self, certificate_type: CertificateType) -> EngineHandle {
        self.engines
            .entry(certificate_type)
            .or_insert_with(|| spawn_engine_actor(certificate_type, self.events.clone()))
            .clone()
    }
}

impl Default for MatchingRouter {
    fn default() -> Self {
        Self::new()
    }
}
