//! Store traits for the Matching Engine
//!
//! This module defines the trait that all book store implementations must
//! satisfy, plus the atomic script dispatch built on top of it.

use async_trait::async_trait;
use common::{Amount, OrderId, Pair, Scale, Side};

use crate::domain::{BookSnapshot, MatchRequest, Order, Trade};
use crate::script::{ExecutionReport, Script, ScriptResult};

/// Errors that can occur in the store
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Pair not registered with the store: {0}")]
    UnknownPair(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<common::PrecisionError> for StoreError {
    fn from(err: common::PrecisionError) -> Self {
        StoreError::Consistency(err.to_string())
    }
}

/// Decimal scales of one pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairScales {
    pub price: Scale,
    pub amount: Scale,
}

/// Outcome of `record_fill`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillOutcome {
    /// Fill applied with exact arithmetic
    Applied(Order),
    /// Fill exceeded the remaining amount; the order was forced to filled
    Clamped(Order),
    /// Order is unknown or already terminal
    NotLive(OrderId),
}

impl FillOutcome {
    pub fn order(&self) -> Option<&Order> {
        match self {
            FillOutcome::Applied(order) | FillOutcome::Clamped(order) => Some(order),
            FillOutcome::NotLive(_) => None,
        }
    }
}

/// Trait for book storage
///
/// Every mutating method is atomic with respect to the order and price
/// level it touches. Operations on different pairs never block each other.
#[async_trait]
pub trait BookStore: Send + Sync {
    /// Backend name for logs
    fn backend(&self) -> &'static str;

    /// Make a pair known to the store
    async fn register_pair(&self, pair: &Pair, scales: PairScales) -> StoreResult<()>;

    // ------------------------------------------------------------------------
    // Order Operations
    // ------------------------------------------------------------------------

    /// Insert an order into the record table and, when live, into its side
    /// and price level
    ///
    /// Adding an id that already exists returns the stored order unchanged.
    async fn add_order(&self, order: Order) -> StoreResult<Order>;

    /// Remove a live order and mark it cancelled
    ///
    /// Returns `None` if the order does not exist or is already terminal.
    async fn cancel_order(&self, order_id: OrderId) -> StoreResult<Option<Order>>;

    /// Remove a live order and mark it expired
    async fn expire_order(&self, order_id: OrderId) -> StoreResult<Option<Order>>;

    /// Apply a fill; clamps instead of going negative
    async fn record_fill(&self, order_id: OrderId, delta: Amount) -> StoreResult<FillOutcome>;

    /// Apply maker fills for a set of trades and append them to the log
    async fn execute_trades(&self, pair: &Pair, trades: Vec<Trade>) -> StoreResult<ExecutionReport>;

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Live or recently terminal order by id
    async fn get_order(&self, order_id: OrderId) -> StoreResult<Option<Order>>;

    /// Up to `depth` levels per side, best first
    async fn get_book(&self, pair: &Pair, depth: usize) -> StoreResult<BookSnapshot>;

    /// Live orders at one price, oldest first
    async fn get_orders_at_price(&self, pair: &Pair, side: Side, price: Amount) -> StoreResult<Vec<Order>>;

    /// Crossing makers for an incoming order in priority order
    ///
    /// Stops once the non-expired candidates cover the requested amount or
    /// `max_candidates` orders were collected.
    async fn fast_match(&self, request: &MatchRequest) -> StoreResult<Vec<Order>>;

    /// Most recent trades, newest first
    async fn recent_trades(&self, pair: &Pair, limit: usize) -> StoreResult<Vec<Trade>>;

    /// Connectivity check
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Script dispatch
    // ------------------------------------------------------------------------

    /// Execute one atomic script
    async fn execute(&self, script: Script) -> StoreResult<ScriptResult> {
        Ok(match script {
            Script::AddOrder { order } => ScriptResult::Added {
                order: self.add_order(order).await?,
            },
            Script::FastMatch { request } => ScriptResult::Candidates {
                orders: self.fast_match(&request).await?,
            },
            Script::ExecuteTrades { pair, trades } => ScriptResult::Executed {
                report: self.execute_trades(&pair, trades).await?,
            },
            Script::GetOrderbookFast { pair, depth } => ScriptResult::Snapshot {
                snapshot: self.get_book(&pair, depth).await?,
            },
            Script::CancelOrder { order_id } => ScriptResult::Removed {
                order: self.cancel_order(order_id).await?,
            },
            Script::ExpireOrder { order_id } => ScriptResult::Removed {
                order: self.expire_order(order_id).await?,
            },
        })
    }

    /// Execute scripts in order, failing on the first error
    ///
    /// Scripts before the failing one stay applied. Replaying the batch
    /// never adds an order or applies a trade twice.
    async fn execute_batch(&self, scripts: Vec<Script>) -> StoreResult<Vec<ScriptResult>> {
        let mut results = Vec::with_capacity(scripts.len());
        for script in scripts {
            results.push(self.execute(script).await?);
        }
        Ok(results)
    }
}
