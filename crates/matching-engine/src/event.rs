//! Event types for the matching engine
//!
//! Events are published on a broadcast channel after the batch that
//! produced them has been committed. Subscribers (the distribution hub,
//! tests) map them onto their own channels.

use chrono::{DateTime, Utc};
use common::{OrderId, Pair, UserId};
use serde::{Deserialize, Serialize};

use crate::domain::{Order, Trade};

/// Event emitted by the matching engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A new order entered the book
    OrderAdded { order: Order },

    /// An order changed state: filled, partially filled, cancelled or
    /// a taker that never rested
    OrderUpdated { order: Order },

    /// A resting order passed its expiry and was removed
    OrderExpired { order: Order },

    /// A trade was committed
    TradeExecuted { trade: Trade },

    /// The book of a pair changed
    BookChanged {
        pair: Pair,
        /// Pair sequence after the change
        sequence: u64,
    },

    /// Settlement finality advanced
    FinalityAdvanced { finalized_through: DateTime<Utc> },
}

impl EngineEvent {
    /// Pair the event belongs to, if any
    pub fn pair(&self) -> Option<&Pair> {
        match self {
            EngineEvent::OrderAdded { order }
            | EngineEvent::OrderUpdated { order }
            | EngineEvent::OrderExpired { order } => Some(&order.pair),
            EngineEvent::TradeExecuted { trade } => Some(&trade.pair),
            EngineEvent::BookChanged { pair, .. } => Some(pair),
            EngineEvent::FinalityAdvanced { .. } => None,
        }
    }

    /// Users the event concerns: the order owner, or both sides of a trade
    pub fn users(&self) -> Vec<&UserId> {
        match self {
            EngineEvent::OrderAdded { order }
            | EngineEvent::OrderUpdated { order }
            | EngineEvent::OrderExpired { order } => vec![&order.user_id],
            EngineEvent::TradeExecuted { trade } => vec![&trade.buyer_id, &trade.seller_id],
            _ => Vec::new(),
        }
    }

    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            EngineEvent::OrderAdded { order }
            | EngineEvent::OrderUpdated { order }
            | EngineEvent::OrderExpired { order } => Some(order.id),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::OrderAdded { .. } => "order_added",
            EngineEvent::OrderUpdated { .. } => "order_updated",
            EngineEvent::OrderExpired { .. } => "order_expired",
            EngineEvent::TradeExecuted { .. } => "trade_executed",
            EngineEvent::BookChanged { .. } => "book_changed",
            EngineEvent::FinalityAdvanced { .. } => "finality_advanced",
        }
    }
}
