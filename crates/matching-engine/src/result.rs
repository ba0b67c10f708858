//! Result types for engine operations

use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::domain::{Order, Trade};

/// Where a processed order ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Nothing crossed; the whole order rests in the book
    Resting,
    /// Some fills, the remainder rests in the book
    PartiallyFilled,
    FullyFilled,
    /// Market order remainder with no liquidity left
    Cancelled,
}

impl OrderState {
    pub fn of(order: &Order) -> Self {
        match order.status {
            common::OrderStatus::Active => OrderState::Resting,
            common::OrderStatus::PartiallyFilled => OrderState::PartiallyFilled,
            common::OrderStatus::Filled => OrderState::FullyFilled,
            _ => OrderState::Cancelled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Resting => "resting",
            OrderState::PartiallyFilled => "partially_filled",
            OrderState::FullyFilled => "fully_filled",
            OrderState::Cancelled => "cancelled",
        }
    }
}

/// Result of a submitted order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResult {
    /// Order as committed, with its sequence
    pub order: Order,
    /// Trades generated, in execution order
    pub trades: Vec<Trade>,
    pub state: OrderState,
    /// Resting orders found expired while matching
    pub expired_makers: Vec<OrderId>,
}

impl SubmitResult {
    /// Check if any trades were generated
    pub fn has_trades(&self) -> bool {
        !self.trades.is_empty()
    }

    pub fn is_resting(&self) -> bool {
        matches!(self.state, OrderState::Resting | OrderState::PartiallyFilled)
    }
}

/// Result of a cancel operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResult {
    /// Whether the order was found live and removed
    pub cancelled: bool,
    /// The order after the cancel, or its last known state
    pub order: Option<Order>,
}

impl CancelResult {
    /// Order was successfully cancelled
    pub fn cancelled(order: Order) -> Self {
        Self {
            cancelled: true,
            order: Some(order),
        }
    }

    /// Order was already terminal or never existed
    pub fn not_cancelled(order: Option<Order>) -> Self {
        Self {
            cancelled: false,
            order,
        }
    }
}
