//! Atomic operation contract
//!
//! Every mutation of the book goes through one of these scripts. A store
//! executes each script as one indivisible unit: the in-memory store under
//! the pair's lock, the Redis store as a single Lua script. A batch of
//! scripts is executed in order, but only each script on its own is atomic.

use common::{OrderId, Pair, TradeId};
use serde::{Deserialize, Serialize};

use crate::domain::{BookSnapshot, MatchRequest, Order, Trade};

/// One atomic store operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Script {
    /// Insert an order and update its price level; terminal orders are
    /// only recorded
    AddOrder { order: Order },
    /// Candidate makers for an incoming order, without mutation
    FastMatch { request: MatchRequest },
    /// Apply maker fills and append the trades to the pair's log
    ExecuteTrades { pair: Pair, trades: Vec<Trade> },
    /// Aggregated book snapshot
    GetOrderbookFast { pair: Pair, depth: usize },
    /// Remove a live order and mark it cancelled
    CancelOrder { order_id: OrderId },
    /// Remove a live order and mark it expired
    ExpireOrder { order_id: OrderId },
}

impl Script {
    /// Operation name as used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Script::AddOrder { .. } => "ADD_ORDER",
            Script::FastMatch { .. } => "FAST_MATCH",
            Script::ExecuteTrades { .. } => "EXECUTE_TRADES",
            Script::GetOrderbookFast { .. } => "GET_ORDERBOOK_FAST",
            Script::CancelOrder { .. } => "CANCEL_ORDER",
            Script::ExpireOrder { .. } => "EXPIRE_ORDER",
        }
    }

    /// Pair the script touches, when it names one
    pub fn pair(&self) -> Option<&Pair> {
        match self {
            Script::AddOrder { order } => Some(&order.pair),
            Script::FastMatch { request } => Some(&request.pair),
            Script::ExecuteTrades { pair, .. } | Script::GetOrderbookFast { pair, .. } => Some(pair),
            Script::CancelOrder { .. } | Script::ExpireOrder { .. } => None,
        }
    }

    /// Take back the trade buffer of an EXECUTE_TRADES script
    pub fn into_trades(self) -> Option<Vec<Trade>> {
        match self {
            Script::ExecuteTrades { trades, .. } => Some(trades),
            _ => None,
        }
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Script::FastMatch { .. } | Script::GetOrderbookFast { .. }
        )
    }
}

/// Outcome of applying trades
///
/// A replayed script reports the trades an earlier attempt already applied
/// as if they were applied now, so callers see one result per execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Trades of this execution in input order with their store-assigned
    /// sequence, whether applied now or by an earlier attempt
    pub trades: Vec<Trade>,
    /// Maker orders after their fills
    pub makers: Vec<Order>,
    /// Trades an earlier attempt of the same script already applied
    pub replayed: Vec<TradeId>,
    /// Trades skipped because a different trade with the same id is
    /// already in the log
    pub duplicates: Vec<TradeId>,
    /// Makers whose remaining amount had to be clamped at zero
    pub clamped: Vec<OrderId>,
}

/// Result of one script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ScriptResult {
    /// Order as stored, with its sequence assigned
    Added { order: Order },
    Candidates { orders: Vec<Order> },
    Executed { report: ExecutionReport },
    Snapshot { snapshot: BookSnapshot },
    /// Removed order, or `None` when it was unknown or already terminal
    Removed { order: Option<Order> },
}

impl ScriptResult {
    pub fn into_added(self) -> Option<Order> {
        match self {
            ScriptResult::Added { order } => Some(order),
            _ => None,
        }
    }

    pub fn into_candidates(self) -> Option<Vec<Order>> {
        match self {
            ScriptResult::Candidates { orders } => Some(orders),
            _ => None,
        }
    }

    pub fn into_report(self) -> Option<ExecutionReport> {
        match self {
            ScriptResult::Executed { report } => Some(report),
            _ => None,
        }
    }

    pub fn into_snapshot(self) -> Option<BookSnapshot> {
        match self {
            ScriptResult::Snapshot { snapshot } => Some(snapshot),
            _ => None,
        }
    }

    pub fn into_removed(self) -> Option<Option<Order>> {
        match self {
            ScriptResult::Removed { order } => Some(order),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_and_mutation_flags() {
        let pair: Pair = "BTC-USDT".parse().unwrap();
        let snapshot = Script::GetOrderbookFast {
            pair: pair.clone(),
            depth: 10,
        };
        assert_eq!(snapshot.name(), "GET_ORDERBOOK_FAST");
        assert!(!snapshot.is_mutating());
        assert_eq!(snapshot.pair(), Some(&pair));

        let cancel = Script::CancelOrder {
            order_id: OrderId::new(),
        };
        assert_eq!(cancel.name(), "CANCEL_ORDER");
        assert!(cancel.is_mutating());
        assert!(cancel.pair().is_none());

        let execute = Script::ExecuteTrades {
            pair,
            trades: Vec::with_capacity(8),
        };
        assert!(execute.is_mutating());
        assert!(execute.into_trades().unwrap().capacity() >= 8);
        assert!(cancel.into_trades().is_none());
    }

    #[test]
    fn test_script_wire_tag() {
        let json = serde_json::to_value(Script::ExpireOrder {
            order_id: OrderId::new(),
        })
        .unwrap();
        assert_eq!(json["op"], "EXPIRE_ORDER");
    }

    #[test]
    fn test_result_accessors() {
        let removed = ScriptResult::Removed { order: None };
        assert_eq!(removed.clone().into_removed(), Some(None));
        assert!(removed.into_added().is_none());
    }
}
