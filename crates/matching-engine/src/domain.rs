//! Domain types for the Matching Engine
//!
//! Orders, trades and the price-level aggregates the book is built from.
//! Every price and amount is an exact [`Amount`]; nothing here touches
//! floating point.

use chrono::{DateTime, Utc};
use common::{Amount, OrderId, OrderStatus, OrderType, Pair, PrecisionResult, Side, TradeId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// ============================================================================
// New Order
// ============================================================================

/// Order as submitted by a client, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: UserId,
    pub pair: Pair,
    pub side: Side,
    #[serde(default)]
    pub order_type: OrderType,
    /// Limit price; must be absent for market orders
    #[serde(default)]
    pub price: Option<Amount>,
    pub amount: Amount,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewOrder {
    /// Limit order helper
    pub fn limit(user_id: UserId, pair: Pair, side: Side, price: Amount, amount: Amount) -> Self {
        Self {
            user_id,
            pair,
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            amount,
            expires_at: None,
        }
    }

    /// Market order helper
    pub fn market(user_id: UserId, pair: Pair, side: Side, amount: Amount) -> Self {
        Self {
            user_id,
            pair,
            side,
            order_type: OrderType::Market,
            price: None,
            amount,
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

// ============================================================================
// Order
// ============================================================================

/// One resting or filled intent to trade
///
/// Invariant: `remaining == amount - filled` and `remaining >= 0`.
/// An order with `remaining == 0` is filled and never rests in the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub pair: Pair,
    pub side: Side,
    pub order_type: OrderType,
    /// `None` for market orders
    pub price: Option<Amount>,
    pub amount: Amount,
    pub filled: Amount,
    pub remaining: Amount,
    pub status: OrderStatus,
    /// Insertion sequence within the pair; time priority tie-break
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Build an active order from a validated submission
    pub fn accept(id: OrderId, request: &NewOrder, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: request.user_id.clone(),
            pair: request.pair.clone(),
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            amount: request.amount,
            filled: Amount::ZERO,
            remaining: request.amount,
            status: OrderStatus::Active,
            sequence: 0,
            created_at: now,
            expires_at: request.expires_at,
        }
    }

    /// Active or partially filled
    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_market(&self) -> bool {
        self.order_type == OrderType::Market
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    /// True when `remaining == amount - filled`
    pub fn is_consistent(&self) -> bool {
        self.amount
            .checked_sub(self.filled)
            .map(|expected| expected == self.remaining)
            .unwrap_or(false)
    }

    /// Apply a fill with checked arithmetic
    ///
    /// Fails with `Underflow` if `delta` exceeds the remaining amount;
    /// the order is left untouched in that case.
    pub fn apply_fill(&mut self, delta: Amount) -> PrecisionResult<()> {
        let remaining = self.remaining.checked_sub(delta)?;
        let filled = self.filled.checked_add(delta)?;
        self.remaining = remaining;
        self.filled = filled;
        self.status = if remaining.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        Ok(())
    }

    /// Force the order to filled, zeroing the remainder
    pub fn clamp_filled(&mut self) {
        self.filled = self.amount;
        self.remaining = Amount::ZERO;
        self.status = OrderStatus::Filled;
    }
}

// ============================================================================
// Trade
// ============================================================================

/// Immutable record of one match between a taker and a maker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Derived from both order ids, the match time and the fill index
    pub id: TradeId,
    pub pair: Pair,
    /// Always the maker's price
    pub price: Amount,
    pub amount: Amount,
    pub taker_order_id: OrderId,
    pub maker_order_id: OrderId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub taker_side: Side,
    /// Assigned by the store when the trade is committed
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    /// Build the trade for one taker/maker pairing
    pub fn between(
        taker: &Order,
        maker: &Order,
        price: Amount,
        amount: Amount,
        timestamp: DateTime<Utc>,
        fill_index: u32,
    ) -> Self {
        let (buyer_id, seller_id) = match taker.side {
            Side::Buy => (taker.user_id.clone(), maker.user_id.clone()),
            Side::Sell => (maker.user_id.clone(), taker.user_id.clone()),
        };
        let nanos = timestamp.timestamp_nanos_opt().unwrap_or_default();

        Self {
            id: TradeId::derive(taker.id, maker.id, nanos, fill_index),
            pair: taker.pair.clone(),
            price,
            amount,
            taker_order_id: taker.id,
            maker_order_id: maker.id,
            buyer_id,
            seller_id,
            taker_side: taker.side,
            sequence: 0,
            timestamp,
        }
    }

    /// Same fill, ignoring the store-assigned sequence
    pub fn same_execution(&self, other: &Trade) -> bool {
        self.id == other.id
            && self.pair == other.pair
            && self.price == other.price
            && self.amount == other.amount
            && self.taker_order_id == other.taker_order_id
            && self.maker_order_id == other.maker_order_id
            && self.taker_side == other.taker_side
            && self.timestamp == other.timestamp
    }
}

// ============================================================================
// Price Level
// ============================================================================

/// All resting orders at one price on one side of one pair
///
/// `total_remaining` is the sum of the member orders' `remaining`;
/// `order_ids` is kept in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Amount,
    pub total_remaining: Amount,
    pub order_ids: VecDeque<OrderId>,
}

impl PriceLevel {
    pub fn new(price: Amount) -> Self {
        Self {
            price,
            total_remaining: Amount::ZERO,
            order_ids: VecDeque::new(),
        }
    }

    pub fn order_count(&self) -> usize {
        self.order_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order_ids.is_empty()
    }

    /// Append an order at the back of the time queue
    pub fn push(&mut self, order_id: OrderId, remaining: Amount) -> PrecisionResult<()> {
        self.total_remaining = self.total_remaining.checked_add(remaining)?;
        self.order_ids.push_back(order_id);
        Ok(())
    }

    /// Remove an order and its contribution; false when absent
    pub fn remove(&mut self, order_id: OrderId, remaining: Amount) -> bool {
        match self.order_ids.iter().position(|id| *id == order_id) {
            Some(pos) => {
                self.order_ids.remove(pos);
                self.total_remaining = self.total_remaining.saturating_sub(remaining);
                true
            }
            None => false,
        }
    }

    /// Reduce the aggregate after a partial fill
    pub fn reduce(&mut self, delta: Amount) {
        self.total_remaining = self.total_remaining.saturating_sub(delta);
    }

    pub fn view(&self) -> PriceLevelView {
        PriceLevelView {
            price: self.price,
            amount: self.total_remaining,
            order_count: self.order_count(),
        }
    }
}

/// Aggregated price level as published in snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevelView {
    pub price: Amount,
    pub amount: Amount,
    pub order_count: usize,
}

/// Top of book for one pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub pair: Pair,
    /// Best (highest) bid first
    pub bids: Vec<PriceLevelView>,
    /// Best (lowest) ask first
    pub asks: Vec<PriceLevelView>,
    /// Pair mutation sequence at snapshot time
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl BookSnapshot {
    pub fn empty(pair: Pair) -> Self {
        Self {
            pair,
            bids: Vec::new(),
            asks: Vec::new(),
            sequence: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn best_bid(&self) -> Option<Amount> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Amount> {
        self.asks.first().map(|l| l.price)
    }

    pub fn spread(&self) -> Option<Amount> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask.checked_sub(bid).ok(),
            _ => None,
        }
    }

    /// Level at an exact price on one side
    pub fn level(&self, side: Side, price: Amount) -> Option<&PriceLevelView> {
        let levels = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        levels.iter().find(|l| l.price == price)
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

// ============================================================================
// Match Request
// ============================================================================

/// Input of a candidate lookup for an incoming order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub pair: Pair,
    pub order_id: OrderId,
    /// Side of the incoming (taker) order
    pub side: Side,
    /// `None` crosses every opposite price
    pub price: Option<Amount>,
    pub amount: Amount,
    pub max_candidates: usize,
    pub now: DateTime<Utc>,
}

impl MatchRequest {
    pub fn for_order(order: &Order, max_candidates: usize, now: DateTime<Utc>) -> Self {
        Self {
            pair: order.pair.clone(),
            order_id: order.id,
            side: order.side,
            price: order.price,
            amount: order.remaining,
            max_candidates,
            now,
        }
    }

    /// True when a resting order at `maker_price` is acceptable
    pub fn crosses(&self, maker_price: Amount) -> bool {
        match (self.side, self.price) {
            (_, None) => true,
            (Side::Buy, Some(limit)) => maker_price <= limit,
            (Side::Sell, Some(limit)) => maker_price >= limit,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn order(side: Side, price: &str, amount: &str) -> Order {
        let request = NewOrder::limit(
            UserId::new("alice").unwrap(),
            "BTC-USDT".parse().unwrap(),
            side,
            amt(price),
            amt(amount),
        );
        Order::accept(OrderId::new(), &request, Utc::now())
    }

    #[test]
    fn test_apply_fill_keeps_invariant() {
        let mut o = order(Side::Sell, "100", "10");
        o.apply_fill(amt("4")).unwrap();
        assert_eq!(o.remaining, amt("6"));
        assert_eq!(o.filled, amt("4"));
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        assert!(o.is_consistent());

        o.apply_fill(amt("6")).unwrap();
        assert_eq!(o.status, OrderStatus::Filled);
        assert!(o.remaining.is_zero());
        assert!(o.is_consistent());
    }

    #[test]
    fn test_overfill_is_rejected_without_mutation() {
        let mut o = order(Side::Sell, "100", "1");
        assert!(o.apply_fill(amt("1.5")).is_err());
        assert_eq!(o.remaining, amt("1"));
        assert_eq!(o.status, OrderStatus::Active);

        o.clamp_filled();
        assert!(o.remaining.is_zero());
        assert!(o.is_consistent());
    }

    #[test]
    fn test_trade_assigns_buyer_and_seller() {
        let maker = order(Side::Sell, "100", "10");
        let mut taker = order(Side::Buy, "101", "4");
        taker.user_id = UserId::new("bob").unwrap();

        let ts = Utc::now();
        let trade = Trade::between(&taker, &maker, amt("100"), amt("4"), ts, 0);
        assert_eq!(trade.buyer_id.as_str(), "bob");
        assert_eq!(trade.seller_id.as_str(), "alice");
        assert_eq!(trade.price, amt("100"));

        let again = Trade::between(&taker, &maker, amt("100"), amt("4"), ts, 0);
        assert_eq!(trade.id, again.id);
        let next = Trade::between(&taker, &maker, amt("100"), amt("4"), ts, 1);
        assert_ne!(trade.id, next.id);
    }

    #[test]
    fn test_price_level_aggregates() {
        let mut level = PriceLevel::new(amt("100"));
        let a = OrderId::new();
        let b = OrderId::new();
        level.push(a, amt("3")).unwrap();
        level.push(b, amt("2")).unwrap();
        assert_eq!(level.total_remaining, amt("5"));
        assert_eq!(level.order_count(), 2);

        level.reduce(amt("1"));
        assert!(level.remove(a, amt("2")));
        assert!(!level.remove(a, amt("2")));
        assert_eq!(level.total_remaining, amt("2"));
        assert_eq!(level.order_ids.front(), Some(&b));
    }

    #[test]
    fn test_match_request_crossing() {
        let mut buy = order(Side::Buy, "100", "1");
        let request = MatchRequest::for_order(&buy, 100, Utc::now());
        assert!(request.crosses(amt("99.5")));
        assert!(request.crosses(amt("100")));
        assert!(!request.crosses(amt("100.01")));

        buy.side = Side::Sell;
        let request = MatchRequest::for_order(&buy, 100, Utc::now());
        assert!(request.crosses(amt("100.01")));
        assert!(!request.crosses(amt("99")));

        buy.price = None;
        let request = MatchRequest::for_order(&buy, 100, Utc::now());
        assert!(request.crosses(amt("1")));
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut o = order(Side::Buy, "1", "1");
        assert!(!o.is_expired(now));
        o.expires_at = Some(now - Duration::seconds(1));
        assert!(o.is_expired(now));
    }
}
