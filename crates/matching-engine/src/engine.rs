//! Core matching algorithm
//!
//! Price-time priority over the candidates returned by FAST_MATCH. The
//! planner is a pure function: it never touches the store, it only decides
//! which trades an incoming order produces and which candidates have
//! expired. The caller turns the plan into EXECUTE_TRADES / EXPIRE_ORDER /
//! ADD_ORDER scripts.

use chrono::{DateTime, Utc};
use common::{Amount, OrderId, OrderStatus, PrecisionResult};
use tracing::debug;

use crate::domain::{MatchRequest, Order, Trade};

/// Candidate cap used when none is configured
pub const DEFAULT_MAX_CANDIDATES: usize = 100;

/// Result of planning one incoming order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchPlan {
    /// Candidates skipped because their expiry has passed
    pub expired: Vec<OrderId>,
    /// Number of candidates that produced a trade
    pub makers_touched: usize,
}

/// Matching rules for one engine
///
/// CRITICAL PROPERTIES:
/// 1. Deterministic (same inputs → same outputs, always)
/// 2. Pure function (no external state, no side effects)
/// 3. Price-time priority (candidates are consumed in the order given)
/// 4. Trades execute at the maker's price
#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    max_candidates: usize,
}

impl Matcher {
    pub fn new(max_candidates: usize) -> Self {
        Self {
            max_candidates: max_candidates.max(1),
        }
    }

    pub fn max_candidates(&self) -> usize {
        self.max_candidates
    }

    /// FAST_MATCH input for a taker
    pub fn request(&self, taker: &Order, now: DateTime<Utc>) -> MatchRequest {
        MatchRequest::for_order(taker, self.max_candidates, now)
    }

    /// Match `taker` against `candidates` (best first)
    ///
    /// Trades are appended to `trades`; the taker's `filled`, `remaining`
    /// and `status` are updated in place. Candidates are never mutated.
    /// A market taker that is not fully filled ends up cancelled.
    pub fn plan(
        &self,
        taker: &mut Order,
        candidates: &[Order],
        now: DateTime<Utc>,
        trades: &mut Vec<Trade>,
    ) -> PrecisionResult<MatchPlan> {
        let mut plan = MatchPlan::default();
        let request = self.request(taker, now);

        for maker in candidates.iter().take(self.max_candidates) {
            if taker.remaining.is_zero() {
                break;
            }
            if maker.is_expired(now) {
                plan.expired.push(maker.id);
                continue;
            }
            if !maker.is_live() || maker.id == taker.id || maker.side == taker.side {
                continue;
            }
            let Some(price) = maker.price else { continue };
            if !request.crosses(price) {
                // candidates are best first, nothing after this crosses either
                break;
            }

            let amount: Amount = taker.remaining.min(maker.remaining);
            if amount.is_zero() {
                continue;
            }
            taker.apply_fill(amount)?;

            let trade = Trade::between(taker, maker, price, amount, now, plan.makers_touched as u32);
            debug!(
                trade_id = %trade.id,
                pair = %trade.pair,
                price = %trade.price,
                amount = %trade.amount,
                "Trade planned"
            );
            trades.push(trade);
            plan.makers_touched += 1;
        }

        if taker.is_market() && taker.is_live() {
            taker.status = OrderStatus::Cancelled;
        }

        Ok(plan)
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CANDIDATES)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewOrder;
    use chrono::Duration;
    use common::{Side, UserId};

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn resting(side: Side, price: &str, amount: &str, sequence: u64) -> Order {
        let request = NewOrder::limit(
            UserId::new("maker").unwrap(),
            "BTC-USDT".parse().unwrap(),
            side,
            amt(price),
            amt(amount),
        );
        let mut order = Order::accept(OrderId::new(), &request, Utc::now());
        order.sequence = sequence;
        order
    }

    fn taker(side: Side, price: &str, amount: &str) -> Order {
        let request = NewOrder::limit(
            UserId::new("taker").unwrap(),
            "BTC-USDT".parse().unwrap(),
            side,
            amt(price),
            amt(amount),
        );
        Order::accept(OrderId::new(), &request, Utc::now())
    }

    #[test]
    fn test_basic_match() {
        let matcher = Matcher::default();
        let sell = resting(Side::Sell, "100", "10", 1);
        let mut buy = taker(Side::Buy, "100", "10");

        let mut trades = Vec::new();
        matcher.plan(&mut buy, &[sell.clone()], Utc::now(), &mut trades).unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].amount, amt("10"));
        assert_eq!(trades[0].price, amt("100"));
        assert_eq!(trades[0].maker_order_id, sell.id);
        assert_eq!(buy.status, OrderStatus::Filled);
    }

    #[test]
    fn test_partial_fill() {
        let matcher = Matcher::default();
        let sell = resting(Side::Sell, "100", "5", 1);
        let mut buy = taker(Side::Buy, "100", "10");

        let mut trades = Vec::new();
        matcher.plan(&mut buy, &[sell], Utc::now(), &mut trades).unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].amount, amt("5"));
        assert_eq!(buy.remaining, amt("5"));
        assert_eq!(buy.status, OrderStatus::PartiallyFilled);
    }

    #[test]
    fn test_price_time_priority() {
        let matcher = Matcher::default();
        let sell1 = resting(Side::Sell, "100", "10", 1);
        let sell2 = resting(Side::Sell, "100", "10", 2);
        let sell3 = resting(Side::Sell, "100", "10", 3);
        let mut buy = taker(Side::Buy, "100", "15");

        let mut trades = Vec::new();
        matcher
            .plan(&mut buy, &[sell1.clone(), sell2.clone(), sell3], Utc::now(), &mut trades)
            .unwrap();

        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].maker_order_id, sell1.id);
        assert_eq!(trades[0].amount, amt("10"));
        assert_eq!(trades[1].maker_order_id, sell2.id);
        assert_eq!(trades[1].amount, amt("5"));
    }

    #[test]
    fn test_crossing_executes_at_maker_price() {
        let matcher = Matcher::default();
        let bid = resting(Side::Buy, "100", "10", 1);
        let mut ask = taker(Side::Sell, "95", "10");

        let mut trades = Vec::new();
        matcher.plan(&mut ask, &[bid], Utc::now(), &mut trades).unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, amt("100"));
        assert_eq!(trades[0].taker_side, Side::Sell);
    }

    #[test]
    fn test_no_crossing() {
        let matcher = Matcher::default();
        let ask = resting(Side::Sell, "100", "10", 1);
        let mut bid = taker(Side::Buy, "95", "10");

        let mut trades = Vec::new();
        matcher.plan(&mut bid, &[ask], Utc::now(), &mut trades).unwrap();

        assert!(trades.is_empty());
        assert_eq!(bid.status, OrderStatus::Active);
        assert_eq!(bid.remaining, amt("10"));
    }

    #[test]
    fn test_expired_candidates_are_skipped() {
        let matcher = Matcher::default();
        let now = Utc::now();
        let mut stale = resting(Side::Sell, "99", "10", 1);
        stale.expires_at = Some(now - Duration::seconds(1));
        let fresh = resting(Side::Sell, "100", "10", 2);
        let mut buy = taker(Side::Buy, "100", "4");

        let mut trades = Vec::new();
        let plan = matcher.plan(&mut buy, &[stale.clone(), fresh.clone()], now, &mut trades).unwrap();

        assert_eq!(plan.expired, vec![stale.id]);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].maker_order_id, fresh.id);
    }

    #[test]
    fn test_market_remainder_is_cancelled() {
        let matcher = Matcher::default();
        let ask = resting(Side::Sell, "100", "2", 1);
        let request = NewOrder::market(
            UserId::new("taker").unwrap(),
            "BTC-USDT".parse().unwrap(),
            Side::Buy,
            amt("5"),
        );
        let mut market = Order::accept(OrderId::new(), &request, Utc::now());

        let mut trades = Vec::new();
        matcher.plan(&mut market, &[ask], Utc::now(), &mut trades).unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(market.filled, amt("2"));
        assert_eq!(market.remaining, amt("3"));
        assert_eq!(market.status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_candidate_cap() {
        let matcher = Matcher::new(2);
        let makers: Vec<Order> = (1..=5).map(|i| resting(Side::Sell, "100", "1", i)).collect();
        let mut buy = taker(Side::Buy, "100", "5");

        let mut trades = Vec::new();
        matcher.plan(&mut buy, &makers, Utc::now(), &mut trades).unwrap();

        assert_eq!(trades.len(), 2);
        assert_eq!(buy.remaining, amt("3"));
    }

    #[test]
    fn test_decimal_amounts_are_exact() {
        let matcher = Matcher::default();
        let a = resting(Side::Sell, "0.1", "0.1", 1);
        let b = resting(Side::Sell, "0.1", "0.2", 2);
        let mut buy = taker(Side::Buy, "0.1", "0.3");

        let mut trades = Vec::new();
        matcher.plan(&mut buy, &[a, b], Utc::now(), &mut trades).unwrap();

        assert_eq!(buy.status, OrderStatus::Filled);
        assert!(buy.remaining.is_zero());
        assert_eq!(buy.filled, amt("0.3"));
    }

    #[test]
    fn test_determinism() {
        let matcher = Matcher::default();
        let now = Utc::now();
        let makers = vec![
            resting(Side::Sell, "99", "5", 1),
            resting(Side::Sell, "100", "10", 2),
        ];
        let buy = taker(Side::Buy, "100", "12");

        let run = || {
            let mut taker = buy.clone();
            let mut trades = Vec::new();
            matcher.plan(&mut taker, &makers, now, &mut trades).unwrap();
            (taker, trades)
        };

        let (taker1, trades1) = run();
        let (taker2, trades2) = run();
        assert_eq!(taker1, taker2);
        assert_eq!(trades1, trades2);
    }
}
