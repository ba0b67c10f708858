//! In-memory store implementation for the Matching Engine
//!
//! Each pair owns a [`PairBook`] behind its own `parking_lot::Mutex`, so
//! operations on different pairs never contend. Locks are never held across
//! an `.await`.

use async_trait::async_trait;
use chrono::Utc;
use common::{Amount, OrderId, OrderStatus, Pair, Side, TradeId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::{BookSnapshot, MatchRequest, Order, PriceLevel, Trade};
use crate::script::ExecutionReport;
use crate::store::cache::SnapshotCache;
use crate::store::traits::{BookStore, FillOutcome, PairScales, StoreError, StoreResult};

// ============================================================================
// Pair Book
// ============================================================================

/// Book, order records and trade log of one pair
///
/// CRITICAL PROPERTIES:
/// 1. Bids iterate highest price first, asks lowest price first
/// 2. Each price level keeps its orders in insertion order
/// 3. Only live orders are referenced from a price level
pub struct PairBook {
    pair: Pair,
    bids: BTreeMap<Reverse<Amount>, PriceLevel>,
    asks: BTreeMap<Amount, PriceLevel>,
    live: HashMap<OrderId, Order>,
    archive: HashMap<OrderId, Order>,
    archive_order: VecDeque<OrderId>,
    trades: VecDeque<Trade>,
    trade_ids: HashSet<TradeId>,
    sequence: u64,
    trade_retention: usize,
    archive_retention: usize,
    /// Archived ids dropped since the last drain
    evicted: Vec<OrderId>,
}

impl PairBook {
    pub fn new(pair: Pair, trade_retention: usize, archive_retention: usize) -> Self {
        Self {
            pair,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            live: HashMap::new(),
            archive: HashMap::new(),
            archive_order: VecDeque::new(),
            trades: VecDeque::new(),
            trade_ids: HashSet::new(),
            sequence: 0,
            trade_retention,
            archive_retention,
            evicted: Vec::new(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    pub fn get(&self, order_id: &OrderId) -> Option<&Order> {
        self.live.get(order_id).or_else(|| self.archive.get(order_id))
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    fn level_mut(&mut self, side: Side, price: Amount) -> &mut PriceLevel {
        match side {
            Side::Buy => self
                .bids
                .entry(Reverse(price))
                .or_insert_with(|| PriceLevel::new(price)),
            Side::Sell => self
                .asks
                .entry(price)
                .or_insert_with(|| PriceLevel::new(price)),
        }
    }

    fn existing_level_mut(&mut self, side: Side, price: Amount) -> Option<&mut PriceLevel> {
        match side {
            Side::Buy => self.bids.get_mut(&Reverse(price)),
            Side::Sell => self.asks.get_mut(&price),
        }
    }

    fn drop_level_if_empty(&mut self, side: Side, price: Amount) {
        let empty = self
            .existing_level_mut(side, price)
            .map(|level| level.is_empty())
            .unwrap_or(false);
        if empty {
            match side {
                Side::Buy => self.bids.remove(&Reverse(price)),
                Side::Sell => self.asks.remove(&price),
            };
        }
    }

    fn archive(&mut self, order: Order) {
        self.archive_order.push_back(order.id);
        self.archive.insert(order.id, order);
        while self.archive_order.len() > self.archive_retention {
            if let Some(old) = self.archive_order.pop_front() {
                self.archive.remove(&old);
                self.evicted.push(old);
            }
        }
    }

    /// Ids that left the archive since the last call
    pub fn take_evicted(&mut self) -> Vec<OrderId> {
        std::mem::take(&mut self.evicted)
    }

    /// ADD_ORDER
    pub fn add(&mut self, mut order: Order) -> StoreResult<Order> {
        if let Some(existing) = self.get(&order.id) {
            debug!(order_id = %order.id, "Order already stored, add skipped");
            return Ok(existing.clone());
        }

        order.sequence = self.next_sequence();

        if !order.is_live() {
            self.archive(order.clone());
            return Ok(order);
        }

        let price = match order.price {
            Some(price) if !order.is_market() => price,
            _ => {
                return Err(StoreError::Consistency(format!(
                    "market order {} cannot rest in the book",
                    order.id
                )))
            }
        };

        self.level_mut(order.side, price).push(order.id, order.remaining)?;
        self.live.insert(order.id, order.clone());
        Ok(order)
    }

    /// CANCEL_ORDER / EXPIRE_ORDER
    pub fn remove(&mut self, order_id: OrderId, status: OrderStatus) -> Option<Order> {
        let mut order = self.live.remove(&order_id)?;
        if let Some(price) = order.price {
            if let Some(level) = self.existing_level_mut(order.side, price) {
                level.remove(order_id, order.remaining);
            }
            self.drop_level_if_empty(order.side, price);
        }
        order.status = status;
        self.next_sequence();
        self.archive(order.clone());
        Some(order)
    }

    /// Apply a fill to a live order
    ///
    /// A fill larger than the remaining amount is clamped: the order is
    /// forced to filled and the violation is logged and counted.
    pub fn fill(&mut self, order_id: OrderId, delta: Amount) -> FillOutcome {
        let Some(order) = self.live.get_mut(&order_id) else {
            error!(
                order_id = %order_id,
                pair = %self.pair,
                "Fill for an order that is not live"
            );
            metrics::counter!("consistency_violations_total", "kind" => "fill_not_live").increment(1);
            return FillOutcome::NotLive(order_id);
        };

        let before = order.remaining;
        let clamped = match order.apply_fill(delta) {
            Ok(()) => false,
            Err(e) => {
                error!(
                    order_id = %order_id,
                    pair = %self.pair,
                    remaining = %before,
                    fill = %delta,
                    error = %e,
                    "NegativeRemainingDetected: clamping order to filled"
                );
                metrics::counter!("consistency_violations_total", "kind" => "negative_remaining")
                    .increment(1);
                order.clamp_filled();
                true
            }
        };

        let side = order.side;
        let price = order.price;
        let done = !order.is_live();
        let applied = before.saturating_sub(order.remaining);

        if let Some(price) = price {
            if let Some(level) = self.existing_level_mut(side, price) {
                if done {
                    level.remove(order_id, before);
                } else {
                    level.reduce(applied);
                }
            }
            self.drop_level_if_empty(side, price);
        }

        let snapshot = if done {
            match self.live.remove(&order_id) {
                Some(order) => {
                    self.archive(order.clone());
                    order
                }
                None => return FillOutcome::NotLive(order_id),
            }
        } else {
            match self.live.get(&order_id) {
                Some(order) => order.clone(),
                None => return FillOutcome::NotLive(order_id),
            }
        };

        if clamped {
            FillOutcome::Clamped(snapshot)
        } else {
            FillOutcome::Applied(snapshot)
        }
    }

    /// EXECUTE_TRADES
    pub fn execute(&mut self, trades: Vec<Trade>) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for mut trade in trades {
            if self.trade_ids.contains(&trade.id) {
                let stored = self.trades.iter().rev().find(|t| t.id == trade.id).cloned();
                match stored {
                    Some(stored) if stored.same_execution(&trade) => {
                        debug!(
                            trade_id = %trade.id,
                            pair = %self.pair,
                            "Trade already applied by an earlier attempt"
                        );
                        if let Some(maker) = self.get(&stored.maker_order_id) {
                            report.makers.push(maker.clone());
                        }
                        report.replayed.push(stored.id);
                        report.trades.push(stored);
                    }
                    _ => {
                        warn!(
                            trade_id = %trade.id,
                            pair = %self.pair,
                            "DuplicateTradeId: trade already recorded, skipping"
                        );
                        metrics::counter!("consistency_violations_total", "kind" => "duplicate_trade_id")
                            .increment(1);
                        report.duplicates.push(trade.id);
                    }
                }
                continue;
            }

            match self.fill(trade.maker_order_id, trade.amount) {
                FillOutcome::Applied(maker) => report.makers.push(maker),
                FillOutcome::Clamped(maker) => {
                    report.clamped.push(maker.id);
                    report.makers.push(maker);
                }
                FillOutcome::NotLive(_) => {}
            }

            trade.sequence = self.next_sequence();
            self.trade_ids.insert(trade.id);
            self.trades.push_back(trade.clone());
            while self.trades.len() > self.trade_retention {
                if let Some(old) = self.trades.pop_front() {
                    self.trade_ids.remove(&old.id);
                }
            }
            report.trades.push(trade);
        }

        report
    }

    /// FAST_MATCH
    pub fn candidates(&self, request: &MatchRequest) -> Vec<Order> {
        match request.side {
            Side::Buy => collect_candidates(self.asks.values(), &self.live, request),
            Side::Sell => collect_candidates(self.bids.values(), &self.live, request),
        }
    }

    pub fn orders_at(&self, side: Side, price: Amount) -> Vec<Order> {
        let level = match side {
            Side::Buy => self.bids.get(&Reverse(price)),
            Side::Sell => self.asks.get(&price),
        };
        level
            .map(|level| {
                level
                    .order_ids
                    .iter()
                    .filter_map(|id| self.live.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// GET_ORDERBOOK_FAST
    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        BookSnapshot {
            pair: self.pair.clone(),
            bids: self.bids.values().take(depth).map(PriceLevel::view).collect(),
            asks: self.asks.values().take(depth).map(PriceLevel::view).collect(),
            sequence: self.sequence,
            timestamp: Utc::now(),
        }
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Vec<Trade> {
        self.trades.iter().rev().take(limit).cloned().collect()
    }

    /// Check every level aggregate against the live orders
    pub fn check_levels(&self) -> Result<(), String> {
        let levels = self
            .bids
            .values()
            .map(|l| (Side::Buy, l))
            .chain(self.asks.values().map(|l| (Side::Sell, l)));

        let mut referenced = 0;
        for (side, level) in levels {
            let mut total = Amount::ZERO;
            for id in &level.order_ids {
                let order = self
                    .live
                    .get(id)
                    .ok_or_else(|| format!("level {} references unknown order {}", level.price, id))?;
                if order.side != side || order.price != Some(level.price) {
                    return Err(format!("order {} sits in the wrong level", id));
                }
                if !order.is_consistent() || order.remaining.is_zero() {
                    return Err(format!("order {} breaks remaining = amount - filled", id));
                }
                total = total.checked_add(order.remaining).map_err(|e| e.to_string())?;
            }
            if total != level.total_remaining {
                return Err(format!(
                    "level {} total {} != sum {}",
                    level.price, level.total_remaining, total
                ));
            }
            if level.is_empty() {
                return Err(format!("empty level {} was not removed", level.price));
            }
            referenced += level.order_count();
        }

        if referenced != self.live.len() {
            return Err(format!(
                "{} live orders but {} referenced by levels",
                self.live.len(),
                referenced
            ));
        }
        Ok(())
    }
}

fn collect_candidates<'a>(
    levels: impl Iterator<Item = &'a PriceLevel>,
    live: &HashMap<OrderId, Order>,
    request: &MatchRequest,
) -> Vec<Order> {
    let mut out = Vec::new();
    let mut covered = Amount::ZERO;

    'levels: for level in levels {
        if !request.crosses(level.price) {
            break;
        }
        for id in &level.order_ids {
            if out.len() >= request.max_candidates || covered >= request.amount {
                break 'levels;
            }
            let Some(order) = live.get(id) else { continue };
            if !order.is_expired(request.now) {
                covered = covered.checked_add(order.remaining).unwrap_or(request.amount);
            }
            out.push(order.clone());
        }
    }
    out
}

// ============================================================================
// Store
// ============================================================================

/// In-memory book store
///
/// Fast but non-persistent; data is lost on restart.
pub struct InMemoryBookStore {
    books: DashMap<Pair, Arc<Mutex<PairBook>>>,
    /// order id -> pair, for lookups by id
    index: DashMap<OrderId, Pair>,
    cache: SnapshotCache,
    trade_retention: usize,
    archive_retention: usize,
}

impl InMemoryBookStore {
    pub fn new(trade_retention: usize, archive_retention: usize, snapshot_ttl: Duration) -> Self {
        Self {
            books: DashMap::new(),
            index: DashMap::new(),
            cache: SnapshotCache::new(snapshot_ttl),
            trade_retention,
            archive_retention,
        }
    }

    pub fn from_config(config: &config::MatchingConfig) -> Self {
        Self::new(
            config.trade_retention,
            config.archive_retention,
            config.snapshot_ttl(),
        )
    }

    fn book(&self, pair: &Pair) -> StoreResult<Arc<Mutex<PairBook>>> {
        self.books
            .get(pair)
            .map(|b| Arc::clone(b.value()))
            .ok_or_else(|| StoreError::UnknownPair(pair.to_string()))
    }

    fn book_of(&self, order_id: &OrderId) -> Option<(Pair, Arc<Mutex<PairBook>>)> {
        let pair = self.index.get(order_id)?.value().clone();
        let book = self.books.get(&pair)?.value().clone();
        Some((pair, book))
    }

    /// Run a mutation under the pair lock, then fix up the index and cache
    fn mutate<R>(&self, pair: &Pair, f: impl FnOnce(&mut PairBook) -> R) -> StoreResult<R> {
        let book = self.book(pair)?;
        let (result, evicted) = {
            let mut guard = book.lock();
            let result = f(&mut *guard);
            (result, guard.take_evicted())
        };
        for id in evicted {
            self.index.remove(&id);
        }
        self.cache.invalidate(pair);
        Ok(result)
    }

    fn remove(&self, order_id: OrderId, status: OrderStatus) -> StoreResult<Option<Order>> {
        let Some((pair, _)) = self.book_of(&order_id) else {
            return Ok(None);
        };
        let removed = self.mutate(&pair, |book| book.remove(order_id, status))?;
        if let Some(order) = &removed {
            info!(order_id = %order.id, pair = %pair, status = %order.status, "Order removed from book");
        }
        Ok(removed)
    }

    /// Verify level aggregates of a pair
    pub fn check_consistency(&self, pair: &Pair) -> StoreResult<()> {
        let book = self.book(pair)?;
        let guard = book.lock();
        guard.check_levels().map_err(StoreError::Consistency)
    }
}

#[async_trait]
impl BookStore for InMemoryBookStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn register_pair(&self, pair: &Pair, _scales: PairScales) -> StoreResult<()> {
        let (trade_retention, archive_retention) = (self.trade_retention, self.archive_retention);
        self.books.entry(pair.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(PairBook::new(
                pair.clone(),
                trade_retention,
                archive_retention,
            )))
        });
        debug!(pair = %pair, "Pair registered with in-memory store");
        Ok(())
    }

    async fn add_order(&self, order: Order) -> StoreResult<Order> {
        let pair = order.pair.clone();
        let order_id = order.id;
        let stored = self.mutate(&pair, |book| book.add(order))??;
        self.index.insert(order_id, pair);
        Ok(stored)
    }

    async fn cancel_order(&self, order_id: OrderId) -> StoreResult<Option<Order>> {
        self.remove(order_id, OrderStatus::Cancelled)
    }

    async fn expire_order(&self, order_id: OrderId) -> StoreResult<Option<Order>> {
        self.remove(order_id, OrderStatus::Expired)
    }

    async fn record_fill(&self, order_id: OrderId, delta: Amount) -> StoreResult<FillOutcome> {
        let Some((pair, _)) = self.book_of(&order_id) else {
            return Ok(FillOutcome::NotLive(order_id));
        };
        self.mutate(&pair, |book| book.fill(order_id, delta))
    }

    async fn execute_trades(&self, pair: &Pair, trades: Vec<Trade>) -> StoreResult<ExecutionReport> {
        if trades.is_empty() {
            return Ok(ExecutionReport::default());
        }
        self.mutate(pair, |book| book.execute(trades))
    }

    async fn get_order(&self, order_id: OrderId) -> StoreResult<Option<Order>> {
        let Some((_, book)) = self.book_of(&order_id) else {
            return Ok(None);
        };
        let guard = book.lock();
        Ok(guard.get(&order_id).cloned())
    }

    async fn get_book(&self, pair: &Pair, depth: usize) -> StoreResult<BookSnapshot> {
        if let Some(snapshot) = self.cache.get(pair, depth) {
            return Ok(snapshot);
        }
        let generation = self.cache.generation(pair);
        let snapshot = {
            let book = self.book(pair)?;
            let guard = book.lock();
            guard.snapshot(depth)
        };
        self.cache.put(depth, generation, &snapshot);
        Ok(snapshot)
    }

    async fn get_orders_at_price(&self, pair: &Pair, side: Side, price: Amount) -> StoreResult<Vec<Order>> {
        let book = self.book(pair)?;
        let guard = book.lock();
        Ok(guard.orders_at(side, price))
    }

    async fn fast_match(&self, request: &MatchRequest) -> StoreResult<Vec<Order>> {
        let book = self.book(&request.pair)?;
        let guard = book.lock();
        Ok(guard.candidates(request))
    }

    async fn recent_trades(&self, pair: &Pair, limit: usize) -> StoreResult<Vec<Trade>> {
        let book = self.book(pair)?;
        let guard = book.lock();
        Ok(guard.recent(limit))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewOrder;
    use common::{Scale, UserId};

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn pair() -> Pair {
        "BTC-USDT".parse().unwrap()
    }

    fn scales() -> PairScales {
        PairScales {
            price: Scale::new(2).unwrap(),
            amount: Scale::new(4).unwrap(),
        }
    }

    fn limit(side: Side, price: &str, amount: &str) -> Order {
        let request = NewOrder::limit(UserId::new("u1").unwrap(), pair(), side, amt(price), amt(amount));
        Order::accept(OrderId::new(), &request, Utc::now())
    }

    async fn store() -> InMemoryBookStore {
        let store = InMemoryBookStore::new(1000, 1000, Duration::from_millis(250));
        store.register_pair(&pair(), scales()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_add_updates_level_and_sequence() {
        let store = store().await;
        let a = store.add_order(limit(Side::Sell, "100", "3")).await.unwrap();
        let b = store.add_order(limit(Side::Sell, "100", "2")).await.unwrap();
        assert!(b.sequence > a.sequence);

        let book = store.get_book(&pair(), 10).await.unwrap();
        let level = book.level(Side::Sell, amt("100")).unwrap();
        assert_eq!(level.amount, amt("5"));
        assert_eq!(level.order_count, 2);

        let at_price = store.get_orders_at_price(&pair(), Side::Sell, amt("100")).await.unwrap();
        assert_eq!(at_price.iter().map(|o| o.id).collect::<Vec<_>>(), vec![a.id, b.id]);
        store.check_consistency(&pair()).unwrap();
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let store = store().await;
        let order = limit(Side::Buy, "99", "1");
        let first = store.add_order(order.clone()).await.unwrap();
        let second = store.add_order(order).await.unwrap();
        assert_eq!(first, second);
        let book = store.get_book(&pair(), 10).await.unwrap();
        assert_eq!(book.bids[0].order_count, 1);
    }

    #[tokio::test]
    async fn test_cancel_removes_level_and_is_idempotent() {
        let store = store().await;
        let order = store.add_order(limit(Side::Buy, "99", "1")).await.unwrap();

        let cancelled = store.cancel_order(order.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(store.get_book(&pair(), 10).await.unwrap().bids.is_empty());

        assert!(store.cancel_order(order.id).await.unwrap().is_none());
        assert!(store.cancel_order(OrderId::new()).await.unwrap().is_none());
        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_record_fill_partial_then_full() {
        let store = store().await;
        let order = store.add_order(limit(Side::Sell, "100", "10")).await.unwrap();

        let outcome = store.record_fill(order.id, amt("4")).await.unwrap();
        let partial = outcome.order().unwrap();
        assert_eq!(partial.remaining, amt("6"));
        assert_eq!(
            store.get_book(&pair(), 1).await.unwrap().asks[0].amount,
            amt("6")
        );

        let outcome = store.record_fill(order.id, amt("6")).await.unwrap();
        assert_eq!(outcome.order().unwrap().status, OrderStatus::Filled);
        assert!(store.get_book(&pair(), 1).await.unwrap().asks.is_empty());
        store.check_consistency(&pair()).unwrap();
    }

    #[tokio::test]
    async fn test_record_fill_clamps_overfill() {
        let store = store().await;
        let order = store.add_order(limit(Side::Sell, "100", "1")).await.unwrap();

        let outcome = store.record_fill(order.id, amt("2")).await.unwrap();
        match outcome {
            FillOutcome::Clamped(o) => {
                assert!(o.remaining.is_zero());
                assert_eq!(o.filled, o.amount);
                assert_eq!(o.status, OrderStatus::Filled);
            }
            other => panic!("expected clamp, got {:?}", other),
        }
        assert!(store.get_book(&pair(), 1).await.unwrap().asks.is_empty());
        assert!(matches!(
            store.record_fill(order.id, amt("1")).await.unwrap(),
            FillOutcome::NotLive(_)
        ));
    }

    #[tokio::test]
    async fn test_execute_trades_replay_and_duplicates() {
        let store = store().await;
        let maker = store.add_order(limit(Side::Sell, "100", "10")).await.unwrap();
        let taker = limit(Side::Buy, "100", "4");
        let trade = Trade::between(&taker, &maker, amt("100"), amt("4"), Utc::now(), 0);

        let report = store.execute_trades(&pair(), vec![trade.clone()]).await.unwrap();
        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.makers[0].remaining, amt("6"));

        let replay = store.execute_trades(&pair(), vec![trade.clone()]).await.unwrap();
        assert_eq!(replay.trades, report.trades);
        assert_eq!(replay.replayed, vec![trade.id]);
        assert!(replay.duplicates.is_empty());
        assert_eq!(replay.makers[0].remaining, amt("6"));
        assert_eq!(
            store.get_order(maker.id).await.unwrap().unwrap().remaining,
            amt("6")
        );
        assert_eq!(store.recent_trades(&pair(), 10).await.unwrap().len(), 1);

        // same id, different fill
        let mut forged = trade;
        forged.amount = amt("1");
        let clash = store.execute_trades(&pair(), vec![forged.clone()]).await.unwrap();
        assert!(clash.trades.is_empty());
        assert!(clash.replayed.is_empty());
        assert_eq!(clash.duplicates, vec![forged.id]);
        assert_eq!(
            store.get_order(maker.id).await.unwrap().unwrap().remaining,
            amt("6")
        );
    }

    #[tokio::test]
    async fn test_trade_log_retention() {
        let store = InMemoryBookStore::new(2, 10, Duration::ZERO);
        store.register_pair(&pair(), scales()).await.unwrap();
        let maker = store.add_order(limit(Side::Sell, "100", "10")).await.unwrap();
        let taker = limit(Side::Buy, "100", "3");

        let trades: Vec<Trade> = (0..3)
            .map(|i| Trade::between(&taker, &maker, amt("100"), amt("1"), Utc::now(), i))
            .collect();
        let last_id = trades[2].id;
        store.execute_trades(&pair(), trades).await.unwrap();

        let recent = store.recent_trades(&pair(), 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, last_id);
    }

    #[tokio::test]
    async fn test_fast_match_respects_priority_and_cap() {
        let store = store().await;
        let cheap = store.add_order(limit(Side::Sell, "99", "1")).await.unwrap();
        let first = store.add_order(limit(Side::Sell, "100", "1")).await.unwrap();
        let _second = store.add_order(limit(Side::Sell, "100", "1")).await.unwrap();
        store.add_order(limit(Side::Sell, "101", "1")).await.unwrap();

        let taker = limit(Side::Buy, "100", "5");
        let request = MatchRequest::for_order(&taker, 2, Utc::now());
        let candidates = store.fast_match(&request).await.unwrap();
        assert_eq!(
            candidates.iter().map(|o| o.id).collect::<Vec<_>>(),
            vec![cheap.id, first.id]
        );

        // stops once the amount is covered
        let small = limit(Side::Buy, "100", "1");
        let request = MatchRequest::for_order(&small, 100, Utc::now());
        assert_eq!(store.fast_match(&request).await.unwrap().len(), 1);

        // no cross below the best ask
        let low = limit(Side::Buy, "98", "1");
        let request = MatchRequest::for_order(&low, 100, Utc::now());
        assert!(store.fast_match(&request).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_market_order_cannot_rest() {
        let store = store().await;
        let request = NewOrder::market(UserId::new("u1").unwrap(), pair(), Side::Buy, amt("1"));
        let order = Order::accept(OrderId::new(), &request, Utc::now());
        assert!(matches!(
            store.add_order(order).await,
            Err(StoreError::Consistency(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_pair() {
        let store = store().await;
        let other: Pair = "ETH-USDT".parse().unwrap();
        assert!(matches!(
            store.get_book(&other, 5).await,
            Err(StoreError::UnknownPair(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_cache_invalidated_on_mutation() {
        let store = store().await;
        assert!(store.get_book(&pair(), 5).await.unwrap().is_empty());
        store.add_order(limit(Side::Buy, "99", "1")).await.unwrap();
        assert_eq!(store.get_book(&pair(), 5).await.unwrap().bids.len(), 1);
    }

    #[tokio::test]
    async fn test_archive_eviction_drops_index() {
        let store = InMemoryBookStore::new(10, 1, Duration::ZERO);
        store.register_pair(&pair(), scales()).await.unwrap();
        let a = store.add_order(limit(Side::Buy, "99", "1")).await.unwrap();
        let b = store.add_order(limit(Side::Buy, "99", "1")).await.unwrap();
        store.cancel_order(a.id).await.unwrap();
        store.cancel_order(b.id).await.unwrap();

        assert!(store.get_order(a.id).await.unwrap().is_none());
        assert!(store.get_order(b.id).await.unwrap().is_some());
    }
}
