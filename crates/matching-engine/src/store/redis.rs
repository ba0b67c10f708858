//! Redis store implementation for the Matching Engine
//!
//! Every atomic operation is a Lua script, so each one runs as a single
//! indivisible unit on the server. Amounts cross the wire as integer units
//! in the pair's scale; the scripts never see a decimal.
//!
//! Keys are built inside the scripts from a configured prefix, so the store
//! targets a single Redis node rather than a cluster.

use async_trait::async_trait;
use chrono::Utc;
use common::{Amount, OrderId, OrderStatus, Pair, Scale, Side};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, error, info, warn};

use crate::domain::{BookSnapshot, MatchRequest, Order, PriceLevelView, Trade};
use crate::script::ExecutionReport;
use crate::store::cache::SnapshotCache;
use crate::store::traits::{BookStore, FillOutcome, PairScales, StoreError, StoreResult};
use config::{MatchingConfig, RedisConfig};

/// Largest unit count a Lua number represents exactly
pub const MAX_SAFE_UNITS: u128 = 1 << 53;

macro_rules! lua {
    ($file:literal) => {
        Script::new(concat!(
            include_str!("scripts/common.lua"),
            include_str!(concat!("scripts/", $file))
        ))
    };
}

struct Scripts {
    add_order: Script,
    remove_order: Script,
    fast_match: Script,
    execute_trades: Script,
    fill_order: Script,
    get_book: Script,
    orders_at_price: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            add_order: lua!("add_order.lua"),
            remove_order: lua!("remove_order.lua"),
            fast_match: lua!("fast_match.lua"),
            execute_trades: lua!("execute_trades.lua"),
            fill_order: lua!("fill_order.lua"),
            get_book: lua!("get_book.lua"),
            orders_at_price: lua!("orders_at_price.lua"),
        }
    }
}

/// Order as returned by the scripts: base json, filled, remaining, status, seq
type OrderReply = Vec<String>;

const ORDER_FIELDS: &[&str] = &["base", "filled", "remaining", "status", "seq"];

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Redis(err.to_string())
        }
    }
}

/// Redis-backed book store
pub struct RedisBookStore {
    connection: ConnectionManager,
    scripts: Scripts,
    scales: DashMap<Pair, PairScales>,
    cache: SnapshotCache,
    key_prefix: String,
    trade_retention: usize,
    archive_retention: usize,
}

impl RedisBookStore {
    /// Connect to Redis
    pub async fn connect(config: &RedisConfig, matching: &MatchingConfig) -> StoreResult<Self> {
        info!(
            host = %config.host,
            port = config.port,
            db = config.db_index,
            prefix = %config.key_prefix,
            "Connecting to Redis"
        );

        let client = redis::Client::open(config.url())?;
        let connection = client.get_connection_manager().await?;

        Ok(Self {
            connection,
            scripts: Scripts::load(),
            scales: DashMap::new(),
            cache: SnapshotCache::new(matching.snapshot_ttl()),
            key_prefix: config.key_prefix.clone(),
            trade_retention: matching.trade_retention,
            archive_retention: matching.archive_retention,
        })
    }

    fn scales(&self, pair: &Pair) -> StoreResult<PairScales> {
        self.scales
            .get(pair)
            .map(|s| *s.value())
            .ok_or_else(|| StoreError::UnknownPair(pair.to_string()))
    }

    fn order_key(&self, order_id: OrderId) -> String {
        format!("{}:order:{}", self.key_prefix, order_id)
    }

    fn trades_key(&self, pair: &Pair) -> String {
        format!("{}:trades:{}", self.key_prefix, pair)
    }

    fn decode_order(&self, reply: OrderReply) -> StoreResult<Order> {
        let [base, filled, remaining, status, seq]: [String; 5] = reply
            .try_into()
            .map_err(|r: Vec<String>| StoreError::Serialization(format!("order reply has {} fields", r.len())))?;

        let mut order: Order = serde_json::from_str(&base)?;
        let scale = self.scales(&order.pair)?.amount;
        order.filled = from_units(scale, &filled)?;
        order.remaining = from_units(scale, &remaining)?;
        order.status = serde_json::from_value(serde_json::Value::String(status))?;
        order.sequence = seq
            .parse()
            .map_err(|_| StoreError::Serialization(format!("bad sequence '{}'", seq)))?;
        Ok(order)
    }

    fn decode_optional(&self, reply: OrderReply) -> StoreResult<Option<Order>> {
        if reply.is_empty() {
            Ok(None)
        } else {
            self.decode_order(reply).map(Some)
        }
    }

    fn decode_orders(&self, replies: Vec<OrderReply>) -> StoreResult<Vec<Order>> {
        replies.into_iter().map(|r| self.decode_order(r)).collect()
    }

    async fn remove(&self, order_id: OrderId, status: OrderStatus) -> StoreResult<Option<Order>> {
        let mut connection = self.connection.clone();
        let reply: OrderReply = self
            .scripts
            .remove_order
            .arg(&self.key_prefix)
            .arg(order_id.to_string())
            .arg(status.as_str())
            .arg(self.archive_retention)
            .invoke_async(&mut connection)
            .await?;

        let removed = self.decode_optional(reply)?;
        if let Some(order) = &removed {
            self.cache.invalidate(&order.pair);
            info!(order_id = %order.id, pair = %order.pair, status = %order.status, "Order removed from book");
        }
        Ok(removed)
    }
}

fn to_units(scale: Scale, amount: Amount) -> StoreResult<String> {
    let units = scale.to_integer(amount)?;
    if units > MAX_SAFE_UNITS {
        return Err(StoreError::Consistency(format!(
            "{} exceeds the largest amount the Redis store can hold at {} decimals",
            amount,
            scale.decimals()
        )));
    }
    Ok(units.to_string())
}

fn from_units(scale: Scale, units: &str) -> StoreResult<Amount> {
    let units: u128 = units
        .parse()
        .map_err(|_| StoreError::Serialization(format!("bad unit count '{}'", units)))?;
    Ok(scale.from_integer(units)?)
}

fn parse_count(value: &str) -> StoreResult<usize> {
    value
        .parse()
        .map_err(|_| StoreError::Serialization(format!("bad count '{}'", value)))
}

#[async_trait]
impl BookStore for RedisBookStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn register_pair(&self, pair: &Pair, scales: PairScales) -> StoreResult<()> {
        self.scales.insert(pair.clone(), scales);
        debug!(pair = %pair, "Pair registered with Redis store");
        Ok(())
    }

    async fn add_order(&self, order: Order) -> StoreResult<Order> {
        let scales = self.scales(&order.pair)?;
        let price = match order.price {
            Some(price) => to_units(scales.price, price)?,
            None if order.is_live() => {
                return Err(StoreError::Consistency(format!(
                    "market order {} cannot rest in the book",
                    order.id
                )))
            }
            None => String::new(),
        };
        let expires = order
            .expires_at
            .map(|at| at.timestamp_millis().to_string())
            .unwrap_or_default();

        let mut connection = self.connection.clone();
        let reply: OrderReply = self
            .scripts
            .add_order
            .arg(&self.key_prefix)
            .arg(order.id.to_string())
            .arg(order.pair.to_string())
            .arg(order.side.as_str())
            .arg(price)
            .arg(to_units(scales.amount, order.amount)?)
            .arg(to_units(scales.amount, order.filled)?)
            .arg(to_units(scales.amount, order.remaining)?)
            .arg(order.status.as_str())
            .arg(expires)
            .arg(serde_json::to_string(&order)?)
            .arg(self.archive_retention)
            .invoke_async(&mut connection)
            .await?;

        self.cache.invalidate(&order.pair);
        self.decode_order(reply)
    }

    async fn cancel_order(&self, order_id: OrderId) -> StoreResult<Option<Order>> {
        self.remove(order_id, OrderStatus::Cancelled).await
    }

    async fn expire_order(&self, order_id: OrderId) -> StoreResult<Option<Order>> {
        self.remove(order_id, OrderStatus::Expired).await
    }

    async fn record_fill(&self, order_id: OrderId, delta: Amount) -> StoreResult<FillOutcome> {
        let Some(order) = self.get_order(order_id).await? else {
            return Ok(FillOutcome::NotLive(order_id));
        };
        let scales = self.scales(&order.pair)?;

        let mut connection = self.connection.clone();
        let (reply, clamped): (OrderReply, String) = self
            .scripts
            .fill_order
            .arg(&self.key_prefix)
            .arg(order.pair.to_string())
            .arg(order_id.to_string())
            .arg(to_units(scales.amount, delta)?)
            .arg(self.archive_retention)
            .invoke_async(&mut connection)
            .await?;
        self.cache.invalidate(&order.pair);

        let Some(updated) = self.decode_optional(reply)? else {
            warn!(order_id = %order_id, "Fill for an order that is not live");
            return Ok(FillOutcome::NotLive(order_id));
        };
        if clamped == "1" {
            error!(order_id = %order_id, pair = %order.pair, "NegativeRemainingDetected: clamping order to filled");
            metrics::counter!("consistency_violations_total", "kind" => "negative_remaining").increment(1);
            Ok(FillOutcome::Clamped(updated))
        } else {
            Ok(FillOutcome::Applied(updated))
        }
    }

    async fn execute_trades(&self, pair: &Pair, trades: Vec<Trade>) -> StoreResult<ExecutionReport> {
        if trades.is_empty() {
            return Ok(ExecutionReport::default());
        }
        let scales = self.scales(pair)?;

        let mut invocation = self.scripts.execute_trades.prepare_invoke();
        invocation
            .arg(&self.key_prefix)
            .arg(pair.to_string())
            .arg(self.trade_retention)
            .arg(self.archive_retention);
        for trade in &trades {
            invocation
                .arg(trade.id.to_string())
                .arg(trade.maker_order_id.to_string())
                .arg(to_units(scales.amount, trade.amount)?)
                .arg(serde_json::to_string(trade)?);
        }

        let mut connection = self.connection.clone();
        let (entries, makers, seen, seen_makers, clamped): (
            Vec<String>,
            Vec<OrderReply>,
            Vec<String>,
            Vec<OrderReply>,
            Vec<String>,
        ) = invocation.invoke_async(&mut connection).await?;
        self.cache.invalidate(pair);

        if entries.len() != trades.len() {
            return Err(StoreError::Serialization(format!(
                "EXECUTE_TRADES returned {} entries for {} trades",
                entries.len(),
                trades.len()
            )));
        }

        let mut report = ExecutionReport {
            makers: self.decode_orders(makers)?,
            clamped: trades
                .iter()
                .filter(|t| clamped.contains(&t.maker_order_id.to_string()))
                .map(|t| t.maker_order_id)
                .collect(),
            ..Default::default()
        };

        let mut seen_makers = seen_makers.into_iter();
        for (trade, entry) in trades.iter().zip(entries) {
            let stored: Trade = serde_json::from_str(&entry)?;
            if !seen.contains(&trade.id.to_string()) {
                report.trades.push(stored);
                continue;
            }
            let maker = seen_makers.next().unwrap_or_default();
            if stored.same_execution(trade) {
                debug!(trade_id = %trade.id, pair = %pair, "Trade already applied by an earlier attempt");
                if let Some(maker) = self.decode_optional(maker)? {
                    report.makers.push(maker);
                }
                report.replayed.push(stored.id);
                report.trades.push(stored);
            } else {
                report.duplicates.push(trade.id);
            }
        }

        for id in &report.duplicates {
            warn!(trade_id = %id, pair = %pair, "DuplicateTradeId: trade already recorded, skipping");
            metrics::counter!("consistency_violations_total", "kind" => "duplicate_trade_id").increment(1);
        }
        for id in &report.clamped {
            error!(order_id = %id, pair = %pair, "NegativeRemainingDetected: clamping order to filled");
            metrics::counter!("consistency_violations_total", "kind" => "negative_remaining").increment(1);
        }

        Ok(report)
    }

    async fn get_order(&self, order_id: OrderId) -> StoreResult<Option<Order>> {
        let mut connection = self.connection.clone();
        let fields: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.order_key(order_id))
            .arg(ORDER_FIELDS)
            .query_async(&mut connection)
            .await?;

        let fields: Option<Vec<String>> = fields.into_iter().collect();
        match fields {
            Some(reply) => self.decode_order(reply).map(Some),
            None => Ok(None),
        }
    }

    async fn get_book(&self, pair: &Pair, depth: usize) -> StoreResult<BookSnapshot> {
        if let Some(snapshot) = self.cache.get(pair, depth) {
            return Ok(snapshot);
        }
        let scales = self.scales(pair)?;
        let generation = self.cache.generation(pair);

        let mut connection = self.connection.clone();
        let (sequence, bids, asks): (Vec<String>, Vec<Vec<String>>, Vec<Vec<String>>) = self
            .scripts
            .get_book
            .arg(&self.key_prefix)
            .arg(pair.to_string())
            .arg(depth)
            .invoke_async(&mut connection)
            .await?;

        let levels = |rows: Vec<Vec<String>>| -> StoreResult<Vec<PriceLevelView>> {
            rows.into_iter()
                .map(|row| match row.as_slice() {
                    [price, total, count] => Ok(PriceLevelView {
                        price: from_units(scales.price, price)?,
                        amount: from_units(scales.amount, total)?,
                        order_count: parse_count(count)?,
                    }),
                    _ => Err(StoreError::Serialization("malformed level row".to_string())),
                })
                .collect()
        };

        let snapshot = BookSnapshot {
            pair: pair.clone(),
            bids: levels(bids)?,
            asks: levels(asks)?,
            sequence: match sequence.first() {
                Some(seq) => seq
                    .parse()
                    .map_err(|_| StoreError::Serialization(format!("bad sequence '{}'", seq)))?,
                None => 0,
            },
            timestamp: Utc::now(),
        };
        self.cache.put(depth, generation, &snapshot);
        Ok(snapshot)
    }

    async fn get_orders_at_price(&self, pair: &Pair, side: Side, price: Amount) -> StoreResult<Vec<Order>> {
        let scales = self.scales(pair)?;
        let mut connection = self.connection.clone();
        let replies: Vec<OrderReply> = self
            .scripts
            .orders_at_price
            .arg(&self.key_prefix)
            .arg(pair.to_string())
            .arg(side.as_str())
            .arg(to_units(scales.price, price)?)
            .invoke_async(&mut connection)
            .await?;
        self.decode_orders(replies)
    }

    async fn fast_match(&self, request: &MatchRequest) -> StoreResult<Vec<Order>> {
        let scales = self.scales(&request.pair)?;
        let limit = match request.price {
            Some(price) => to_units(scales.price, price)?,
            None => String::new(),
        };

        let mut connection = self.connection.clone();
        let replies: Vec<OrderReply> = self
            .scripts
            .fast_match
            .arg(&self.key_prefix)
            .arg(request.pair.to_string())
            .arg(request.side.as_str())
            .arg(limit)
            .arg(to_units(scales.amount, request.amount)?)
            .arg(request.max_candidates)
            .arg(request.now.timestamp_millis())
            .invoke_async(&mut connection)
            .await?;
        self.decode_orders(replies)
    }

    async fn recent_trades(&self, pair: &Pair, limit: usize) -> StoreResult<Vec<Trade>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut connection = self.connection.clone();
        let rows: Vec<String> = redis::cmd("LRANGE")
            .arg(self.trades_key(pair))
            .arg(0)
            .arg(limit as isize - 1)
            .query_async(&mut connection)
            .await?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut connection = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversion_bounds() {
        let scale = Scale::new(8).unwrap();
        let amount: Amount = "1.5".parse().unwrap();
        assert_eq!(to_units(scale, amount).unwrap(), "150000000");
        assert_eq!(from_units(scale, "150000000").unwrap(), amount);

        // 2^53 units at 8 decimals is about 90 million
        let huge: Amount = "100000000".parse().unwrap();
        assert!(matches!(to_units(scale, huge), Err(StoreError::Consistency(_))));
        assert!(from_units(scale, "-1").is_err());
    }

    #[test]
    fn test_scripts_share_prelude() {
        let scripts = Scripts::load();
        // distinct bodies hash differently even with a shared prelude
        assert_ne!(scripts.add_order.get_hash(), scripts.remove_order.get_hash());
        assert_ne!(scripts.get_book.get_hash(), scripts.fast_match.get_hash());
    }
}
