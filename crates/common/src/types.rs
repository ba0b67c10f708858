//! Common types used across SpotX
//!
//! This module provides the fundamental domain types used throughout
//! the exchange system.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Namespace for deterministic trade identifiers
const TRADE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_3b2e_8a4d_4c59_9e21_7d0b_5a13_c842);

/// Unique identifier for orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub Uuid);

impl OrderId {
    /// Create a new random OrderId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an OrderId from an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::invalid_input(format!("order id '{}': {}", s, e)))
    }
}

/// Unique identifier for trades
///
/// Trade ids are derived from the two order ids, the match timestamp and
/// the fill's position within the match, so replaying the same execution
/// yields the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeId(pub Uuid);

impl TradeId {
    /// Derive the id of a fill between `taker` and `maker`
    pub fn derive(taker: OrderId, maker: OrderId, timestamp_nanos: i64, fill_index: u32) -> Self {
        let mut name = Vec::with_capacity(44);
        name.extend_from_slice(taker.0.as_bytes());
        name.extend_from_slice(maker.0.as_bytes());
        name.extend_from_slice(&timestamp_nanos.to_be_bytes());
        name.extend_from_slice(&fill_index.to_be_bytes());
        Self(Uuid::new_v5(&TRADE_ID_NAMESPACE, &name))
    }
}

impl std::fmt::Display for TradeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the user owning an order
///
/// User ids come from authentication tokens and appear in channel names
/// (`orders:<USER_ID>`), so they are restricted to `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Maximum accepted length
    pub const MAX_LEN: usize = 64;

    /// Validate and wrap a user id
    pub fn new(id: impl Into<String>) -> Result<Self, Error> {
        let id = id.into();
        if id.is_empty() || id.len() > Self::MAX_LEN {
            return Err(Error::invalid_input(format!(
                "user id must be 1..={} characters",
                Self::MAX_LEN
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::invalid_input(format!(
                "user id '{}' contains invalid characters",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        UserId::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl FromStr for UserId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UserId::new(s)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl Side {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Returns true if this is a buy order
    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }

    /// Returns true if this is a sell order
    pub fn is_sell(&self) -> bool {
        matches!(self, Side::Sell)
    }

    /// Lowercase name used in keys and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" | "bid" => Ok(Side::Buy),
            "sell" | "ask" => Ok(Side::Sell),
            other => Err(Error::invalid_input(format!("unknown side '{}'", other))),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Limit order - execute at specified price or better
    #[default]
    Limit,
    /// Market order - execute immediately at best available prices
    Market,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
        }
    }
}

impl FromStr for OrderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "limit" => Ok(OrderType::Limit),
            "market" => Ok(OrderType::Market),
            other => Err(Error::invalid_input(format!("unknown order type '{}'", other))),
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Resting with nothing filled yet
    #[default]
    Active,
    /// Resting with part of the amount filled
    PartiallyFilled,
    /// Completely filled (terminal)
    Filled,
    /// Cancelled by the owner or by the engine (terminal)
    Cancelled,
    /// Passed its expiry before filling (terminal)
    Expired,
    /// Refused at validation (terminal, never entered the book)
    Rejected,
}

impl OrderStatus {
    /// Returns true once the order can no longer change
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Active | OrderStatus::PartiallyFilled)
    }

    /// Lowercase name used in keys and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Active => "active",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
            OrderStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asset symbol (e.g., "BTC", "ETH")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new Symbol, validating `[A-Z0-9]{2,10}` after uppercasing
    pub fn new(s: impl Into<String>) -> Result<Self, Error> {
        let s = s.into().trim().to_uppercase();
        if !(2..=10).contains(&s.len()) || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::invalid_input(format!("invalid asset symbol '{}'", s)));
        }
        Ok(Self(s))
    }

    /// Get the symbol as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trading pair (e.g., "BTC-USD", "ETH-USDT")
///
/// Serialized as its canonical `BASE-QUOTE` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    /// Base asset (e.g., BTC in BTC-USD)
    pub base: Symbol,
    /// Quote asset (e.g., USD in BTC-USD)
    pub quote: Symbol,
}

impl Pair {
    /// Create a new trading pair
    pub fn new(base: &str, quote: &str) -> Result<Self, Error> {
        Ok(Self {
            base: Symbol::new(base)?,
            quote: Symbol::new(quote)?,
        })
    }

    /// Get the pair as a string (e.g., "BTC-USD")
    pub fn as_string(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }
}

impl FromStr for Pair {
    type Err = Error;

    /// Accepts `BTC-USD`, `BTC/USD` and `BTC_USD` in any case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(['-', '/', '_']);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) => Pair::new(base, quote),
            _ => Err(Error::invalid_input(format!(
                "invalid trading pair '{}', expected BASE-QUOTE",
                s
            ))),
        }
    }
}

impl TryFrom<String> for Pair {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pair> for String {
    fn from(value: Pair) -> Self {
        value.as_string()
    }
}

impl std::fmt::Display for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}
