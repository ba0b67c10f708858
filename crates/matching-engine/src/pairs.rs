//! Trading pair registry and order validation
//!
//! Validation is synchronous and runs before an order touches a pool, a
//! queue or the store.

use chrono::{DateTime, Utc};
use common::{Amount, OrderType, Pair};
use serde::Serialize;
use std::collections::HashMap;

use crate::domain::NewOrder;
use crate::error::MatchingError;
use crate::store::PairScales;
use crate::Result;

/// Trading rules of one pair
#[derive(Debug, Clone, Serialize)]
pub struct PairSpec {
    pub pair: Pair,
    #[serde(skip)]
    pub scales: PairScales,
    pub price_decimals: u32,
    pub amount_decimals: u32,
    pub min_amount: Amount,
    pub enabled: bool,
}

impl PairSpec {
    pub fn from_config(config: &config::PairConfig) -> Result<Self> {
        let invalid = |e: common::Error| MatchingError::invalid(format!("pair {}: {}", config.symbol, e));
        let price = config.price_scale().map_err(invalid)?;
        let amount = config.amount_scale().map_err(invalid)?;
        Ok(Self {
            pair: config.pair().map_err(invalid)?,
            scales: PairScales { price, amount },
            price_decimals: price.decimals(),
            amount_decimals: amount.decimals(),
            min_amount: config.min_amount().map_err(invalid)?,
            enabled: config.enabled,
        })
    }

    /// Check a submission against this pair's rules
    pub fn validate(&self, order: &NewOrder, now: DateTime<Utc>) -> Result<()> {
        if !self.enabled {
            return Err(MatchingError::UnknownPair(format!("{} is disabled", self.pair)));
        }
        if order.amount.is_zero() {
            return Err(MatchingError::invalid("amount must be greater than zero"));
        }
        self.scales.amount.check(order.amount)?;
        if order.amount < self.min_amount {
            return Err(MatchingError::invalid(format!(
                "amount {} is below the minimum {} for {}",
                order.amount, self.min_amount, self.pair
            )));
        }

        match (order.order_type, order.price) {
            (OrderType::Limit, None) => {
                return Err(MatchingError::invalid("limit orders require a price"));
            }
            (OrderType::Limit, Some(price)) => {
                if price.is_zero() {
                    return Err(MatchingError::invalid("price must be greater than zero"));
                }
                self.scales.price.check(price)?;
            }
            (OrderType::Market, Some(_)) => {
                return Err(MatchingError::invalid("market orders must not carry a price"));
            }
            (OrderType::Market, None) => {}
        }

        if let Some(expires_at) = order.expires_at {
            if expires_at <= now {
                return Err(MatchingError::invalid(format!(
                    "expiry {} is already in the past",
                    expires_at.to_rfc3339()
                )));
            }
        }
        Ok(())
    }
}

/// All configured pairs
#[derive(Debug, Clone, Default)]
pub struct PairRegistry {
    pairs: HashMap<Pair, PairSpec>,
}

impl PairRegistry {
    pub fn from_config(configs: &[config::PairConfig]) -> Result<Self> {
        let mut pairs = HashMap::with_capacity(configs.len());
        for config in configs {
            let spec = PairSpec::from_config(config)?;
            pairs.insert(spec.pair.clone(), spec);
        }
        Ok(Self { pairs })
    }

    pub fn get(&self, pair: &Pair) -> Result<&PairSpec> {
        self.pairs
            .get(pair)
            .ok_or_else(|| MatchingError::UnknownPair(pair.to_string()))
    }

    /// Validate an order against its pair
    pub fn validate(&self, order: &NewOrder, now: DateTime<Utc>) -> Result<&PairSpec> {
        let spec = self.get(&order.pair)?;
        spec.validate(order, now)?;
        Ok(spec)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PairSpec> {
        self.pairs.values()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
