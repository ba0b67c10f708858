//! Channel name grammar
//!
//! The set is closed: `book:<PAIR>`, `trades:<PAIR>` and `orders:<USER_ID>`.
//! Anything else is rejected at the boundary.

use common::{Pair, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::DistributionError;

/// A validated subscription channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Channel {
    /// Aggregated book snapshots of a pair
    Book(Pair),
    /// Trade feed of a pair
    Trades(Pair),
    /// Order events of one user; private
    Orders(UserId),
}

impl Channel {
    /// Channel kind, used as a metric label
    pub fn kind(&self) -> &'static str {
        match self {
            Channel::Book(_) => "book",
            Channel::Trades(_) => "trades",
            Channel::Orders(_) => "orders",
        }
    }

    pub fn pair(&self) -> Option<&Pair> {
        match self {
            Channel::Book(pair) | Channel::Trades(pair) => Some(pair),
            Channel::Orders(_) => None,
        }
    }

    /// Owner of a private channel
    pub fn owner(&self) -> Option<&UserId> {
        match self {
            Channel::Orders(user) => Some(user),
            _ => None,
        }
    }
}

impl FromStr for Channel {
    type Err = DistributionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DistributionError::InvalidChannel(s.to_string());
        let (prefix, rest) = s.split_once(':').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }
        match prefix {
            "book" => rest.parse().map(Channel::Book).map_err(|_| invalid()),
            "trades" => rest.parse().map(Channel::Trades).map_err(|_| invalid()),
            "orders" => UserId::new(rest).map(Channel::Orders).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Book(pair) => write!(f, "book:{}", pair),
            Channel::Trades(pair) => write!(f, "trades:{}", pair),
            Channel::Orders(user) => write!(f, "orders:{}", user),
        }
    }
}

impl TryFrom<String> for Channel {
    type Error = DistributionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_channels() {
        let book: Channel = "book:BTC-USDT".parse().unwrap();
        assert_eq!(book.kind(), "book");
        assert_eq!(book.to_string(), "book:BTC-USDT");

        let trades: Channel = "trades:eth/usdt".parse().unwrap();
        assert_eq!(trades.to_string(), "trades:ETH-USDT");

        let orders: Channel = "orders:alice_01".parse().unwrap();
        assert_eq!(orders.owner().unwrap().as_str(), "alice_01");
        assert!(orders.pair().is_none());
    }

    #[test]
    fn test_rejects_unknown_patterns() {
        for raw in ["", "book", "book:", "candles:BTC-USDT", "book:BTC", "orders:bad user", "BOOK:BTC-USDT"] {
            assert!(
                matches!(raw.parse::<Channel>(), Err(DistributionError::InvalidChannel(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_serde_as_string() {
        let channel: Channel = serde_json::from_str("\"trades:BTC-USDT\"").unwrap();
        assert_eq!(serde_json::to_string(&channel).unwrap(), "\"trades:BTC-USDT\"");
        assert!(serde_json::from_str::<Channel>("\"ticker:BTC-USDT\"").is_err());
    }
}
