//! Configuration parsing and validation for SpotX
//!
//! The whole process is driven by one YAML document (`MasterConfig`).
//! `${VAR}` placeholders are substituted from the environment before
//! parsing, every optional section falls back to the values in
//! [`defaults`], and [`validate_config`] produces a report of errors,
//! warnings and applied defaults before anything starts.

use common::{Amount, Pair, Scale};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

/// Root of the configuration document
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MasterConfig {
    pub exchange: ExchangeConfig,
    pub pairs: Vec<PairConfig>,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub pools: PoolsConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub distribution: DistributionConfig,
    #[serde(default)]
    pub server: ListenConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
}

// ============================================================================
// Pairs
// ============================================================================

/// One tradable pair and its numeric precision
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PairConfig {
    /// Pair symbol, e.g. `BTC-USDT`
    pub symbol: String,
    #[serde(rename = "price_decimals")]
    pub price_decimals: u32,
    #[serde(rename = "amount_decimals")]
    pub amount_decimals: u32,
    /// Smallest accepted order amount, as a decimal string
    #[serde(rename = "min_amount")]
    #[serde(default = "default_min_amount")]
    pub min_amount: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl PairConfig {
    /// Parsed pair symbol
    pub fn pair(&self) -> common::Result<Pair> {
        self.symbol.parse()
    }

    /// Scale applied to prices
    pub fn price_scale(&self) -> common::Result<Scale> {
        Ok(Scale::new(self.price_decimals)?)
    }

    /// Scale applied to amounts
    pub fn amount_scale(&self) -> common::Result<Scale> {
        Ok(Scale::new(self.amount_decimals)?)
    }

    /// Parsed minimum amount
    pub fn min_amount(&self) -> common::Result<Amount> {
        Ok(self.amount_scale()?.parse(&self.min_amount)?)
    }
}

// ============================================================================
// Matching & batching
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatchingConfig {
    /// Resting orders examined per incoming order
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Trades retained per pair in the trade log
    #[serde(default = "default_trade_retention")]
    pub trade_retention: usize,
    /// Terminal orders retained per pair for lookups
    #[serde(default = "default_archive_retention")]
    pub archive_retention: usize,
    /// Book snapshot cache lifetime
    #[serde(default = "default_snapshot_cache_ms")]
    pub snapshot_cache_ms: u64,
    #[serde(default = "default_book_depth")]
    pub default_depth: usize,
    #[serde(default = "default_max_book_depth")]
    pub max_depth: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            trade_retention: default_trade_retention(),
            archive_retention: default_archive_retention(),
            snapshot_cache_ms: default_snapshot_cache_ms(),
            default_depth: default_book_depth(),
            max_depth: default_max_book_depth(),
        }
    }
}

impl MatchingConfig {
    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_millis(self.snapshot_cache_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Flush as soon as this many operations are queued
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Flush at the latest after this long
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Attempts after the first failed flush
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay added per retry attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Bounded queue feeding the batch writer
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl BatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

// ============================================================================
// Pools & workers
// ============================================================================

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct PoolSizeConfig {
    /// Objects preallocated at startup
    pub floor: usize,
    /// Hard limit on objects handed out at once
    pub ceiling: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolsConfig {
    #[serde(default = "default_order_pool")]
    pub orders: PoolSizeConfig,
    #[serde(rename = "trade_buffers")]
    #[serde(default = "default_trade_buffer_pool")]
    pub trade_buffers: PoolSizeConfig,
    #[serde(rename = "byte_buffers")]
    #[serde(default = "default_byte_buffer_pool")]
    pub byte_buffers: PoolSizeConfig,
    /// Initial capacity of each pooled byte buffer
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            orders: default_order_pool(),
            trade_buffers: default_trade_buffer_pool(),
            byte_buffers: default_byte_buffer_pool(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkersConfig {
    /// Runtime worker threads; hardware parallelism when unset
    #[serde(default)]
    pub threads: Option<usize>,
    /// Per-pair command queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            threads: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl WorkersConfig {
    /// Resolved worker thread count
    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// `memory` or `redis`
    #[serde(rename = "type")]
    #[serde(default = "default_store_type")]
    pub store_type: String,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: default_store_type(),
            redis: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "db_index")]
    #[serde(default)]
    pub db_index: u8,
    #[serde(rename = "key_prefix")]
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl RedisConfig {
    /// Connection URL understood by the redis client
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db_index)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.password, self.host, self.port, self.db_index
            )
        }
    }
}

// ============================================================================
// Distribution
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DistributionConfig {
    #[serde(rename = "ping_interval_secs")]
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(rename = "liveness_timeout_secs")]
    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,
    #[serde(rename = "max_protocol_violations")]
    #[serde(default = "default_max_protocol_violations")]
    pub max_protocol_violations: u32,
    /// Outbound messages buffered per connection before it is dropped
    #[serde(rename = "outbound_buffer")]
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(rename = "max_subscriptions")]
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions: usize,
    #[serde(default)]
    pub auth: DistributionAuthConfig,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            liveness_timeout_secs: default_liveness_timeout_secs(),
            max_protocol_violations: default_max_protocol_violations(),
            outbound_buffer: default_outbound_buffer(),
            max_subscriptions: default_max_subscriptions(),
            auth: DistributionAuthConfig::default(),
        }
    }
}

impl DistributionConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DistributionAuthConfig {
    /// HS256 secret used to verify client tokens
    #[serde(rename = "jwt_secret")]
    #[serde(default)]
    pub jwt_secret: String,
    /// Required `iss` claim, if any
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(rename = "leeway_secs")]
    #[serde(default)]
    pub leeway_secs: u64,
}

// ============================================================================
// Server, logging, metrics
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(rename = "http_port")]
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(rename = "ws_port")]
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            ws_port: default_ws_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty`, `json` or `compact`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_master_config() {
        let yaml = include_str!("../../../master_config/master_config.yaml");
        let config: MasterConfig = serde_yaml::from_str(yaml).expect("Failed to parse YAML");

        assert_eq!(config.exchange.name, "SpotX");
        assert_eq!(config.pairs.len(), 3);
        assert_eq!(config.pairs[0].pair().unwrap().to_string(), "BTC-USDT");
        assert_eq!(config.matching.max_candidates, 100);
        assert_eq!(config.batch.flush_interval_ms, 5);
        assert_eq!(config.distribution.liveness_timeout_secs, 60);
        assert_eq!(config.store.store_type, "memory");
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let yaml = r#"
exchange:
  name: "Mini"
  version: "0.1.0"
pairs:
  - symbol: "ETH-USD"
    price_decimals: 2
    amount_decimals: 4
"#;
        let config: MasterConfig = serde_yaml::from_str(yaml).expect("Failed to parse YAML");

        assert_eq!(config.matching.max_candidates, default_max_candidates());
        assert_eq!(config.batch.max_batch_size, default_max_batch_size());
        assert_eq!(config.pools.orders.ceiling, default_order_pool().ceiling);
        assert_eq!(config.distribution.ping_interval_secs, 30);
        assert_eq!(config.server.ws_port, default_ws_port());
        assert!(config.pairs[0].enabled);
        assert_eq!(config.pairs[0].min_amount().unwrap(), Amount::ZERO);
    }

    #[test]
    fn test_redis_url() {
        let redis = RedisConfig {
            host: "localhost".into(),
            port: 6379,
            password: String::new(),
            db_index: 2,
            key_prefix: "spotx".into(),
        };
        assert_eq!(redis.url(), "redis://localhost:6379/2");

        let redis = RedisConfig {
            password: "pw".into(),
            ..redis
        };
        assert_eq!(redis.url(), "redis://:pw@localhost:6379/2");
    }
}
