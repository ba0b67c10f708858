use crate::PoolSizeConfig;

pub fn default_enabled() -> bool {
    true
}

pub fn default_min_amount() -> String {
    "0".to_string()
}

// Matching

pub fn default_max_candidates() -> usize {
    100
}

pub fn default_trade_retention() -> usize {
    1000
}

pub fn default_archive_retention() -> usize {
    100_000
}

pub fn default_snapshot_cache_ms() -> u64 {
    250
}

pub fn default_book_depth() -> usize {
    20
}

pub fn default_max_book_depth() -> usize {
    500
}

// Batching

pub fn default_max_batch_size() -> usize {
    64
}

pub fn default_flush_interval_ms() -> u64 {
    5
}

pub fn default_max_retries() -> u32 {
    3
}

pub fn default_retry_backoff_ms() -> u64 {
    2
}

pub fn default_queue_capacity() -> usize {
    10_000
}

// Pools

pub fn default_order_pool() -> PoolSizeConfig {
    PoolSizeConfig {
        floor: 1024,
        ceiling: 65_536,
    }
}

pub fn default_trade_buffer_pool() -> PoolSizeConfig {
    PoolSizeConfig {
        floor: 64,
        ceiling: 4096,
    }
}

pub fn default_byte_buffer_pool() -> PoolSizeConfig {
    PoolSizeConfig {
        floor: 64,
        ceiling: 4096,
    }
}

pub fn default_buffer_capacity() -> usize {
    4096
}

// Store

pub fn default_store_type() -> String {
    "memory".to_string()
}

pub fn default_redis_port() -> u16 {
    6379
}

pub fn default_key_prefix() -> String {
    "spotx".to_string()
}

// Distribution

pub fn default_ping_interval_secs() -> u64 {
    30
}

pub fn default_liveness_timeout_secs() -> u64 {
    60
}

pub fn default_max_protocol_violations() -> u32 {
    5
}

pub fn default_outbound_buffer() -> usize {
    1024
}

pub fn default_max_subscriptions() -> usize {
    100
}

// Server

pub fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub fn default_http_port() -> u16 {
    8083
}

pub fn default_ws_port() -> u16 {
    7083
}

pub fn default_metrics_port() -> u16 {
    9090
}

// Logging

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}
