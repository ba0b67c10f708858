use crate::*;
use common::{Amount, Pair, MAX_DECIMALS};
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Exchange name is required")]
    MissingExchangeName,

    #[error("Invalid version format: {0}. Must be in format X.Y.Z (e.g., 1.0.0)")]
    InvalidVersionFormat(String),

    #[error("No trading pairs defined")]
    NoPairs,

    #[error("Pair {symbol}: {message}")]
    InvalidPair { symbol: String, message: String },

    #[error("Pair {0} is defined more than once")]
    DuplicatePair(String),

    #[error("At least one trading pair must be enabled")]
    NoEnabledPairs,

    #[error("{field} must be a positive integer")]
    InvalidPositiveInteger { field: String },

    #[error("Pool '{pool}': floor {floor} exceeds ceiling {ceiling}")]
    InvalidPoolBounds {
        pool: String,
        floor: usize,
        ceiling: usize,
    },

    #[error("Matching: {message}")]
    InvalidMatching { message: String },

    #[error("Store: {message}")]
    InvalidStore { message: String },

    #[error("Distribution: {message}")]
    InvalidDistribution { message: String },

    #[error("Server: {message}")]
    InvalidServer { message: String },

    #[error("Invalid log format: {0}. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("Environment variable '{var}' is missing or invalid: {message}")]
    InvalidEnvVar { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DefaultApplied {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub defaults_applied: Vec<DefaultApplied>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            defaults_applied: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_default(&mut self, field: &str, value: &str) {
        self.defaults_applied.push(DefaultApplied {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_config(config: &MasterConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_exchange(&config.exchange, &mut report);
    validate_pairs(&config.pairs, &mut report);
    validate_matching(&config.matching, &mut report);
    validate_batch(&config.batch, &mut report);
    validate_pools(&config.pools, &mut report);
    validate_workers(&config.workers, &mut report);
    validate_store(&config.store, &mut report);
    validate_distribution(&config.distribution, &mut report);
    validate_server(config, &mut report);

    let formats = ["pretty", "json", "compact"];
    if !formats.contains(&config.logging.format.as_str()) {
        report.add_error(ValidationError::InvalidLogFormat(config.logging.format.clone()));
    }

    report
}

fn validate_exchange(exchange: &ExchangeConfig, report: &mut ValidationReport) {
    if exchange.name.trim().is_empty() {
        report.add_error(ValidationError::MissingExchangeName);
    }

    let version_ok = Regex::new(r"^\d+\.\d+\.\d+$")
        .map(|re| re.is_match(&exchange.version))
        .unwrap_or(false);
    if !version_ok {
        report.add_error(ValidationError::InvalidVersionFormat(exchange.version.clone()));
    }
}

fn validate_pairs(pairs: &[PairConfig], report: &mut ValidationReport) {
    if pairs.is_empty() {
        report.add_error(ValidationError::NoPairs);
        return;
    }

    let mut seen: HashSet<Pair> = HashSet::new();
    for pair_config in pairs {
        let symbol = pair_config.symbol.clone();
        let invalid = |message: String| ValidationError::InvalidPair {
            symbol: symbol.clone(),
            message,
        };

        match pair_config.pair() {
            Ok(pair) => {
                if !seen.insert(pair.clone()) {
                    report.add_error(ValidationError::DuplicatePair(pair.to_string()));
                }
            }
            Err(e) => report.add_error(invalid(e.to_string())),
        }

        for (field, decimals) in [
            ("price_decimals", pair_config.price_decimals),
            ("amount_decimals", pair_config.amount_decimals),
        ] {
            if decimals > MAX_DECIMALS {
                report.add_error(invalid(format!(
                    "{} {} exceeds maximum of {}",
                    field, decimals, MAX_DECIMALS
                )));
            }
        }

        if pair_config.amount_decimals <= MAX_DECIMALS {
            match pair_config.min_amount() {
                Ok(min) if min == Amount::ZERO => report.add_warning(
                    &format!("pairs.{}.min_amount", pair_config.symbol),
                    "min_amount is zero; any positive amount is accepted",
                ),
                Ok(_) => {}
                Err(e) => report.add_error(invalid(format!("min_amount: {}", e))),
            }
        }
    }

    if !pairs.iter().any(|p| p.enabled) {
        report.add_error(ValidationError::NoEnabledPairs);
    }
}

fn validate_matching(matching: &MatchingConfig, report: &mut ValidationReport) {
    for (field, value) in [
        ("matching.max_candidates", matching.max_candidates),
        ("matching.trade_retention", matching.trade_retention),
        ("matching.default_depth", matching.default_depth),
        ("matching.max_depth", matching.max_depth),
    ] {
        if value == 0 {
            report.add_error(ValidationError::InvalidPositiveInteger {
                field: field.to_string(),
            });
        }
    }

    if matching.default_depth > matching.max_depth {
        report.add_error(ValidationError::InvalidMatching {
            message: format!(
                "default_depth {} exceeds max_depth {}",
                matching.default_depth, matching.max_depth
            ),
        });
    }

    if matching.snapshot_cache_ms >= 1000 {
        report.add_error(ValidationError::InvalidMatching {
            message: format!(
                "snapshot_cache_ms {} must stay below one second",
                matching.snapshot_cache_ms
            ),
        });
    }
}

fn validate_batch(batch: &BatchConfig, report: &mut ValidationReport) {
    if batch.max_batch_size == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "batch.max_batch_size".to_string(),
        });
    }
    if batch.flush_interval_ms == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "batch.flush_interval_ms".to_string(),
        });
    }
    if batch.queue_capacity == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "batch.queue_capacity".to_string(),
        });
    }
    if batch.max_retries == 0 {
        report.add_warning(
            "batch.max_retries",
            "Retries disabled; a single store failure fails the whole batch",
        );
    }
}

fn validate_pools(pools: &PoolsConfig, report: &mut ValidationReport) {
    for (name, size) in [
        ("orders", pools.orders),
        ("trade_buffers", pools.trade_buffers),
        ("byte_buffers", pools.byte_buffers),
    ] {
        if size.ceiling == 0 {
            report.add_error(ValidationError::InvalidPositiveInteger {
                field: format!("pools.{}.ceiling", name),
            });
        }
        if size.floor > size.ceiling {
            report.add_error(ValidationError::InvalidPoolBounds {
                pool: name.to_string(),
                floor: size.floor,
                ceiling: size.ceiling,
            });
        }
    }
}

fn validate_workers(workers: &WorkersConfig, report: &mut ValidationReport) {
    match workers.threads {
        Some(0) => report.add_error(ValidationError::InvalidPositiveInteger {
            field: "workers.threads".to_string(),
        }),
        Some(_) => {}
        None => report.add_default("workers.threads", &workers.thread_count().to_string()),
    }

    if workers.queue_capacity == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "workers.queue_capacity".to_string(),
        });
    }
}

fn validate_store(store: &StoreConfig, report: &mut ValidationReport) {
    match store.store_type.as_str() {
        "memory" => {}
        "redis" => match &store.redis {
            None => report.add_error(ValidationError::InvalidStore {
                message: "store type 'redis' requires a redis section".to_string(),
            }),
            Some(redis) => {
                if redis.host.is_empty() {
                    report.add_error(ValidationError::InvalidStore {
                        message: "redis.host is required".to_string(),
                    });
                }
                if substitution::has_unresolved_env_vars(&redis.host) {
                    report.add_error(ValidationError::InvalidEnvVar {
                        var: redis.host.clone(),
                        message: "redis.host placeholder was not substituted".to_string(),
                    });
                }
                if redis.key_prefix.is_empty() {
                    report.add_error(ValidationError::InvalidStore {
                        message: "redis.key_prefix must not be empty".to_string(),
                    });
                }
            }
        },
        other => report.add_error(ValidationError::InvalidStore {
            message: format!("Invalid store type '{}'. Must be one of: memory, redis", other),
        }),
    }
}

fn validate_distribution(distribution: &DistributionConfig, report: &mut ValidationReport) {
    if distribution.ping_interval_secs == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "distribution.ping_interval_secs".to_string(),
        });
    }
    if distribution.liveness_timeout_secs <= distribution.ping_interval_secs {
        report.add_error(ValidationError::InvalidDistribution {
            message: format!(
                "liveness_timeout_secs ({}) must exceed ping_interval_secs ({})",
                distribution.liveness_timeout_secs, distribution.ping_interval_secs
            ),
        });
    }
    if distribution.outbound_buffer == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "distribution.outbound_buffer".to_string(),
        });
    }
    if distribution.max_protocol_violations == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "distribution.max_protocol_violations".to_string(),
        });
    }

    let secret = &distribution.auth.jwt_secret;
    if secret.is_empty() {
        report.add_error(ValidationError::InvalidDistribution {
            message: "auth.jwt_secret is required".to_string(),
        });
    } else if substitution::has_unresolved_env_vars(secret) {
        report.add_error(ValidationError::InvalidEnvVar {
            var: secret.clone(),
            message: "auth.jwt_secret placeholder was not substituted".to_string(),
        });
    } else if secret.len() < 32 {
        report.add_warning(
            "distribution.auth.jwt_secret",
            "Secret is shorter than 32 bytes",
        );
    }
}

fn validate_server(config: &MasterConfig, report: &mut ValidationReport) {
    let server = &config.server;
    if server.http_port == server.ws_port {
        report.add_error(ValidationError::InvalidServer {
            message: format!("http_port and ws_port are both {}", server.http_port),
        });
    }
    if config.metrics.enabled
        && (config.metrics.port == server.http_port || config.metrics.port == server.ws_port)
    {
        report.add_error(ValidationError::InvalidServer {
            message: format!("metrics port {} collides with a server port", config.metrics.port),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> MasterConfig {
        let mut config = generate_default_config();
        config.distribution.auth.jwt_secret = "0123456789abcdef0123456789abcdef".to_string();
        config.workers.threads = Some(4);
        config
    }

    #[test]
    fn test_default_config_is_valid_once_secret_set() {
        let report = validate_config(&valid_config());
        assert!(report.is_valid(), "unexpected errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_unresolved_secret_is_rejected() {
        let report = validate_config(&generate_default_config());
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidEnvVar { .. })));
    }

    #[test]
    fn test_pair_errors() {
        let mut config = valid_config();
        config.pairs.push(config.pairs[0].clone());
        config.pairs.push(PairConfig {
            symbol: "NOPE".to_string(),
            price_decimals: 30,
            amount_decimals: 2,
            min_amount: "0.001".to_string(),
            enabled: true,
        });

        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicatePair(p) if p == "BTC-USDT")));
        let pair_errors = report
            .errors
            .iter()
            .filter(|e| matches!(e, ValidationError::InvalidPair { symbol, .. } if symbol == "NOPE"))
            .count();
        // bad symbol, price decimals, min_amount precision
        assert_eq!(pair_errors, 3);
    }

    #[test]
    fn test_no_enabled_pairs() {
        let mut config = valid_config();
        for pair in &mut config.pairs {
            pair.enabled = false;
        }
        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::NoEnabledPairs)));
    }

    #[test]
    fn test_pool_and_batch_bounds() {
        let mut config = valid_config();
        config.pools.orders.floor = 10;
        config.pools.orders.ceiling = 5;
        config.batch.max_batch_size = 0;

        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidPoolBounds { pool, .. } if pool == "orders")));
        assert!(report.errors.iter().any(|e| matches!(
            e,
            ValidationError::InvalidPositiveInteger { field } if field == "batch.max_batch_size"
        )));
    }

    #[test]
    fn test_snapshot_cache_must_stay_sub_second() {
        let mut config = valid_config();
        config.matching.snapshot_cache_ms = 1000;
        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidMatching { .. })));
    }

    #[test]
    fn test_redis_store_requires_section() {
        let mut config = valid_config();
        config.store.store_type = "redis".to_string();
        let report = validate_config(&config);
        assert!(!report.is_valid());

        config.store.store_type = "postgres".to_string();
        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidStore { .. })));
    }

    #[test]
    fn test_liveness_must_exceed_ping() {
        let mut config = valid_config();
        config.distribution.liveness_timeout_secs = 30;
        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidDistribution { .. })));
    }

    #[test]
    fn test_short_secret_warns_and_threads_default() {
        let mut config = valid_config();
        config.distribution.auth.jwt_secret = "short".to_string();
        config.workers.threads = None;
        let report = validate_config(&config);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.defaults_applied[0].field, "workers.threads");
    }

    #[test]
    fn test_port_collision() {
        let mut config = valid_config();
        config.server.ws_port = config.server.http_port;
        assert!(!validate_config(&config).is_valid());
    }
}
