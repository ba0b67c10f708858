use crate::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MasterConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());
    parse_config(&content)
}

/// Parse a configuration document after environment substitution
pub fn parse_config(content: &str) -> Result<MasterConfig> {
    let substituted = substitution::substitute_env_vars(content)?;
    debug!("Environment variable substitution completed");

    let config: MasterConfig = serde_yaml::from_str(&substituted)
        .with_context(|| "Failed to parse YAML configuration")?;

    info!(pairs = config.pairs.len(), "Configuration loaded successfully");
    Ok(config)
}

#[instrument]
pub fn generate_default_config() -> MasterConfig {
    MasterConfig {
        exchange: ExchangeConfig {
            name: "SpotX".to_string(),
            description: "Spot order matching and market data distribution".to_string(),
            version: "1.0.0".to_string(),
        },
        pairs: vec![
            PairConfig {
                symbol: "BTC-USDT".to_string(),
                price_decimals: 2,
                amount_decimals: 6,
                min_amount: "0.0001".to_string(),
                enabled: true,
            },
            PairConfig {
                symbol: "ETH-USDT".to_string(),
                price_decimals: 2,
                amount_decimals: 5,
                min_amount: "0.001".to_string(),
                enabled: true,
            },
        ],
        matching: MatchingConfig::default(),
        batch: BatchConfig::default(),
        pools: PoolsConfig::default(),
        workers: WorkersConfig::default(),
        store: StoreConfig::default(),
        distribution: DistributionConfig {
            auth: DistributionAuthConfig {
                jwt_secret: "${SPOTX_JWT_SECRET}".to_string(),
                issuer: None,
                leeway_secs: 5,
            },
            ..DistributionConfig::default()
        },
        server: ListenConfig::default(),
        logging: LoggingConfig::default(),
        metrics: MetricsConfig::default(),
    }
}

#[instrument(skip(config))]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &MasterConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}
