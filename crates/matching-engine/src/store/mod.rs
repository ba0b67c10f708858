//! Store module for the Matching Engine
//!
//! This module provides the book store trait and its implementations.

mod cache;
mod memory;
mod redis;
mod traits;

pub use cache::SnapshotCache;
pub use memory::{InMemoryBookStore, PairBook};
pub use redis::{RedisBookStore, MAX_SAFE_UNITS};
pub use traits::*;

use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Store type selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    /// In-memory store (fast, non-persistent)
    InMemory,
    /// Redis store (persistent)
    Redis,
}

impl FromStr for StoreType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inmemory" | "in_memory" | "memory" => Ok(StoreType::InMemory),
            "redis" => Ok(StoreType::Redis),
            other => Err(StoreError::Unavailable(format!("unknown store type '{}'", other))),
        }
    }
}

/// Create a store based on configuration
pub async fn create_store(
    store: &config::StoreConfig,
    matching: &config::MatchingConfig,
) -> StoreResult<Arc<dyn BookStore>> {
    match store.store_type.parse::<StoreType>()? {
        StoreType::InMemory => {
            info!("Creating in-memory book store");
            Ok(Arc::new(InMemoryBookStore::from_config(matching)))
        }
        StoreType::Redis => {
            let redis = store
                .redis
                .as_ref()
                .ok_or_else(|| StoreError::Unavailable("Redis config required for Redis store".to_string()))?;
            info!("Creating Redis book store");
            let store = RedisBookStore::connect(redis, matching).await?;
            store.ping().await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_type_parsing() {
        assert_eq!("memory".parse::<StoreType>().unwrap(), StoreType::InMemory);
        assert_eq!("In_Memory".parse::<StoreType>().unwrap(), StoreType::InMemory);
        assert_eq!("redis".parse::<StoreType>().unwrap(), StoreType::Redis);
        assert!("postgres".parse::<StoreType>().is_err());
    }

    #[tokio::test]
    async fn test_create_memory_store() {
        let store = create_store(&config::StoreConfig::default(), &config::MatchingConfig::default())
            .await
            .unwrap();
        assert_eq!(store.backend(), "memory");
    }

    #[tokio::test]
    async fn test_redis_without_config_fails() {
        let config = config::StoreConfig {
            store_type: "redis".to_string(),
            redis: None,
        };
        assert!(create_store(&config, &config::MatchingConfig::default()).await.is_err());
    }
}
