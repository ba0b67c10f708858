//! Order matching engine for SpotX
//!
//! This crate implements price-time priority matching for crypto spot pairs
//! on top of an atomic book store.
//!
//! # Architecture
//!
//! - [`exchange::Exchange`] - Collaborator façade (submit, cancel, queries, finality)
//! - [`workers`] - One task per pair; all mutations of a book are serialized there
//! - [`engine::Matcher`] - Pure price-time matching over FAST_MATCH candidates
//! - [`batch`] - Size/interval batching of store scripts with bounded retries
//! - [`store`] - `BookStore` trait with in-memory and Redis/Lua backends
//! - [`script`] - ADD_ORDER, FAST_MATCH, EXECUTE_TRADES, GET_ORDERBOOK_FAST
//! - [`pool`] - Bounded object pools for in-flight orders and buffers
//! - [`metrics`] - Latency percentiles, throughput and counters
//!
//! # Features
//!
//! - `api` - axum HTTP routes over the exchange façade

pub mod batch;
pub mod domain;
pub mod engine;
pub mod error;
pub mod event;
pub mod exchange;
pub mod metrics;
pub mod pairs;
pub mod pool;
pub mod result;
pub mod script;
pub mod store;
pub mod workers;

#[cfg(feature = "api")]
pub mod api;

pub use domain::{BookSnapshot, MatchRequest, NewOrder, Order, PriceLevel, PriceLevelView, Trade};
pub use engine::{MatchPlan, Matcher, DEFAULT_MAX_CANDIDATES};
pub use error::MatchingError;
pub use event::EngineEvent;
pub use exchange::{EngineConfig, Exchange, Finality, TradeView, EVENT_CHANNEL_CAPACITY};
pub use metrics::{EngineMetrics, LatencyStats, MetricsSnapshot};
pub use pairs::{PairRegistry, PairSpec};
pub use pool::{EnginePools, ObjectPool, PoolExhausted, PoolStats, Poolable, Pooled};
pub use result::{CancelResult, OrderState, SubmitResult};
pub use script::{ExecutionReport, Script, ScriptResult};
pub use store::{create_store, BookStore, InMemoryBookStore, RedisBookStore, StoreError, StoreResult};

/// Result type for matching operations
pub type Result<T> = std::result::Result<T, MatchingError>;
