//! Exchange façade
//!
//! The boundary collaborators talk to: order submission and cancellation,
//! book and trade queries, the event stream and the settlement finality
//! watermark. One `Exchange` owns the store, the pools, the batch writer
//! and the pair workers, and shuts them down together.

use chrono::{DateTime, Utc};
use common::{OrderId, Pair};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::batch::{BatchHandle, BatchWriter};
use crate::domain::{BookSnapshot, NewOrder, Order, Trade};
use crate::engine::Matcher;
use crate::error::MatchingError;
use crate::event::EngineEvent;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::pairs::{PairRegistry, PairSpec};
use crate::pool::{EnginePools, PoolStats};
use crate::result::{CancelResult, SubmitResult};
use crate::script::Script;
use crate::store::{create_store, BookStore};
use crate::workers::{PairCommand, PairWorkers, WorkerContext};
use crate::Result;

/// Capacity of the engine event channel; slower receivers observe `Lagged`
pub const EVENT_CHANNEL_CAPACITY: usize = 16_384;

/// Settlement finality watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finality {
    /// Trades at or before this instant are settled
    pub finalized_through: DateTime<Utc>,
}

impl Default for Finality {
    fn default() -> Self {
        Self {
            finalized_through: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Trade with its settlement status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeView {
    #[serde(flatten)]
    pub trade: Trade,
    pub settled: bool,
}

/// Engine configuration subset
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub pairs: Vec<config::PairConfig>,
    pub matching: config::MatchingConfig,
    pub batch: config::BatchConfig,
    pub pools: config::PoolsConfig,
    pub workers: config::WorkersConfig,
    pub store: config::StoreConfig,
}

impl From<&config::MasterConfig> for EngineConfig {
    fn from(config: &config::MasterConfig) -> Self {
        Self {
            pairs: config.pairs.clone(),
            matching: config.matching.clone(),
            batch: config.batch.clone(),
            pools: config.pools.clone(),
            workers: config.workers.clone(),
            store: config.store.clone(),
        }
    }
}

/// Matching engine instance
pub struct Exchange {
    pairs: PairRegistry,
    store: Arc<dyn BookStore>,
    pools: EnginePools,
    metrics: Arc<EngineMetrics>,
    events: broadcast::Sender<EngineEvent>,
    finality: watch::Sender<Finality>,
    workers: PairWorkers,
    matching: config::MatchingConfig,
    shutdown: CancellationToken,
    batch_task: Mutex<Option<JoinHandle<()>>>,
}

impl Exchange {
    /// Build the configured store and start the engine
    pub async fn start(config: EngineConfig) -> Result<Arc<Self>> {
        let store = create_store(&config.store, &config.matching).await?;
        Self::with_store(store, config).await
    }

    /// Start the engine on an existing store
    pub async fn with_store(store: Arc<dyn BookStore>, config: EngineConfig) -> Result<Arc<Self>> {
        let pairs = PairRegistry::from_config(&config.pairs)?;
        for spec in pairs.iter() {
            store.register_pair(&spec.pair, spec.scales).await?;
        }

        let pools = EnginePools::from_config(&config.pools);
        let metrics = Arc::new(EngineMetrics::new());
        let shutdown = CancellationToken::new();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (finality, _) = watch::channel(Finality::default());

        let (batch, batch_task): (BatchHandle, JoinHandle<()>) = BatchWriter::spawn(
            Arc::clone(&store),
            config.batch.clone(),
            Arc::clone(&metrics),
            shutdown.child_token(),
        );

        let workers = PairWorkers::new(
            WorkerContext {
                store: Arc::clone(&store),
                batch,
                matcher: Matcher::new(config.matching.max_candidates),
                pools: pools.clone(),
                metrics: Arc::clone(&metrics),
                events: events.clone(),
                shutdown: shutdown.child_token(),
            },
            config.workers.queue_capacity,
        );

        info!(
            backend = store.backend(),
            pairs = pairs.len(),
            max_candidates = config.matching.max_candidates,
            "Exchange started"
        );

        Ok(Arc::new(Self {
            pairs,
            store,
            pools,
            metrics,
            events,
            finality,
            workers,
            matching: config.matching,
            shutdown,
            batch_task: Mutex::new(Some(batch_task)),
        }))
    }

    // ------------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------------

    /// Validate, match and commit an order
    pub async fn submit_order(&self, request: NewOrder) -> Result<SubmitResult> {
        let received_at = Instant::now();
        self.metrics.record_order_received();

        let now = Utc::now();
        if let Err(e) = self.pairs.validate(&request, now) {
            self.metrics.record_order_rejected(if matches!(e, MatchingError::Precision(_)) {
                "precision"
            } else {
                "invalid"
            });
            warn!(user_id = %request.user_id, pair = %request.pair, error = %e, "Order rejected");
            return Err(e);
        }

        let mut slot = self.pools.orders.acquire().map_err(|e| {
            self.metrics.record_backpressure("order_pool");
            MatchingError::from(e)
        })?;
        let order = Order::accept(OrderId::new(), &request, now);
        let pair = order.pair.clone();
        *slot = Some(order);

        let (reply, rx) = oneshot::channel();
        self.workers.dispatch(
            &pair,
            PairCommand::Submit {
                slot,
                received_at,
                reply,
            },
        )?;
        rx.await.map_err(|_| MatchingError::Shutdown)?
    }

    /// Cancel a live order; cancelling a terminal or unknown order is a no-op
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<CancelResult> {
        let Some(order) = self.store.get_order(order_id).await? else {
            return Ok(CancelResult::not_cancelled(None));
        };
        if !order.is_live() {
            return Ok(CancelResult::not_cancelled(Some(order)));
        }

        let (reply, rx) = oneshot::channel();
        self.workers
            .dispatch(&order.pair, PairCommand::Cancel { order_id, reply })?;
        rx.await.map_err(|_| MatchingError::Shutdown)?
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.store.get_order(order_id).await?)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Aggregated book; `depth` defaults to the configured depth and is
    /// capped at the configured maximum
    pub async fn get_book_snapshot(&self, pair: &Pair, depth: Option<usize>) -> Result<BookSnapshot> {
        self.pairs.get(pair)?;
        let depth = depth
            .unwrap_or(self.matching.default_depth)
            .min(self.matching.max_depth);
        self.store
            .execute(Script::GetOrderbookFast {
                pair: pair.clone(),
                depth,
            })
            .await?
            .into_snapshot()
            .ok_or_else(|| MatchingError::Internal("GET_ORDERBOOK_FAST returned no snapshot".to_string()))
    }

    /// Most recent trades, newest first, flagged against the finality watermark
    pub async fn get_recent_trades(&self, pair: &Pair, limit: usize) -> Result<Vec<TradeView>> {
        self.pairs.get(pair)?;
        let limit = limit.min(self.matching.trade_retention);
        let finalized_through = self.finality().finalized_through;
        let trades = self.store.recent_trades(pair, limit).await?;
        Ok(trades
            .into_iter()
            .map(|trade| TradeView {
                settled: trade.timestamp <= finalized_through,
                trade,
            })
            .collect())
    }

    // ------------------------------------------------------------------------
    // Settlement finality
    // ------------------------------------------------------------------------

    /// Advance the finality watermark; returns false when it would move back
    pub fn set_finality(&self, finalized_through: DateTime<Utc>) -> bool {
        let advanced = self.finality.send_if_modified(|current| {
            if finalized_through > current.finalized_through {
                current.finalized_through = finalized_through;
                true
            } else {
                false
            }
        });
        if advanced {
            info!(finalized_through = %finalized_through.to_rfc3339(), "Settlement finality advanced");
            let _ = self.events.send(EngineEvent::FinalityAdvanced { finalized_through });
        }
        advanced
    }

    pub fn finality(&self) -> Finality {
        *self.finality.borrow()
    }

    pub fn watch_finality(&self) -> watch::Receiver<Finality> {
        self.finality.subscribe()
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.pools.stats()
    }

    pub fn pools(&self) -> &EnginePools {
        &self.pools
    }

    pub fn pairs(&self) -> impl Iterator<Item = &PairSpec> {
        self.pairs.iter()
    }

    pub fn pair(&self, pair: &Pair) -> Result<&PairSpec> {
        self.pairs.get(pair)
    }

    pub fn store(&self) -> &Arc<dyn BookStore> {
        &self.store
    }

    pub fn default_depth(&self) -> usize {
        self.matching.default_depth
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting work, let workers finish, flush the batch queue
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("Exchange shutting down");
        self.shutdown.cancel();
        self.workers.join().await;
        let task = self.batch_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Batch writer panicked");
            }
        }
        info!("Exchange stopped");
    }
}
