//! Per-pair workers
//!
//! Every pair has one task that owns all mutations of its book. Commands
//! for a pair are processed strictly one at a time in arrival order, so the
//! candidates FAST_MATCH returns stay valid until the resulting batch is
//! committed. Different pairs run in parallel on the runtime's threads.

use chrono::Utc;
use common::{OrderId, OrderStatus, Pair};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::BatchHandle;
use crate::domain::Order;
use crate::engine::Matcher;
use crate::error::MatchingError;
use crate::event::EngineEvent;
use crate::metrics::EngineMetrics;
use crate::pool::{EnginePools, Pooled};
use crate::result::{CancelResult, OrderState, SubmitResult};
use crate::script::{ExecutionReport, Script, ScriptResult};
use crate::store::BookStore;
use crate::Result;

/// Work item for a pair worker
pub enum PairCommand {
    Submit {
        /// Pooled slot holding the accepted order
        slot: Pooled<Option<Order>>,
        received_at: Instant,
        reply: oneshot::Sender<Result<SubmitResult>>,
    },
    Cancel {
        order_id: OrderId,
        reply: oneshot::Sender<Result<CancelResult>>,
    },
}

impl PairCommand {
    fn reject(self, err: MatchingError) {
        match self {
            PairCommand::Submit { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            PairCommand::Cancel { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// Shared state every worker runs against
pub struct WorkerContext {
    pub store: Arc<dyn BookStore>,
    pub batch: BatchHandle,
    pub matcher: Matcher,
    pub pools: EnginePools,
    pub metrics: Arc<EngineMetrics>,
    pub events: broadcast::Sender<EngineEvent>,
    pub shutdown: CancellationToken,
}

impl WorkerContext {
    fn publish(&self, event: EngineEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn submit(&self, slot: &mut Pooled<Option<Order>>) -> Result<SubmitResult> {
        let Some(mut taker) = slot.take() else {
            return Err(MatchingError::Internal("empty order slot".to_string()));
        };
        let pair = taker.pair.clone();
        let now = Utc::now();

        let request = self.matcher.request(&taker, now);
        let candidates = self
            .store
            .execute(Script::FastMatch { request })
            .await?
            .into_candidates()
            .ok_or_else(|| MatchingError::Internal("FAST_MATCH returned no candidates".to_string()))?;

        let mut trades = self.pools.trades.acquire()?;
        let plan = self.matcher.plan(&mut taker, &candidates, now, &mut trades)?;

        let mut scripts = Vec::with_capacity(plan.expired.len() + 2);
        scripts.extend(plan.expired.iter().map(|id| Script::ExpireOrder { order_id: *id }));
        let has_trades = !trades.is_empty();
        if has_trades {
            scripts.push(Script::ExecuteTrades {
                pair: pair.clone(),
                trades: std::mem::take(&mut *trades),
            });
        }
        scripts.push(Script::AddOrder { order: taker });

        let committed = self.batch.submit(&pair, scripts).await?;
        // the buffer goes back to the pool with its capacity
        if let Some(buffer) = committed.scripts.into_iter().find_map(Script::into_trades) {
            *trades = buffer;
        }
        drop(trades);
        let mut results = committed.results.into_iter();

        let mut expired = Vec::with_capacity(plan.expired.len());
        for order_id in &plan.expired {
            match results.next().and_then(ScriptResult::into_removed).flatten() {
                Some(order) => expired.push(order),
                // an earlier attempt of this batch already expired it
                None => {
                    if let Some(order) = self.store.get_order(*order_id).await? {
                        if order.status == OrderStatus::Expired {
                            expired.push(order);
                        }
                    }
                }
            }
        }
        let report = if has_trades {
            results
                .next()
                .and_then(ScriptResult::into_report)
                .ok_or_else(|| MatchingError::Internal("EXECUTE_TRADES result missing".to_string()))?
        } else {
            ExecutionReport::default()
        };
        let order = results
            .next()
            .and_then(ScriptResult::into_added)
            .ok_or_else(|| MatchingError::Internal("ADD_ORDER result missing".to_string()))?;

        if !report.replayed.is_empty() {
            debug!(pair = %pair, trades = report.replayed.len(), "Trades applied by an earlier attempt");
        }
        let violations = report.duplicates.len() + report.clamped.len();
        if violations > 0 {
            self.metrics.record_consistency_violation(violations as u64);
        }

        let state = OrderState::of(&order);
        let expired_ids: Vec<OrderId> = expired.iter().map(|o| o.id).collect();
        self.metrics.record_expired(expired.len() as u64);
        self.metrics.record_trades(report.trades.len() as u64);
        self.metrics.record_outcome(state.as_str());

        for order in expired {
            self.publish(EngineEvent::OrderExpired { order });
        }
        for trade in &report.trades {
            self.publish(EngineEvent::TradeExecuted { trade: trade.clone() });
        }
        for maker in report.makers {
            self.publish(EngineEvent::OrderUpdated { order: maker });
        }
        if order.is_live() {
            self.publish(EngineEvent::OrderAdded { order: order.clone() });
        } else {
            self.publish(EngineEvent::OrderUpdated { order: order.clone() });
        }
        self.publish(EngineEvent::BookChanged {
            pair,
            sequence: order.sequence,
        });

        debug!(
            order_id = %order.id,
            pair = %order.pair,
            state = state.as_str(),
            trades = report.trades.len(),
            "Order processed"
        );

        Ok(SubmitResult {
            order,
            trades: report.trades,
            state,
            expired_makers: expired_ids,
        })
    }

    async fn cancel(&self, pair: &Pair, order_id: OrderId) -> Result<CancelResult> {
        let removed = self
            .batch
            .submit(pair, vec![Script::CancelOrder { order_id }])
            .await?
            .results
            .into_iter()
            .next()
            .and_then(ScriptResult::into_removed)
            .ok_or_else(|| MatchingError::Internal("CANCEL_ORDER result missing".to_string()))?;

        match removed {
            Some(order) => {
                self.metrics.record_cancel();
                info!(order_id = %order.id, pair = %order.pair, "Order cancelled");
                self.publish(EngineEvent::OrderUpdated { order: order.clone() });
                self.publish(EngineEvent::BookChanged {
                    pair: order.pair.clone(),
                    sequence: order.sequence,
                });
                Ok(CancelResult::cancelled(order))
            }
            None => {
                let existing = self.store.get_order(order_id).await?;
                debug!(order_id = %order_id, "Cancel of an order that is not live");
                Ok(CancelResult::not_cancelled(existing))
            }
        }
    }

    async fn handle(&self, pair: &Pair, command: PairCommand) {
        match command {
            PairCommand::Submit {
                mut slot,
                received_at,
                reply,
            } => {
                let result = self.submit(&mut slot).await;
                // release the in-flight slot before answering
                drop(slot);
                self.metrics.record_order_latency(received_at.elapsed());
                if let Err(e) = &result {
                    warn!(error = %e, "Order processing failed");
                }
                let _ = reply.send(result);
            }
            PairCommand::Cancel { order_id, reply } => {
                let _ = reply.send(self.cancel(pair, order_id).await);
            }
        }
    }
}

/// Lazily spawned worker per pair
pub struct PairWorkers {
    context: Arc<WorkerContext>,
    queue_capacity: usize,
    senders: DashMap<Pair, mpsc::Sender<PairCommand>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PairWorkers {
    pub fn new(context: WorkerContext, queue_capacity: usize) -> Self {
        Self {
            context: Arc::new(context),
            queue_capacity: queue_capacity.max(1),
            senders: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn sender(&self, pair: &Pair) -> mpsc::Sender<PairCommand> {
        if let Some(sender) = self.senders.get(pair) {
            return sender.clone();
        }
        self.senders
            .entry(pair.clone())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.queue_capacity);
                let context = Arc::clone(&self.context);
                let task = tokio::spawn(run_worker(context, pair.clone(), rx));
                self.tasks.lock().push(task);
                tx
            })
            .clone()
    }

    /// Queue a command; fails fast when the pair's queue is full
    pub fn dispatch(&self, pair: &Pair, command: PairCommand) -> Result<()> {
        if self.context.shutdown.is_cancelled() {
            return Err(MatchingError::Shutdown);
        }
        self.sender(pair).try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                self.context.metrics.record_backpressure("pair_queue");
                MatchingError::QueueFull(format!("pair {}", pair))
            }
            mpsc::error::TrySendError::Closed(_) => MatchingError::Shutdown,
        })
    }

    pub fn active(&self) -> usize {
        self.senders.len()
    }

    /// Wait for every worker task to finish
    pub async fn join(&self) {
        self.senders.clear();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Pair worker panicked");
            }
        }
    }
}

async fn run_worker(context: Arc<WorkerContext>, pair: Pair, mut rx: mpsc::Receiver<PairCommand>) {
    context.metrics.worker_started();
    info!(pair = %pair, "Pair worker started");

    loop {
        tokio::select! {
            biased;
            _ = context.shutdown.cancelled() => break,
            command = rx.recv() => match command {
                Some(command) => context.handle(&pair, command).await,
                None => break,
            },
        }
    }

    rx.close();
    while let Ok(command) = rx.try_recv() {
        command.reject(MatchingError::Shutdown);
    }
    context.metrics.worker_stopped();
    info!(pair = %pair, "Pair worker stopped");
}
