//! Batch writer
//!
//! Pair workers hand their script groups to a single writer task. The
//! writer collects groups and flushes when they reach `max_batch_size`
//! operations or when the oldest pending group has waited `flush_interval`,
//! whichever comes first.
//!
//! A flush splits the pending groups by pair and commits each pair's share
//! as its own store batch on its own task, so a slow or failing pair never
//! delays or fails another. At most one commit per pair is in flight;
//! groups of a pair that is still committing wait for the next flush.
//!
//! A failed commit is retried as a whole with linear backoff. Replaying is
//! safe: ADD_ORDER of a known id returns the stored order and EXECUTE_TRADES
//! reports trades an earlier attempt already applied. Once the retry budget
//! is spent every group of that pair's batch receives `BatchFailed`.

use common::Pair;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant as StdInstant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::MatchingError;
use crate::metrics::EngineMetrics;
use crate::script::{Script, ScriptResult};
use crate::store::BookStore;
use crate::Result;

/// A committed group
///
/// The scripts come back with their results so callers can reclaim the
/// buffers they moved into them.
#[derive(Debug)]
pub struct Committed {
    pub results: Vec<ScriptResult>,
    pub scripts: Vec<Script>,
}

/// One worker's scripts, committed together and answered together
struct PendingGroup {
    pair: Pair,
    scripts: Vec<Script>,
    reply: oneshot::Sender<Result<Committed>>,
}

/// Cloneable handle used by pair workers to enqueue script groups
#[derive(Clone)]
pub struct BatchHandle {
    tx: mpsc::Sender<PendingGroup>,
}

impl BatchHandle {
    /// Queue a group of `pair` and wait for its results
    ///
    /// Fails fast with `QueueFull` when the writer's queue is at capacity.
    pub async fn submit(&self, pair: &Pair, scripts: Vec<Script>) -> Result<Committed> {
        if scripts.is_empty() {
            return Ok(Committed {
                results: Vec::new(),
                scripts,
            });
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(PendingGroup {
                pair: pair.clone(),
                scripts,
                reply,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => MatchingError::QueueFull("batch queue".to_string()),
                mpsc::error::TrySendError::Closed(_) => MatchingError::Shutdown,
            })?;
        rx.await.map_err(|_| MatchingError::Shutdown)?
    }
}

/// Pairs with a commit in flight
type BusyPairs = Arc<Mutex<HashSet<Pair>>>;

/// Frees its pair when the commit task ends, even by panic
struct BusyGuard {
    busy: BusyPairs,
    pair: Pair,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.pair);
    }
}

/// Store side of a flush, shared by all in-flight commits
struct Committer {
    store: Arc<dyn BookStore>,
    config: config::BatchConfig,
    metrics: Arc<EngineMetrics>,
}

impl Committer {
    async fn commit(&self, pair: &Pair, groups: Vec<PendingGroup>) {
        let started = StdInstant::now();
        let total: usize = groups.iter().map(|g| g.scripts.len()).sum();

        match self.execute_with_retry(pair, &groups, total).await {
            Ok(results) if results.len() == total => {
                self.metrics.record_batch(total, started.elapsed());
                debug!(
                    pair = %pair,
                    groups = groups.len(),
                    ops = total,
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "Batch flushed"
                );

                let mut results = results.into_iter();
                for group in groups {
                    let part: Vec<ScriptResult> = results.by_ref().take(group.scripts.len()).collect();
                    let _ = group.reply.send(Ok(Committed {
                        results: part,
                        scripts: group.scripts,
                    }));
                }
            }
            Ok(results) => {
                error!(pair = %pair, expected = total, got = results.len(), "Store returned a short batch result");
                let err = MatchingError::Internal(format!(
                    "batch of {} scripts returned {} results",
                    total,
                    results.len()
                ));
                for group in groups {
                    let _ = group.reply.send(Err(err.clone()));
                }
            }
            Err(err) => {
                self.metrics.record_batch_failed();
                for group in groups {
                    let _ = group.reply.send(Err(err.clone()));
                }
            }
        }
    }

    async fn execute_with_retry(&self, pair: &Pair, groups: &[PendingGroup], total: usize) -> Result<Vec<ScriptResult>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let scripts: Vec<Script> = groups.iter().flat_map(|g| g.scripts.iter().cloned()).collect();
            match self.store.execute_batch(scripts).await {
                Ok(results) => return Ok(results),
                Err(e) if attempt <= self.config.max_retries => {
                    warn!(
                        pair = %pair,
                        attempt,
                        max_retries = self.config.max_retries,
                        ops = total,
                        error = %e,
                        "Batch flush failed, requeueing"
                    );
                    self.metrics.record_batch_retry();
                    tokio::time::sleep(self.config.retry_backoff() * attempt).await;
                }
                Err(e) => {
                    error!(
                        pair = %pair,
                        attempts = attempt,
                        ops = total,
                        error = %e,
                        "Batch flush failed, retries exhausted"
                    );
                    return Err(MatchingError::BatchFailed {
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

/// Background task owning the batch queue
pub struct BatchWriter {
    committer: Arc<Committer>,
    busy: BusyPairs,
    rx: mpsc::Receiver<PendingGroup>,
    shutdown: CancellationToken,
}

impl BatchWriter {
    /// Spawn the writer task
    pub fn spawn(
        store: Arc<dyn BookStore>,
        config: config::BatchConfig,
        metrics: Arc<EngineMetrics>,
        shutdown: CancellationToken,
    ) -> (BatchHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let writer = Self {
            committer: Arc::new(Committer { store, config, metrics }),
            busy: Arc::new(Mutex::new(HashSet::new())),
            rx,
            shutdown,
        };
        let task = tokio::spawn(writer.run());
        (BatchHandle { tx }, task)
    }

    async fn run(mut self) {
        let config = &self.committer.config;
        info!(
            max_batch_size = config.max_batch_size,
            flush_interval_ms = config.flush_interval_ms,
            max_retries = config.max_retries,
            backend = self.committer.store.backend(),
            "Batch writer started"
        );
        let max_batch_size = config.max_batch_size;
        let flush_interval = config.flush_interval();

        let mut pending: Vec<PendingGroup> = Vec::new();
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    // commit what was already accepted before stopping
                    self.rx.close();
                    while let Some(group) = self.rx.recv().await {
                        pending.push(group);
                    }
                    break;
                }

                maybe = self.rx.recv() => {
                    let Some(group) = maybe else { break };
                    pending.push(group);
                    let ops: usize = pending.iter().map(|g| g.scripts.len()).sum();
                    if ops >= max_batch_size {
                        self.dispatch(&mut pending, &mut in_flight);
                        deadline = (!pending.is_empty()).then(|| Instant::now() + flush_interval);
                    } else if deadline.is_none() {
                        deadline = Some(Instant::now() + flush_interval);
                    }
                }

                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = done {
                        error!(error = %e, "Batch commit task failed");
                    }
                }

                _ = wait_until(deadline) => {
                    self.dispatch(&mut pending, &mut in_flight);
                    deadline = (!pending.is_empty()).then(|| Instant::now() + flush_interval);
                }
            }
        }

        self.drain(pending, in_flight).await;
        info!("Batch writer stopped");
    }

    /// Start one commit per pair; groups of busy pairs stay pending
    fn dispatch(&self, pending: &mut Vec<PendingGroup>, in_flight: &mut JoinSet<()>) {
        if pending.is_empty() {
            return;
        }

        let mut partitions: Vec<(Pair, Vec<PendingGroup>)> = Vec::new();
        let mut held = Vec::new();
        {
            let mut busy = self.busy.lock();
            for group in pending.drain(..) {
                if let Some((_, groups)) = partitions.iter_mut().find(|(pair, _)| *pair == group.pair) {
                    groups.push(group);
                } else if busy.insert(group.pair.clone()) {
                    partitions.push((group.pair.clone(), vec![group]));
                } else {
                    held.push(group);
                }
            }
        }
        if !held.is_empty() {
            debug!(groups = held.len(), "Holding groups of pairs still committing");
        }
        *pending = held;

        for (pair, groups) in partitions {
            let committer = Arc::clone(&self.committer);
            let guard = BusyGuard {
                busy: Arc::clone(&self.busy),
                pair,
            };
            in_flight.spawn(async move {
                committer.commit(&guard.pair, groups).await;
                drop(guard);
            });
        }
    }

    /// Commit every accepted group, then wait for all commits to finish
    async fn drain(&self, mut pending: Vec<PendingGroup>, mut in_flight: JoinSet<()>) {
        loop {
            self.dispatch(&mut pending, &mut in_flight);
            match in_flight.join_next().await {
                Some(Err(e)) => error!(error = %e, "Batch commit task failed"),
                Some(Ok(())) => {}
                None if pending.is_empty() => break,
                None => {
                    // nothing in flight yet a pair is still marked busy
                    error!(groups = pending.len(), "Pending groups left without a commit");
                    for group in pending.drain(..) {
                        let _ = group.reply.send(Err(MatchingError::Shutdown));
                    }
                    break;
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewOrder, Order};
    use crate::store::{InMemoryBookStore, PairScales, StoreError, StoreResult};
    use async_trait::async_trait;
    use chrono::Utc;
    use common::{Amount, OrderId, Pair, Scale, Side, UserId};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn pair() -> Pair {
        "BTC-USDT".parse().unwrap()
    }

    fn eth() -> Pair {
        "ETH-USDT".parse().unwrap()
    }

    fn order(price: &str) -> Order {
        order_on(&pair(), price)
    }

    fn order_on(pair: &Pair, price: &str) -> Order {
        let request = NewOrder::limit(
            UserId::new("u1").unwrap(),
            pair.clone(),
            Side::Buy,
            price.parse().unwrap(),
            "1".parse().unwrap(),
        );
        Order::accept(OrderId::new(), &request, Utc::now())
    }

    async fn memory_store() -> Arc<InMemoryBookStore> {
        let store = Arc::new(InMemoryBookStore::new(100, 100, Duration::ZERO));
        for pair in [pair(), eth()] {
            store
                .register_pair(
                    &pair,
                    PairScales {
                        price: Scale::new(2).unwrap(),
                        amount: Scale::new(4).unwrap(),
                    },
                )
                .await
                .unwrap();
        }
        store
    }

    fn batch_config(max_batch_size: usize, flush_interval_ms: u64) -> config::BatchConfig {
        config::BatchConfig {
            max_batch_size,
            flush_interval_ms,
            max_retries: 2,
            retry_backoff_ms: 1,
            queue_capacity: 16,
        }
    }

    /// Store that fails the first `failures` batches, and every batch
    /// touching the `down` pair
    struct FlakyStore {
        inner: Arc<InMemoryBookStore>,
        failures: AtomicU32,
        calls: AtomicU32,
        down: Option<Pair>,
    }

    impl FlakyStore {
        fn new(inner: Arc<InMemoryBookStore>, failures: u32) -> Self {
            Self {
                inner,
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                down: None,
            }
        }
    }

    #[async_trait]
    impl BookStore for FlakyStore {
        fn backend(&self) -> &'static str {
            "flaky"
        }
        async fn register_pair(&self, pair: &Pair, scales: PairScales) -> StoreResult<()> {
            self.inner.register_pair(pair, scales).await
        }
        async fn add_order(&self, order: Order) -> StoreResult<Order> {
            self.inner.add_order(order).await
        }
        async fn cancel_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
            self.inner.cancel_order(id).await
        }
        async fn expire_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
            self.inner.expire_order(id).await
        }
        async fn record_fill(&self, id: OrderId, delta: Amount) -> StoreResult<crate::store::FillOutcome> {
            self.inner.record_fill(id, delta).await
        }
        async fn execute_trades(&self, pair: &Pair, trades: Vec<crate::domain::Trade>) -> StoreResult<crate::script::ExecutionReport> {
            self.inner.execute_trades(pair, trades).await
        }
        async fn get_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
            self.inner.get_order(id).await
        }
        async fn get_book(&self, pair: &Pair, depth: usize) -> StoreResult<crate::domain::BookSnapshot> {
            self.inner.get_book(pair, depth).await
        }
        async fn get_orders_at_price(&self, pair: &Pair, side: Side, price: Amount) -> StoreResult<Vec<Order>> {
            self.inner.get_orders_at_price(pair, side, price).await
        }
        async fn fast_match(&self, request: &crate::domain::MatchRequest) -> StoreResult<Vec<Order>> {
            self.inner.fast_match(request).await
        }
        async fn recent_trades(&self, pair: &Pair, limit: usize) -> StoreResult<Vec<crate::domain::Trade>> {
            self.inner.recent_trades(pair, limit).await
        }
        async fn execute_batch(&self, scripts: Vec<Script>) -> StoreResult<Vec<ScriptResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(down) = &self.down {
                if scripts.iter().any(|s| s.pair() == Some(down)) {
                    return Err(StoreError::Unavailable(format!("{} shard down", down)));
                }
            }
            // apply half the batch, then fail
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                if let Some(first) = scripts.into_iter().next() {
                    self.inner.execute(first).await?;
                }
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            let mut results = Vec::new();
            for script in scripts {
                results.push(self.inner.execute(script).await?);
            }
            Ok(results)
        }
    }

    #[tokio::test]
    async fn test_flush_on_size() {
        let store = memory_store().await;
        let metrics = Arc::new(EngineMetrics::new());
        let shutdown = CancellationToken::new();
        // interval long enough that only the size trigger can fire
        let (handle, task) = BatchWriter::spawn(store.clone(), batch_config(2, 60_000), metrics.clone(), shutdown.clone());

        let p = pair();
        let a = handle.submit(&p, vec![Script::AddOrder { order: order("10") }]);
        let b = handle.submit(&p, vec![Script::AddOrder { order: order("11") }]);
        let (a, b) = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(a, b) })
            .await
            .unwrap();

        assert!(a.unwrap().results[0].clone().into_added().is_some());
        assert!(b.unwrap().results[0].clone().into_added().is_some());
        assert_eq!(metrics.snapshot().batches_flushed, 1);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_on_interval() {
        let store = memory_store().await;
        let metrics = Arc::new(EngineMetrics::new());
        let shutdown = CancellationToken::new();
        let (handle, task) = BatchWriter::spawn(store.clone(), batch_config(64, 5), metrics.clone(), shutdown.clone());

        let started = StdInstant::now();
        let committed = handle.submit(&pair(), vec![Script::AddOrder { order: order("10") }]).await.unwrap();
        assert_eq!(committed.results.len(), 1);
        assert_eq!(committed.scripts.len(), 1);
        assert!(started.elapsed() >= Duration::from_millis(4));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_results_split_per_group() {
        let store = memory_store().await;
        let shutdown = CancellationToken::new();
        let (handle, task) = BatchWriter::spawn(store.clone(), batch_config(3, 60_000), Arc::new(EngineMetrics::new()), shutdown.clone());

        let first = order("10");
        let first_id = first.id;
        let p = pair();
        let a = handle.submit(
            &p,
            vec![
                Script::AddOrder { order: first },
                Script::CancelOrder { order_id: first_id },
            ],
        );
        let b = handle.submit(&p, vec![Script::GetOrderbookFast { pair: pair(), depth: 5 }]);
        let (a, b) = tokio::join!(a, b);

        let a = a.unwrap().results;
        assert_eq!(a.len(), 2);
        assert_eq!(a[1].clone().into_removed().unwrap().unwrap().id, first_id);
        let b = b.unwrap().results;
        assert_eq!(b.len(), 1);
        assert!(b[0].clone().into_snapshot().unwrap().is_empty());

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_replays_idempotently() {
        let inner = memory_store().await;
        let store = Arc::new(FlakyStore::new(inner.clone(), 1));
        let metrics = Arc::new(EngineMetrics::new());
        let shutdown = CancellationToken::new();
        let (handle, task) = BatchWriter::spawn(store.clone(), batch_config(1, 1), metrics.clone(), shutdown.clone());

        let o = order("10");
        let committed = handle.submit(&pair(), vec![Script::AddOrder { order: o.clone() }]).await.unwrap();
        let stored = committed.results[0].clone().into_added().unwrap();
        assert_eq!(stored.id, o.id);

        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.snapshot().batch_retries, 1);
        // added once despite the replay
        let book = inner.get_book(&pair(), 5).await.unwrap();
        assert_eq!(book.bids[0].order_count, 1);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_retries_exhausted_reports_batch_failed() {
        let store = Arc::new(FlakyStore::new(memory_store().await, 10));
        let metrics = Arc::new(EngineMetrics::new());
        let shutdown = CancellationToken::new();
        let (handle, task) = BatchWriter::spawn(store.clone(), batch_config(1, 1), metrics.clone(), shutdown.clone());

        let err = handle
            .submit(&pair(), vec![Script::AddOrder { order: order("10") }])
            .await
            .unwrap_err();
        match err {
            MatchingError::BatchFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(metrics.snapshot().batches_failed, 1);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_pair_does_not_block_other_pairs() {
        let inner = memory_store().await;
        let mut flaky = FlakyStore::new(inner.clone(), 0);
        flaky.down = Some(eth());
        let store = Arc::new(flaky);
        let metrics = Arc::new(EngineMetrics::new());
        let shutdown = CancellationToken::new();
        let mut config = batch_config(64, 20);
        config.retry_backoff_ms = 200;
        let (handle, task) = BatchWriter::spawn(store.clone(), config, metrics.clone(), shutdown.clone());

        let eth_submit = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .submit(&eth(), vec![Script::AddOrder { order: order_on(&eth(), "10") }])
                    .await
            }
        });
        tokio::task::yield_now().await;

        // both groups share a flush window; BTC must not wait out ETH's retries
        let btc = tokio::time::timeout(
            Duration::from_millis(150),
            handle.submit(&pair(), vec![Script::AddOrder { order: order("10") }]),
        )
        .await
        .expect("BTC commit waited behind ETH");
        assert!(btc.is_ok());
        assert!(!eth_submit.is_finished());
        assert_eq!(inner.get_book(&pair(), 5).await.unwrap().bids[0].order_count, 1);

        match eth_submit.await.unwrap() {
            Err(MatchingError::BatchFailed { attempts, reason }) => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("ETH-USDT shard down"));
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(inner.get_book(&eth(), 5).await.unwrap().is_empty());
        assert_eq!(metrics.snapshot().batches_failed, 1);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending() {
        let store = memory_store().await;
        let shutdown = CancellationToken::new();
        let (handle, task) = BatchWriter::spawn(store.clone(), batch_config(64, 60_000), Arc::new(EngineMetrics::new()), shutdown.clone());

        let pending = tokio::spawn({
            let handle = handle.clone();
            async move { handle.submit(&pair(), vec![Script::AddOrder { order: order("10") }]).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        assert!(pending.await.unwrap().is_ok());
        task.await.unwrap();
        assert!(matches!(
            handle.submit(&pair(), vec![Script::AddOrder { order: order("11") }]).await,
            Err(MatchingError::Shutdown)
        ));
    }
}
