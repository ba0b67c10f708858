//! Metrics for the Matching Engine
//!
//! In-process counters, latency percentiles and throughput, readable through
//! [`EngineMetrics::snapshot`]. Every update is mirrored into the `metrics`
//! facade so a Prometheus exporter sees the same numbers.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Simple gauge for current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }
}

// ============================================================================
// Latency
// ============================================================================

/// Sliding window of the most recent latency samples
///
/// Percentiles are computed over the last `capacity` samples using the
/// nearest-rank method; totals (count, min, max) cover every sample.
#[derive(Debug)]
pub struct LatencyReservoir {
    capacity: usize,
    samples: Mutex<VecDeque<u64>>,
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl LatencyReservoir {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    pub fn record(&self, duration: Duration) {
        let us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(us, Ordering::Relaxed);
        self.min.fetch_min(us, Ordering::Relaxed);
        self.max.fetch_max(us, Ordering::Relaxed);

        let mut samples = self.samples.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(us);
    }

    pub fn stats(&self) -> LatencyStats {
        let mut window: Vec<u64> = self.samples.lock().iter().copied().collect();
        window.sort_unstable();

        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        LatencyStats {
            count,
            avg_us: if count > 0 { sum / count } else { 0 },
            min_us: if count > 0 { self.min.load(Ordering::Relaxed) } else { 0 },
            max_us: self.max.load(Ordering::Relaxed),
            p50_us: percentile(&window, 50.0),
            p95_us: percentile(&window, 95.0),
            p99_us: percentile(&window, 99.0),
        }
    }
}

/// Nearest-rank percentile of sorted samples
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub avg_us: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

// ============================================================================
// Throughput
// ============================================================================

/// Events per second over a rolling window of one-second buckets
#[derive(Debug)]
pub struct Throughput {
    started: Instant,
    window_secs: u64,
    buckets: Mutex<VecDeque<(u64, u64)>>,
}

impl Throughput {
    pub fn new(window: Duration) -> Self {
        Self {
            started: Instant::now(),
            window_secs: window.as_secs().max(1),
            buckets: Mutex::new(VecDeque::new()),
        }
    }

    fn now_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn record(&self, n: u64) {
        let now = self.now_secs();
        let mut buckets = self.buckets.lock();
        match buckets.back_mut() {
            Some((second, count)) if *second == now => *count += n,
            _ => buckets.push_back((now, n)),
        }
        while buckets
            .front()
            .map(|(second, _)| second + self.window_secs <= now)
            .unwrap_or(false)
        {
            buckets.pop_front();
        }
    }

    /// Average rate over the window (or the uptime, when shorter)
    pub fn per_second(&self) -> f64 {
        let now = self.now_secs();
        let buckets = self.buckets.lock();
        let total: u64 = buckets
            .iter()
            .filter(|(second, _)| second + self.window_secs > now)
            .map(|(_, count)| count)
            .sum();
        let span = (now + 1).min(self.window_secs);
        total as f64 / span as f64
    }
}

// ============================================================================
// Engine metrics
// ============================================================================

/// Metrics for the matching engine
#[derive(Debug)]
pub struct EngineMetrics {
    pub orders_received: Counter,
    pub orders_rejected: Counter,
    pub orders_rested: Counter,
    pub orders_filled: Counter,
    pub orders_cancelled: Counter,
    pub orders_expired: Counter,
    pub trades_executed: Counter,
    pub batches_flushed: Counter,
    pub batch_retries: Counter,
    pub batches_failed: Counter,
    pub backpressure_rejections: Counter,
    pub consistency_violations: Counter,
    pub active_workers: Gauge,
    pub order_latency: LatencyReservoir,
    pub batch_latency: LatencyReservoir,
    pub order_throughput: Throughput,
    pub trade_throughput: Throughput,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::with_window(4096, Duration::from_secs(10))
    }

    pub fn with_window(samples: usize, throughput_window: Duration) -> Self {
        Self {
            orders_received: Counter::new(),
            orders_rejected: Counter::new(),
            orders_rested: Counter::new(),
            orders_filled: Counter::new(),
            orders_cancelled: Counter::new(),
            orders_expired: Counter::new(),
            trades_executed: Counter::new(),
            batches_flushed: Counter::new(),
            batch_retries: Counter::new(),
            batches_failed: Counter::new(),
            backpressure_rejections: Counter::new(),
            consistency_violations: Counter::new(),
            active_workers: Gauge::new(),
            order_latency: LatencyReservoir::new(samples),
            batch_latency: LatencyReservoir::new(samples),
            order_throughput: Throughput::new(throughput_window),
            trade_throughput: Throughput::new(throughput_window),
        }
    }

    pub fn record_order_received(&self) {
        self.orders_received.increment();
        self.order_throughput.record(1);
        metrics::counter!("engine_orders_received_total").increment(1);
    }

    pub fn record_order_rejected(&self, reason: &'static str) {
        self.orders_rejected.increment();
        metrics::counter!("engine_orders_rejected_total", "reason" => reason).increment(1);
    }

    pub fn record_backpressure(&self, kind: &'static str) {
        self.backpressure_rejections.increment();
        metrics::counter!("engine_backpressure_total", "kind" => kind).increment(1);
    }

    /// Final state of a processed order
    pub fn record_outcome(&self, state: &'static str) {
        match state {
            "resting" | "partially_filled" => self.orders_rested.increment(),
            "fully_filled" => self.orders_filled.increment(),
            "cancelled" => self.orders_cancelled.increment(),
            "expired" => self.orders_expired.increment(),
            _ => {}
        }
        metrics::counter!("engine_orders_processed_total", "state" => state).increment(1);
    }

    pub fn record_cancel(&self) {
        self.orders_cancelled.increment();
        metrics::counter!("engine_orders_cancelled_total").increment(1);
    }

    pub fn record_expired(&self, n: u64) {
        self.orders_expired.add(n);
        metrics::counter!("engine_orders_expired_total").increment(n);
    }

    pub fn record_trades(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.trades_executed.add(n);
        self.trade_throughput.record(n);
        metrics::counter!("engine_trades_executed_total").increment(n);
    }

    pub fn record_order_latency(&self, duration: Duration) {
        self.order_latency.record(duration);
        metrics::histogram!("engine_order_latency_seconds").record(duration.as_secs_f64());
    }

    pub fn record_batch(&self, ops: usize, duration: Duration) {
        self.batches_flushed.increment();
        self.batch_latency.record(duration);
        metrics::counter!("engine_batches_flushed_total").increment(1);
        metrics::histogram!("engine_batch_size").record(ops as f64);
        metrics::histogram!("engine_batch_latency_seconds").record(duration.as_secs_f64());
    }

    pub fn record_batch_retry(&self) {
        self.batch_retries.increment();
        metrics::counter!("engine_batch_retries_total").increment(1);
    }

    pub fn record_batch_failed(&self) {
        self.batches_failed.increment();
        metrics::counter!("engine_batches_failed_total").increment(1);
    }

    pub fn record_consistency_violation(&self, n: u64) {
        self.consistency_violations.add(n);
    }

    pub fn worker_started(&self) {
        self.active_workers.increment();
        metrics::gauge!("engine_active_workers").increment(1.0);
    }

    pub fn worker_stopped(&self) {
        self.active_workers.decrement();
        metrics::gauge!("engine_active_workers").decrement(1.0);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            orders_received: self.orders_received.get(),
            orders_rejected: self.orders_rejected.get(),
            orders_rested: self.orders_rested.get(),
            orders_filled: self.orders_filled.get(),
            orders_cancelled: self.orders_cancelled.get(),
            orders_expired: self.orders_expired.get(),
            trades_executed: self.trades_executed.get(),
            batches_flushed: self.batches_flushed.get(),
            batch_retries: self.batch_retries.get(),
            batches_failed: self.batches_failed.get(),
            backpressure_rejections: self.backpressure_rejections.get(),
            consistency_violations: self.consistency_violations.get(),
            active_workers: self.active_workers.get(),
            order_latency: self.order_latency.stats(),
            batch_latency: self.batch_latency.stats(),
            orders_per_second: self.order_throughput.per_second(),
            trades_per_second: self.trade_throughput.per_second(),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub orders_received: u64,
    pub orders_rejected: u64,
    pub orders_rested: u64,
    pub orders_filled: u64,
    pub orders_cancelled: u64,
    pub orders_expired: u64,
    pub trades_executed: u64,
    pub batches_flushed: u64,
    pub batch_retries: u64,
    pub batches_failed: u64,
    pub backpressure_rejections: u64,
    pub consistency_violations: u64,
    pub active_workers: u64,
    pub order_latency: LatencyStats,
    pub batch_latency: LatencyStats,
    pub orders_per_second: f64,
    pub trades_per_second: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles_nearest_rank() {
        let samples: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&samples, 50.0), 50);
        assert_eq!(percentile(&samples, 95.0), 95);
        assert_eq!(percentile(&samples, 99.0), 99);
        assert_eq!(percentile(&[], 99.0), 0);
        assert_eq!(percentile(&[7], 50.0), 7);
    }

    #[test]
    fn test_reservoir_keeps_recent_window() {
        let reservoir = LatencyReservoir::new(10);
        for us in 1..=20 {
            reservoir.record(Duration::from_micros(us));
        }
        let stats = reservoir.stats();
        assert_eq!(stats.count, 20);
        assert_eq!(stats.min_us, 1);
        assert_eq!(stats.max_us, 20);
        // window holds 11..=20
        assert_eq!(stats.p50_us, 15);
        assert_eq!(stats.p99_us, 20);
    }

    #[test]
    fn test_empty_stats_are_zero() {
        let stats = LatencyReservoir::new(4).stats();
        assert_eq!(stats, LatencyStats::default());
    }

    #[test]
    fn test_throughput_counts_recent_events() {
        let throughput = Throughput::new(Duration::from_secs(10));
        throughput.record(5);
        throughput.record(5);
        assert!(throughput.per_second() >= 10.0 / 10.0);
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = EngineMetrics::new();
        metrics.record_order_received();
        metrics.record_outcome("fully_filled");
        metrics.record_trades(3);
        metrics.record_order_latency(Duration::from_micros(250));
        metrics.worker_started();
        metrics.worker_stopped();
        metrics.worker_stopped();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.orders_received, 1);
        assert_eq!(snapshot.orders_filled, 1);
        assert_eq!(snapshot.trades_executed, 3);
        assert_eq!(snapshot.order_latency.p99_us, 250);
        assert_eq!(snapshot.active_workers, 0);
    }
}
