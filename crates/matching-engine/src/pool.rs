//! Bounded object pools
//!
//! An [`ObjectPool`] preallocates `floor` objects, never hands out more than
//! `ceiling` at once and resets every object before it is reused. Reaching
//! the ceiling is a backpressure signal ([`PoolExhausted`]), never a panic.
//!
//! Objects are single-owner: a [`Pooled`] guard is the only handle to its
//! object between `acquire` and release, and dropping the guard releases it.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::domain::{Order, Trade};

/// Pool ceiling reached
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Pool exhausted: '{pool}' has all {ceiling} objects in use")]
pub struct PoolExhausted {
    pub pool: &'static str,
    pub ceiling: usize,
}

/// Object that can be returned to a pool
pub trait Poolable: Send + 'static {
    /// Return the object to its zero state
    fn reset(&mut self);
}

impl<T: Send + 'static> Poolable for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

/// In-flight order slot; empty while pooled
impl Poolable for Option<Order> {
    fn reset(&mut self) {
        *self = None;
    }
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

struct PoolInner<T: Poolable> {
    name: &'static str,
    floor: usize,
    ceiling: usize,
    free: Mutex<Vec<T>>,
    in_use: AtomicUsize,
    created: AtomicU64,
    exhausted: AtomicU64,
    factory: Factory<T>,
}

impl<T: Poolable> PoolInner<T> {
    fn give_back(&self, mut value: T) {
        value.reset();
        {
            let mut free = self.free.lock();
            if free.len() < self.ceiling {
                free.push(value);
            }
        }
        self.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Fixed-capacity pool of reusable objects
pub struct ObjectPool<T: Poolable> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Poolable> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Poolable> ObjectPool<T> {
    /// Create a pool, preallocating `floor` objects
    ///
    /// `floor` is capped at `ceiling`.
    pub fn new<F>(name: &'static str, floor: usize, ceiling: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let floor = floor.min(ceiling);
        let free: Vec<T> = (0..floor).map(|_| factory()).collect();

        debug!(pool = name, floor, ceiling, "Object pool created");

        Self {
            inner: Arc::new(PoolInner {
                name,
                floor,
                ceiling,
                free: Mutex::new(free),
                in_use: AtomicUsize::new(0),
                created: AtomicU64::new(floor as u64),
                exhausted: AtomicU64::new(0),
                factory: Box::new(factory),
            }),
        }
    }

    /// Take an object out of the pool
    ///
    /// Reuses a free object when one exists and only allocates while the
    /// number of outstanding objects is below the ceiling.
    pub fn acquire(&self) -> Result<Pooled<T>, PoolExhausted> {
        let inner = &self.inner;
        let mut current = inner.in_use.load(Ordering::Acquire);
        loop {
            if current >= inner.ceiling {
                inner.exhausted.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("pool_exhausted_total", "pool" => inner.name).increment(1);
                return Err(PoolExhausted {
                    pool: inner.name,
                    ceiling: inner.ceiling,
                });
            }
            match inner.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let reused = inner.free.lock().pop();
        let value = match reused {
            Some(value) => value,
            None => {
                inner.created.fetch_add(1, Ordering::Relaxed);
                (inner.factory)()
            }
        };

        Ok(Pooled {
            value: Some(value),
            pool: Arc::clone(inner),
        })
    }

    /// Return an object explicitly; equivalent to dropping the guard
    pub fn release(&self, object: Pooled<T>) {
        drop(object);
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.inner.name,
            floor: self.inner.floor,
            ceiling: self.inner.ceiling,
            in_use: self.in_use(),
            available: self.inner.free.lock().len(),
            created: self.inner.created.load(Ordering::Relaxed),
            exhausted: self.inner.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Guard owning one pooled object
pub struct Pooled<T: Poolable> {
    value: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Poolable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            // value is only taken in Drop
            None => unreachable!("pooled object accessed after release"),
        }
    }
}

impl<T: Poolable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("pooled object accessed after release"),
        }
    }
}

impl<T: Poolable> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.give_back(value);
        }
    }
}

impl<T: Poolable + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("pool", &self.pool.name)
            .field("value", &self.value)
            .finish()
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub name: &'static str,
    pub floor: usize,
    pub ceiling: usize,
    pub in_use: usize,
    pub available: usize,
    pub created: u64,
    pub exhausted: u64,
}

// ============================================================================
// Engine pools
// ============================================================================

/// Pools owned by one engine instance
#[derive(Clone)]
pub struct EnginePools {
    /// In-flight order slots; the ceiling bounds orders being processed at
    /// once. Only the slot is reused: `Order::accept` still allocates each
    /// `Order`, so this pool is admission control, not allocation reuse.
    pub orders: ObjectPool<Option<Order>>,
    /// Buffers the matcher builds executions into; the buffer travels with
    /// the EXECUTE_TRADES script and is handed back after the commit
    pub trades: ObjectPool<Vec<Trade>>,
    /// Serialization buffers, shared with the distribution hub
    pub buffers: ObjectPool<Vec<u8>>,
}

impl EnginePools {
    pub fn from_config(config: &config::PoolsConfig) -> Self {
        let buffer_capacity = config.buffer_capacity;
        Self {
            orders: ObjectPool::new("orders", config.orders.floor, config.orders.ceiling, || None),
            trades: ObjectPool::new(
                "trade_buffers",
                config.trade_buffers.floor,
                config.trade_buffers.ceiling,
                || Vec::with_capacity(16),
            ),
            buffers: ObjectPool::new(
                "byte_buffers",
                config.byte_buffers.floor,
                config.byte_buffers.ceiling,
                move || Vec::with_capacity(buffer_capacity),
            ),
        }
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        vec![self.orders.stats(), self.trades.stats(), self.buffers.stats()]
    }
}

impl Default for EnginePools {
    fn default() -> Self {
        Self::from_config(&config::PoolsConfig::default())
    }
}
