//! Matching engine error types

use common::PrecisionError;
use thiserror::Error;

use crate::pool::PoolExhausted;
use crate::store::StoreError;

/// Errors that can occur during order submission and matching
#[derive(Error, Debug, Clone)]
pub enum MatchingError {
    /// Order failed validation and never entered the book
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Pair is not configured or is disabled
    #[error("Unknown pair: {0}")]
    UnknownPair(String),

    /// Price or amount does not match the pair's precision
    #[error("Insufficient precision match: {0}")]
    Precision(#[from] PrecisionError),

    /// Object pool ceiling reached
    #[error(transparent)]
    PoolExhausted(#[from] PoolExhausted),

    /// Per-pair or batch queue is full
    #[error("Queue full for {0}")]
    QueueFull(String),

    /// Batch flush failed after exhausting its retry budget
    #[error("Batch failed after {attempts} attempts: {reason}")]
    BatchFailed { attempts: u32, reason: String },

    /// Store rejected an operation
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Engine is shutting down
    #[error("Engine is shutting down")]
    Shutdown,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MatchingError {
    /// Recoverable by retrying later or slowing down
    pub fn is_backpressure(&self) -> bool {
        matches!(self, MatchingError::PoolExhausted(_) | MatchingError::QueueFull(_))
    }

    /// Rejected synchronously because of the request itself
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MatchingError::InvalidOrder(_) | MatchingError::UnknownPair(_) | MatchingError::Precision(_)
        )
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        MatchingError::InvalidOrder(msg.into())
    }
}
